use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::decoder::Decoder;
use crate::disasm::fmt_decoded;
use crate::exec::Executor;
use crate::memory::{Bus, MemoryError};
use crate::reg::{Reg, Registers};
use crate::syscall::SyscallHandler;

/// Exit code reported when the program fetched the zero halt word.
pub const HALT_EXIT_CODE: i32 = -1;
/// Exit code reported when the watchdog budget ran out.
pub const WATCHDOG_EXIT_CODE: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Maximum number of instructions one `run` may execute.
    pub watchdog: u64,
    pub initial_sp: Option<u32>,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            watchdog: 2000,
            initial_sp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cpu {
    pub pc: u32,
    pub regs: Registers,
    pub cfg: CpuConfig,
    exit: Option<i32>,
    retired: u64,
}

/// Fatal execution faults. Any of these aborts the run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Trap {
    #[error("invalid instruction {raw:#010x} at {pc:#010x}")]
    InvalidInstruction { pc: u32, raw: u32 },
    #[error("misaligned instruction fetch at {pc:#010x}")]
    MisalignedFetch { pc: u32 },
    #[error("memory fault at pc {pc:#010x}: {source}")]
    Memory {
        pc: u32,
        #[source]
        source: MemoryError,
    },
    #[error("breakpoint at {pc:#010x}")]
    Breakpoint { pc: u32 },
    #[error("unknown syscall {number} at {pc:#010x}")]
    UnknownSyscall { pc: u32, number: u32 },
}

/// What a single step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Retired,
    /// The zero word was fetched; nothing executed.
    Halted,
    /// `ecall` retired; the syscall handler runs next.
    Ecall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The program asked to stop with this code.
    Exited(i32),
    Halted,
    WatchdogExpired { executed: u64 },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match *self {
            RunOutcome::Exited(code) => code,
            RunOutcome::Halted => HALT_EXIT_CODE,
            RunOutcome::WatchdogExpired { .. } => WATCHDOG_EXIT_CODE,
        }
    }
}

impl Cpu {
    pub fn new(cfg: CpuConfig) -> Self {
        let mut regs = Registers::default();
        if let Some(sp) = cfg.initial_sp {
            regs.set_u(Reg::SP, sp);
        }
        Self {
            pc: 0,
            regs,
            cfg,
            exit: None,
            retired: 0,
        }
    }

    pub fn reset(&mut self, reset_pc: u32) {
        self.pc = reset_pc;
        self.exit = None;
    }

    /// Request the current run to end with `code` after this step.
    pub fn stop(&mut self, code: i32) {
        self.exit = Some(code);
    }

    pub fn stopped(&self) -> Option<i32> {
        self.exit
    }

    /// Instructions retired since construction.
    pub fn retired(&self) -> u64 {
        self.retired
    }

    pub fn reg(&self, r: Reg) -> i32 {
        self.regs.get(r)
    }

    pub fn set_reg(&mut self, r: Reg, value: i32) {
        self.regs.set(r, value)
    }

    pub fn step<B: Bus, D: Decoder, X: Executor>(
        &mut self,
        bus: &mut B,
        dec: &D,
        exec: &X,
    ) -> Result<Step, Trap> {
        let pc = self.pc;
        if pc % 4 != 0 {
            return Err(Trap::MisalignedFetch { pc });
        }
        let raw = bus
            .fetch_u32(pc)
            .map_err(|source| Trap::Memory { pc, source })?;
        if raw == 0 {
            return Ok(Step::Halted);
        }
        let d = dec
            .decode(raw)
            .ok_or(Trap::InvalidInstruction { pc, raw })?;
        trace!(pc, raw, "{}", fmt_decoded(&d));

        self.pc = pc.wrapping_add(4);
        let step = exec.exec(self, bus, pc, d)?;
        self.retired += 1;
        Ok(step)
    }

    /// Run from the current pc until the program stops, halts, faults, or
    /// exhausts the watchdog budget.
    pub fn run<B: Bus, D: Decoder, X: Executor, H: SyscallHandler>(
        &mut self,
        bus: &mut B,
        dec: &D,
        exec: &X,
        os: &mut H,
    ) -> Result<RunOutcome, Trap> {
        self.exit = None;
        let mut executed = 0u64;
        loop {
            if executed >= self.cfg.watchdog {
                info!(executed, pc = self.pc, "watchdog expired");
                return Ok(RunOutcome::WatchdogExpired { executed });
            }
            match self.step(bus, dec, exec)? {
                Step::Halted => {
                    info!(executed, pc = self.pc, "halted");
                    return Ok(RunOutcome::Halted);
                }
                Step::Ecall => os.trap(self, bus)?,
                Step::Retired => {}
            }
            executed += 1;
            if let Some(code) = self.exit {
                info!(executed, code, "exited");
                return Ok(RunOutcome::Exited(code));
            }
        }
    }
}
