use tracing::debug;

use crate::cpu::{Cpu, CpuConfig, RunOutcome, Step, Trap};
use crate::exec::IntExecutor;
use crate::isa::rv32::Rv32Decoder;
use crate::linker::Linked;
use crate::memory::AddressSpace;
use crate::reg::Reg;
use crate::syscall::SyscallHandler;

/// Address space, hart and decode/execute pipeline of one program.
pub struct Machine {
    pub space: AddressSpace,
    pub cpu: Cpu,
    decoder: Rv32Decoder,
    executor: IntExecutor,
}

impl Machine {
    pub fn new(space: AddressSpace, entry: u32, cfg: CpuConfig) -> Self {
        let mut cpu = Cpu::new(cfg);
        cpu.reset(entry);
        Self {
            space,
            cpu,
            decoder: Rv32Decoder::new(),
            executor: IntExecutor,
        }
    }

    /// Take over a linked program. `sp` starts at the top of the linker's
    /// stack region unless the config pins it.
    pub fn from_linked(linked: Linked, cfg: CpuConfig) -> Self {
        let mut m = Self::new(linked.space, linked.entry, cfg);
        if cfg.initial_sp.is_none() {
            if let Some(top) = linked.stack_top {
                m.cpu.regs.set_u(Reg::SP, top);
            }
        }
        debug!(entry = linked.entry, sp = m.cpu.regs.get_u(Reg::SP), "machine ready");
        m
    }

    pub fn reg(&self, r: Reg) -> i32 {
        self.cpu.reg(r)
    }

    pub fn step(&mut self) -> Result<Step, Trap> {
        self.cpu.step(&mut self.space, &self.decoder, &self.executor)
    }

    pub fn run<H: SyscallHandler>(&mut self, os: &mut H) -> Result<RunOutcome, Trap> {
        self.cpu
            .run(&mut self.space, &self.decoder, &self.executor, os)
    }
}
