//! Minimal OS personality behind `ecall`.
//!
//! The syscall number is taken from `a7` (x17), arguments from `a0..a2`
//! (x10..x12), and the result is written to `a0`. Host I/O failures and bad
//! handles are reported to the program as -1; faults on the guest buffers
//! abort the run like any other memory fault.

use std::fs::OpenOptions;
use std::io::{self, Read, Write};

use bitflags::bitflags;
use tracing::debug;

use crate::cpu::{Cpu, Trap};
use crate::memory::{Bus, MemoryError};
use crate::reg::Reg;

pub const SYS_EXIT: u32 = 0;
pub const SYS_WRITE: u32 = 1;
pub const SYS_READ: u32 = 2;
pub const SYS_OPEN: u32 = 3;
pub const SYS_CLOSE: u32 = 4;

/// Longest guest path accepted by `open`, terminator included.
pub const PATH_MAX: u32 = 4096;

const CHUNK: u32 = 4096;

pub trait SyscallHandler {
    /// Service the `ecall` that just retired. `cpu.pc` points past it.
    fn trap<B: Bus>(&mut self, cpu: &mut Cpu, bus: &mut B) -> Result<(), Trap>;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 1;
        const WRITE = 2;
        const CREATE = 4;
        const TRUNCATE = 8;
        const APPEND = 16;
    }
}

pub enum HostHandle {
    Input(Box<dyn Read>),
    Output(Box<dyn Write>),
    File(std::fs::File),
}

impl HostHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            HostHandle::Input(r) => r.read(buf),
            HostHandle::File(f) => f.read(buf),
            HostHandle::Output(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "write-only handle",
            )),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            HostHandle::Output(w) => w.write_all(buf).and_then(|_| w.flush()),
            HostHandle::File(f) => f.write_all(buf),
            HostHandle::Input(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "read-only handle",
            )),
        }
    }
}

/// Handle table over host streams and files. Slots 0..=2 are stdin, stdout
/// and stderr; closed slots stay in place as `None`.
pub struct HostOs {
    handles: Vec<Option<HostHandle>>,
}

impl Default for HostOs {
    fn default() -> Self {
        Self::new()
    }
}

impl HostOs {
    pub fn new() -> Self {
        Self::with_streams(io::stdin(), io::stdout(), io::stderr())
    }

    pub fn with_streams(
        stdin: impl Read + 'static,
        stdout: impl Write + 'static,
        stderr: impl Write + 'static,
    ) -> Self {
        Self {
            handles: vec![
                Some(HostHandle::Input(Box::new(stdin))),
                Some(HostHandle::Output(Box::new(stdout))),
                Some(HostHandle::Output(Box::new(stderr))),
            ],
        }
    }

    /// Number of slots, closed ones included.
    pub fn slots(&self) -> usize {
        self.handles.len()
    }

    pub fn is_open(&self, handle: i32) -> bool {
        usize::try_from(handle)
            .ok()
            .and_then(|h| self.handles.get(h))
            .is_some_and(Option::is_some)
    }

    fn handle(&mut self, handle: i32) -> Option<&mut HostHandle> {
        let h = usize::try_from(handle).ok()?;
        self.handles.get_mut(h)?.as_mut()
    }

    fn sys_write<B: Bus>(
        &mut self,
        bus: &mut B,
        handle: i32,
        addr: u32,
        len: u32,
    ) -> Result<i32, MemoryError> {
        if !self.is_open(handle) {
            return Ok(-1);
        }
        let mut done = 0u32;
        while done < len {
            let n = (len - done).min(CHUNK);
            let mut buf = vec![0u8; n as usize];
            bus.read_bytes(addr.wrapping_add(done), &mut buf)?;
            let Some(h) = self.handle(handle) else {
                return Ok(-1);
            };
            if h.write_all(&buf).is_err() {
                return Ok(-1);
            }
            done += n;
        }
        Ok(done as i32)
    }

    fn sys_read<B: Bus>(
        &mut self,
        bus: &mut B,
        handle: i32,
        addr: u32,
        len: u32,
    ) -> Result<i32, MemoryError> {
        let Some(h) = self.handle(handle) else {
            return Ok(-1);
        };
        let mut buf = vec![0u8; len.min(CHUNK) as usize];
        let n = match h.read(&mut buf) {
            Ok(n) => n,
            Err(_) => return Ok(-1),
        };
        if n == 0 {
            return Ok(0);
        }
        bus.write_bytes(addr, &buf[..n])?;
        Ok(n as i32)
    }

    fn sys_open<B: Bus>(
        &mut self,
        bus: &mut B,
        path_addr: u32,
        flags: u32,
    ) -> Result<i32, MemoryError> {
        let Some(flags) = OpenFlags::from_bits(flags) else {
            return Ok(-1);
        };
        let mut path = Vec::new();
        loop {
            if path.len() as u32 >= PATH_MAX {
                return Ok(-1);
            }
            match bus.read_u8(path_addr.wrapping_add(path.len() as u32))? {
                0 => break,
                b => path.push(b),
            }
        }
        let Ok(path) = String::from_utf8(path) else {
            return Ok(-1);
        };

        let mut opts = OpenOptions::new();
        opts.read(flags.is_empty() || flags.contains(OpenFlags::READ))
            .write(flags.intersects(OpenFlags::WRITE | OpenFlags::TRUNCATE))
            .append(flags.contains(OpenFlags::APPEND))
            .create(flags.contains(OpenFlags::CREATE))
            .truncate(flags.contains(OpenFlags::TRUNCATE));
        match opts.open(&path) {
            Ok(file) => {
                self.handles.push(Some(HostHandle::File(file)));
                Ok(self.handles.len() as i32 - 1)
            }
            Err(e) => {
                debug!(%path, error = %e, "open failed");
                Ok(-1)
            }
        }
    }

    fn sys_close(&mut self, handle: i32) -> i32 {
        match usize::try_from(handle).ok().and_then(|h| self.handles.get_mut(h)) {
            Some(slot @ Some(_)) => {
                *slot = None;
                0
            }
            _ => -1,
        }
    }
}

impl SyscallHandler for HostOs {
    fn trap<B: Bus>(&mut self, cpu: &mut Cpu, bus: &mut B) -> Result<(), Trap> {
        let pc = cpu.pc.wrapping_sub(4);
        let number = cpu.regs.get_u(Reg::A7);
        let a0 = cpu.regs.get(Reg::A0);
        let a1 = cpu.regs.get_u(Reg::A1);
        let a2 = cpu.regs.get_u(Reg::A2);
        debug!(pc, number, a0, a1, a2, "syscall");

        let fault = |source| Trap::Memory { pc, source };
        let result = match number {
            SYS_EXIT => {
                cpu.stop(a0);
                return Ok(());
            }
            SYS_WRITE => self.sys_write(bus, a0, a1, a2).map_err(fault)?,
            SYS_READ => self.sys_read(bus, a0, a1, a2).map_err(fault)?,
            SYS_OPEN => self.sys_open(bus, a0 as u32, a1).map_err(fault)?,
            SYS_CLOSE => self.sys_close(a0),
            _ => return Err(Trap::UnknownSyscall { pc, number }),
        };
        cpu.regs.set(Reg::A0, result);
        Ok(())
    }
}
