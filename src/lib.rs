pub mod asm;
pub mod bits;
pub mod config;
pub mod cpu;
pub mod decoder;
pub mod diag;
pub mod disasm;
pub mod elf;
pub mod encoder;
pub mod exec;
pub mod instructions;
pub mod linker;
pub mod machine;
pub mod memory;
pub mod reg;
pub mod symbols;
pub mod syscall;

pub mod isa {
    pub mod rv32; // RV32IM decode table
}

pub use asm::assemble;
pub use config::{LinkConfig, RunConfig};
pub use cpu::{Cpu, CpuConfig, RunOutcome, Trap};
pub use diag::{Diagnostic, Diagnostics};
pub use encoder::{Assembler, Imm, Object, Target};
pub use linker::{link, Linked, Linker};
pub use machine::Machine;
pub use memory::{Access, AddressSpace, Bus, MemoryError, PAGE_SIZE};
pub use reg::Reg;
pub use syscall::{HostOs, SyscallHandler};
