use crate::cpu::{Cpu, Step, Trap};
use crate::decoder::{Decoded, Op};
use crate::memory::{Bus, MemoryError};

pub trait Executor {
    /// Execute `d`, fetched from `pc`. `cpu.pc` already points past it.
    fn exec<B: Bus>(&self, cpu: &mut Cpu, bus: &mut B, pc: u32, d: Decoded) -> Result<Step, Trap>;
}

/// RV32IM integer executor.
pub struct IntExecutor;

fn div(a: i32, b: i32) -> i32 {
    match b {
        0 => -1,
        _ => a.wrapping_div(b),
    }
}

fn rem(a: i32, b: i32) -> i32 {
    match b {
        0 => a,
        _ => a.wrapping_rem(b),
    }
}

fn mem_fault(pc: u32) -> impl FnOnce(MemoryError) -> Trap {
    move |source| Trap::Memory { pc, source }
}

impl Executor for IntExecutor {
    fn exec<B: Bus>(&self, cpu: &mut Cpu, bus: &mut B, pc: u32, d: Decoded) -> Result<Step, Trap> {
        let a = cpu.regs.get(d.rs1);
        let b = cpu.regs.get(d.rs2);
        let (au, bu) = (a as u32, b as u32);
        let imm = d.imm;
        let addr = au.wrapping_add(imm as u32);
        let target = pc.wrapping_add(imm as u32);

        let result: Option<i32> = match d.op {
            Op::Lui => Some(imm),
            Op::Auipc => Some(target as i32),
            Op::Jal => {
                cpu.pc = target;
                Some(pc.wrapping_add(4) as i32)
            }
            Op::Jalr => {
                cpu.pc = addr & !1;
                Some(pc.wrapping_add(4) as i32)
            }

            Op::Beq | Op::Bne | Op::Blt | Op::Bge | Op::Bltu | Op::Bgeu => {
                let taken = match d.op {
                    Op::Beq => a == b,
                    Op::Bne => a != b,
                    Op::Blt => a < b,
                    Op::Bge => a >= b,
                    Op::Bltu => au < bu,
                    _ => au >= bu,
                };
                if taken {
                    cpu.pc = target;
                }
                None
            }

            Op::Lb => Some(bus.read_u8(addr).map_err(mem_fault(pc))? as i8 as i32),
            Op::Lh => Some(bus.read_u16(addr).map_err(mem_fault(pc))? as i16 as i32),
            Op::Lw => Some(bus.read_u32(addr).map_err(mem_fault(pc))? as i32),
            Op::Lbu => Some(bus.read_u8(addr).map_err(mem_fault(pc))? as i32),
            Op::Lhu => Some(bus.read_u16(addr).map_err(mem_fault(pc))? as i32),

            Op::Sb => {
                bus.write_u8(addr, bu as u8).map_err(mem_fault(pc))?;
                None
            }
            Op::Sh => {
                bus.write_u16(addr, bu as u16).map_err(mem_fault(pc))?;
                None
            }
            Op::Sw => {
                bus.write_u32(addr, bu).map_err(mem_fault(pc))?;
                None
            }

            Op::Addi => Some(a.wrapping_add(imm)),
            Op::Slti => Some((a < imm) as i32),
            Op::Sltiu => Some((au < imm as u32) as i32),
            Op::Xori => Some(a ^ imm),
            Op::Ori => Some(a | imm),
            Op::Andi => Some(a & imm),
            Op::Slli => Some((au << (imm & 31)) as i32),
            Op::Srli => Some((au >> (imm & 31)) as i32),
            Op::Srai => Some(a >> (imm & 31)),

            Op::Add => Some(a.wrapping_add(b)),
            Op::Sub => Some(a.wrapping_sub(b)),
            Op::Sll => Some((au << (bu & 31)) as i32),
            Op::Slt => Some((a < b) as i32),
            Op::Sltu => Some((au < bu) as i32),
            Op::Xor => Some(a ^ b),
            Op::Srl => Some((au >> (bu & 31)) as i32),
            Op::Sra => Some(a >> (bu & 31)),
            Op::Or => Some(a | b),
            Op::And => Some(a & b),

            Op::Mul => Some(a.wrapping_mul(b)),
            Op::Mulh => Some(((a as i64 * b as i64) >> 32) as i32),
            Op::Mulhsu => Some(((a as i64 * bu as i64) >> 32) as i32),
            Op::Mulhu => Some(((au as u64 * bu as u64) >> 32) as i32),
            Op::Div => Some(div(a, b)),
            Op::Divu => Some(au.checked_div(bu).unwrap_or(u32::MAX) as i32),
            Op::Rem => Some(rem(a, b)),
            Op::Remu => Some(au.checked_rem(bu).unwrap_or(au) as i32),

            Op::Fence => None,
            Op::Ecall => return Ok(Step::Ecall),
            Op::Ebreak => return Err(Trap::Breakpoint { pc }),
        };

        if let Some(value) = result {
            cpu.regs.set(d.rd, value);
        }
        Ok(Step::Retired)
    }
}
