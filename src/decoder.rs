use serde::{Deserialize, Serialize};

use crate::instructions::InstrDesc;
use crate::reg::Reg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Lui,
    Auipc,
    Jal,
    Jalr,
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
    Sb,
    Sh,
    Sw,
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
    Fence,
    Ecall,
    Ebreak,
}

/// A decoded instruction word. Fields a format does not use are zero.
#[derive(Debug, Clone, Copy)]
pub struct Decoded {
    pub op: Op,
    pub desc: &'static InstrDesc,
    pub raw: u32,
    pub rd: Reg,
    pub rs1: Reg,
    pub rs2: Reg,
    /// Sign-extended immediate; U-type values are already shifted into place.
    pub imm: i32,
}

impl Decoded {
    pub fn mnemonic(&self) -> &'static str {
        self.desc.mnemonic
    }
}

pub trait Decoder {
    fn decode(&self, raw32: u32) -> Option<Decoded>;
}
