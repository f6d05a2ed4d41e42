use crate::decoder::Op;

/// Operand layout of a 32-bit instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    R,
    /// Register-immediate arithmetic and `jalr`.
    I,
    /// I layout, memory load.
    Load,
    /// I layout with a 5-bit shift amount and funct7 in imm[11:5].
    Shift,
    S,
    B,
    U,
    J,
    /// `ecall`/`ebreak`: all fields fixed except imm[11:0].
    Sys,
    /// `fence`: accepted and ignored.
    Fence,
}

#[derive(Debug, Clone, Copy)]
pub struct InstrDesc {
    pub op: Op,
    pub mnemonic: &'static str,
    pub format: Format,
    pub opcode: u8,
    pub funct3: u8,
    /// funct7 for R and Shift, imm[11:0] for Sys, otherwise 0.
    pub ext: u16,
}

impl InstrDesc {
    /// The `(opcode, funct3, ext)` triple the decoder dispatches on.
    pub const fn key(&self) -> (u8, u8, u16) {
        (self.opcode, self.funct3, self.ext)
    }

    /// Opcode and function bits with all operand fields zero.
    pub const fn fixed_bits(&self) -> u32 {
        let base = self.opcode as u32;
        match self.format {
            Format::U | Format::J => base,
            Format::R | Format::Shift => {
                base | ((self.funct3 as u32) << 12) | ((self.ext as u32) << 25)
            }
            Format::Sys => base | ((self.funct3 as u32) << 12) | ((self.ext as u32) << 20),
            _ => base | ((self.funct3 as u32) << 12),
        }
    }
}

pub const OPC_LOAD: u8 = 0b000_0011;
pub const OPC_MISC_MEM: u8 = 0b000_1111;
pub const OPC_OP_IMM: u8 = 0b001_0011;
pub const OPC_AUIPC: u8 = 0b001_0111;
pub const OPC_STORE: u8 = 0b010_0011;
pub const OPC_OP: u8 = 0b011_0011;
pub const OPC_LUI: u8 = 0b011_0111;
pub const OPC_BRANCH: u8 = 0b110_0011;
pub const OPC_JALR: u8 = 0b110_0111;
pub const OPC_JAL: u8 = 0b110_1111;
pub const OPC_SYSTEM: u8 = 0b111_0011;

const fn d(
    op: Op,
    mnemonic: &'static str,
    format: Format,
    opcode: u8,
    funct3: u8,
    ext: u16,
) -> InstrDesc {
    InstrDesc { op, mnemonic, format, opcode, funct3, ext }
}

pub const LUI: InstrDesc = d(Op::Lui, "lui", Format::U, OPC_LUI, 0, 0);
pub const AUIPC: InstrDesc = d(Op::Auipc, "auipc", Format::U, OPC_AUIPC, 0, 0);
pub const JAL: InstrDesc = d(Op::Jal, "jal", Format::J, OPC_JAL, 0, 0);
pub const JALR: InstrDesc = d(Op::Jalr, "jalr", Format::I, OPC_JALR, 0, 0);

pub const BEQ: InstrDesc = d(Op::Beq, "beq", Format::B, OPC_BRANCH, 0b000, 0);
pub const BNE: InstrDesc = d(Op::Bne, "bne", Format::B, OPC_BRANCH, 0b001, 0);
pub const BLT: InstrDesc = d(Op::Blt, "blt", Format::B, OPC_BRANCH, 0b100, 0);
pub const BGE: InstrDesc = d(Op::Bge, "bge", Format::B, OPC_BRANCH, 0b101, 0);
pub const BLTU: InstrDesc = d(Op::Bltu, "bltu", Format::B, OPC_BRANCH, 0b110, 0);
pub const BGEU: InstrDesc = d(Op::Bgeu, "bgeu", Format::B, OPC_BRANCH, 0b111, 0);

pub const LB: InstrDesc = d(Op::Lb, "lb", Format::Load, OPC_LOAD, 0b000, 0);
pub const LH: InstrDesc = d(Op::Lh, "lh", Format::Load, OPC_LOAD, 0b001, 0);
pub const LW: InstrDesc = d(Op::Lw, "lw", Format::Load, OPC_LOAD, 0b010, 0);
pub const LBU: InstrDesc = d(Op::Lbu, "lbu", Format::Load, OPC_LOAD, 0b100, 0);
pub const LHU: InstrDesc = d(Op::Lhu, "lhu", Format::Load, OPC_LOAD, 0b101, 0);

pub const SB: InstrDesc = d(Op::Sb, "sb", Format::S, OPC_STORE, 0b000, 0);
pub const SH: InstrDesc = d(Op::Sh, "sh", Format::S, OPC_STORE, 0b001, 0);
pub const SW: InstrDesc = d(Op::Sw, "sw", Format::S, OPC_STORE, 0b010, 0);

pub const ADDI: InstrDesc = d(Op::Addi, "addi", Format::I, OPC_OP_IMM, 0b000, 0);
pub const SLTI: InstrDesc = d(Op::Slti, "slti", Format::I, OPC_OP_IMM, 0b010, 0);
pub const SLTIU: InstrDesc = d(Op::Sltiu, "sltiu", Format::I, OPC_OP_IMM, 0b011, 0);
pub const XORI: InstrDesc = d(Op::Xori, "xori", Format::I, OPC_OP_IMM, 0b100, 0);
pub const ORI: InstrDesc = d(Op::Ori, "ori", Format::I, OPC_OP_IMM, 0b110, 0);
pub const ANDI: InstrDesc = d(Op::Andi, "andi", Format::I, OPC_OP_IMM, 0b111, 0);
pub const SLLI: InstrDesc = d(Op::Slli, "slli", Format::Shift, OPC_OP_IMM, 0b001, 0b000_0000);
pub const SRLI: InstrDesc = d(Op::Srli, "srli", Format::Shift, OPC_OP_IMM, 0b101, 0b000_0000);
pub const SRAI: InstrDesc = d(Op::Srai, "srai", Format::Shift, OPC_OP_IMM, 0b101, 0b010_0000);

pub const ADD: InstrDesc = d(Op::Add, "add", Format::R, OPC_OP, 0b000, 0b000_0000);
pub const SUB: InstrDesc = d(Op::Sub, "sub", Format::R, OPC_OP, 0b000, 0b010_0000);
pub const SLL: InstrDesc = d(Op::Sll, "sll", Format::R, OPC_OP, 0b001, 0b000_0000);
pub const SLT: InstrDesc = d(Op::Slt, "slt", Format::R, OPC_OP, 0b010, 0b000_0000);
pub const SLTU: InstrDesc = d(Op::Sltu, "sltu", Format::R, OPC_OP, 0b011, 0b000_0000);
pub const XOR: InstrDesc = d(Op::Xor, "xor", Format::R, OPC_OP, 0b100, 0b000_0000);
pub const SRL: InstrDesc = d(Op::Srl, "srl", Format::R, OPC_OP, 0b101, 0b000_0000);
pub const SRA: InstrDesc = d(Op::Sra, "sra", Format::R, OPC_OP, 0b101, 0b010_0000);
pub const OR: InstrDesc = d(Op::Or, "or", Format::R, OPC_OP, 0b110, 0b000_0000);
pub const AND: InstrDesc = d(Op::And, "and", Format::R, OPC_OP, 0b111, 0b000_0000);

pub const MUL: InstrDesc = d(Op::Mul, "mul", Format::R, OPC_OP, 0b000, 0b000_0001);
pub const MULH: InstrDesc = d(Op::Mulh, "mulh", Format::R, OPC_OP, 0b001, 0b000_0001);
pub const MULHSU: InstrDesc = d(Op::Mulhsu, "mulhsu", Format::R, OPC_OP, 0b010, 0b000_0001);
pub const MULHU: InstrDesc = d(Op::Mulhu, "mulhu", Format::R, OPC_OP, 0b011, 0b000_0001);
pub const DIV: InstrDesc = d(Op::Div, "div", Format::R, OPC_OP, 0b100, 0b000_0001);
pub const DIVU: InstrDesc = d(Op::Divu, "divu", Format::R, OPC_OP, 0b101, 0b000_0001);
pub const REM: InstrDesc = d(Op::Rem, "rem", Format::R, OPC_OP, 0b110, 0b000_0001);
pub const REMU: InstrDesc = d(Op::Remu, "remu", Format::R, OPC_OP, 0b111, 0b000_0001);

pub const FENCE: InstrDesc = d(Op::Fence, "fence", Format::Fence, OPC_MISC_MEM, 0b000, 0);
pub const ECALL: InstrDesc = d(Op::Ecall, "ecall", Format::Sys, OPC_SYSTEM, 0, 0);
pub const EBREAK: InstrDesc = d(Op::Ebreak, "ebreak", Format::Sys, OPC_SYSTEM, 0, 1);

pub static TABLE: &[InstrDesc] = &[
    LUI, AUIPC, JAL, JALR, BEQ, BNE, BLT, BGE, BLTU, BGEU, LB, LH, LW, LBU, LHU, SB, SH, SW, ADDI,
    SLTI, SLTIU, XORI, ORI, ANDI, SLLI, SRLI, SRAI, ADD, SUB, SLL, SLT, SLTU, XOR, SRL, SRA, OR,
    AND, MUL, MULH, MULHSU, MULHU, DIV, DIVU, REM, REMU, FENCE, ECALL, EBREAK,
];

pub fn lookup(mnemonic: &str) -> Option<&'static InstrDesc> {
    TABLE.iter().find(|d| d.mnemonic.eq_ignore_ascii_case(mnemonic))
}
