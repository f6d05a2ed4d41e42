//! Instruction encoding and the assembly session.
//!
//! The `encode_*` functions are pure: descriptor plus operands in, word out.
//! [`Assembler`] appends those words to a growing image, binds labels, and
//! records a [`Relocation`] whenever an operand names a symbol instead of a
//! number. The placeholder displacement for such operands is zero.

use tracing::trace;

use crate::bits::{self, fits_signed, insert, insert_fields};
use crate::diag::{Diagnostic, Diagnostics};
use crate::instructions::{self as ins, InstrDesc};
use crate::reg::Reg;
use crate::symbols::{RelocKind, Relocation, SymbolTable};

/// Prefix of assembler-generated symbols; user labels may not start with it.
pub const LOCAL_PREFIX: char = '@';

#[inline]
fn regs(word: u32, rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    let w = insert(word, rd.num() as u32, 7, 5);
    let w = insert(w, rs1.num() as u32, 15, 5);
    insert(w, rs2.num() as u32, 20, 5)
}

pub fn encode_r(desc: &InstrDesc, rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    regs(desc.fixed_bits(), rd, rs1, rs2)
}

pub fn encode_i(desc: &InstrDesc, rd: Reg, rs1: Reg, imm: i32) -> u32 {
    insert_fields(regs(desc.fixed_bits(), rd, rs1, Reg::ZERO), imm as u32, bits::I_IMM)
}

pub fn encode_shift(desc: &InstrDesc, rd: Reg, rs1: Reg, shamt: u32) -> u32 {
    insert(regs(desc.fixed_bits(), rd, rs1, Reg::ZERO), shamt, 20, 5)
}

pub fn encode_s(desc: &InstrDesc, rs1: Reg, rs2: Reg, imm: i32) -> u32 {
    insert_fields(regs(desc.fixed_bits(), Reg::ZERO, rs1, rs2), imm as u32, bits::S_IMM)
}

/// `disp` is the byte displacement; bit 0 is dropped.
pub fn encode_b(desc: &InstrDesc, rs1: Reg, rs2: Reg, disp: i32) -> u32 {
    let word = regs(desc.fixed_bits(), Reg::ZERO, rs1, rs2);
    insert_fields(word, (disp >> 1) as u32, bits::B_IMM)
}

/// `imm20` lands in bits [31:12].
pub fn encode_u(desc: &InstrDesc, rd: Reg, imm20: u32) -> u32 {
    insert_fields(regs(desc.fixed_bits(), rd, Reg::ZERO, Reg::ZERO), imm20, bits::U_IMM)
}

/// `disp` is the byte displacement; bit 0 is dropped.
pub fn encode_j(desc: &InstrDesc, rd: Reg, disp: i32) -> u32 {
    let word = regs(desc.fixed_bits(), rd, Reg::ZERO, Reg::ZERO);
    insert_fields(word, (disp >> 1) as u32, bits::J_IMM)
}

/// Split a PC-relative displacement into `auipc` and follow-on immediates
/// such that `(hi20 << 12) + sign_extend(lo12) == disp`.
pub fn split_pcrel(disp: i32) -> (u32, i32) {
    let hi20 = (disp.wrapping_add(0x800) as u32) >> 12;
    let lo12 = bits::sign_extend(disp as u32, 12);
    (hi20, lo12)
}

/// Immediate operand of I/S/U-type instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Imm {
    Value(i32),
    /// Upper part of `symbol - site` (for `auipc`/`lui`).
    PcrelHi(String),
    /// Lower part; names the local symbol anchored at the paired `auipc`.
    PcrelLo(String),
}

impl From<i32> for Imm {
    fn from(v: i32) -> Self {
        Imm::Value(v)
    }
}

/// Branch or jump destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Byte displacement from the instruction.
    Offset(i32),
    Label(String),
}

impl From<i32> for Target {
    fn from(v: i32) -> Self {
        Target::Offset(v)
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::Label(s.to_string())
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::Label(s)
    }
}

/// Output of an assembly session, consumed by the linker.
#[derive(Debug, Clone)]
pub struct Object {
    pub base: u32,
    pub image: Vec<u8>,
    pub symbols: SymbolTable,
    pub relocations: Vec<Relocation>,
    pub diagnostics: Diagnostics,
}

/// One assembly session: write cursor, image, symbols, relocations.
#[derive(Debug, Clone)]
pub struct Assembler {
    base: u32,
    image: Vec<u8>,
    symbols: SymbolTable,
    relocations: Vec<Relocation>,
    diagnostics: Diagnostics,
    next_local: u32,
}

macro_rules! r_ops {
    ($($name:ident => $desc:ident),* $(,)?) => {$(
        pub fn $name(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
            self.emit_r(&ins::$desc, rd, rs1, rs2)
        }
    )*};
}

macro_rules! i_ops {
    ($($name:ident => $desc:ident),* $(,)?) => {$(
        pub fn $name(&mut self, rd: Reg, rs1: Reg, imm: impl Into<Imm>) {
            self.emit_i(&ins::$desc, rd, rs1, imm)
        }
    )*};
}

macro_rules! shift_ops {
    ($($name:ident => $desc:ident),* $(,)?) => {$(
        pub fn $name(&mut self, rd: Reg, rs1: Reg, shamt: u32) {
            self.emit_shift(&ins::$desc, rd, rs1, shamt)
        }
    )*};
}

macro_rules! store_ops {
    ($($name:ident => $desc:ident),* $(,)?) => {$(
        /// Store `src` to `base + imm`.
        pub fn $name(&mut self, src: Reg, base: Reg, imm: impl Into<Imm>) {
            self.emit_s(&ins::$desc, src, base, imm)
        }
    )*};
}

macro_rules! branch_ops {
    ($($name:ident => $desc:ident),* $(,)?) => {$(
        pub fn $name(&mut self, rs1: Reg, rs2: Reg, target: impl Into<Target>) {
            self.emit_b(&ins::$desc, rs1, rs2, target)
        }
    )*};
}

impl Assembler {
    pub fn new(base: u32) -> Self {
        Self {
            base,
            image: Vec::new(),
            symbols: SymbolTable::new(),
            relocations: Vec::new(),
            diagnostics: Diagnostics::new(),
            next_local: 0,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Address the next emitted byte will occupy.
    pub fn cursor(&self) -> u32 {
        self.base.wrapping_add(self.image.len() as u32)
    }

    /// Bytes left before the cursor runs off the end of the 32-bit address space.
    pub fn room(&self) -> u64 {
        (1u64 << 32).saturating_sub(self.base as u64 + self.image.len() as u64)
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn report(&mut self, d: Diagnostic) {
        self.diagnostics.report(d);
    }

    /// Bind `name` to the cursor. Duplicates are reported and ignored.
    pub fn label(&mut self, name: &str) {
        if name.starts_with(LOCAL_PREFIX) {
            self.report(Diagnostic::BadOperand {
                site: self.cursor(),
                message: format!("label `{name}` uses the reserved `{LOCAL_PREFIX}` prefix"),
            });
            return;
        }
        self.define(name, self.cursor(), false);
    }

    /// Bind `name` to an arbitrary address (e.g. `equ` constants used as targets).
    pub fn define(&mut self, name: &str, address: u32, local: bool) {
        if let Err(crate::symbols::SymbolError::Duplicate { name, address }) =
            self.symbols.add(name, address, local)
        {
            self.report(Diagnostic::DuplicateSymbol { name, address });
        }
    }

    fn record(&mut self, kind: RelocKind, target: &str) {
        trace!(site = self.cursor(), ?kind, symbol = target, "record relocation");
        self.relocations.push(Relocation {
            site: self.cursor(),
            kind,
            target: target.to_string(),
        });
    }

    fn push_word(&mut self, word: u32) {
        self.image.extend_from_slice(&word.to_le_bytes());
    }

    fn check_imm(&mut self, value: i64, bits: u32) {
        if !fits_signed(value, bits) {
            self.report(Diagnostic::ImmediateRange {
                site: self.cursor(),
                value,
                bits,
            });
        }
    }

    /// Hi half of a PC-relative pair targeting `symbol`; anchor it on an `auipc`.
    pub fn pcrel_hi(&self, symbol: &str) -> Imm {
        Imm::PcrelHi(symbol.to_string())
    }

    /// Lo half of a PC-relative pair whose `auipc` sits `offset_to_hi` bytes
    /// before the cursor. Creates the local anchor symbol the linker uses to
    /// find the paired hi relocation.
    pub fn pcrel_lo(&mut self, offset_to_hi: u32) -> Imm {
        let anchor = self.cursor().wrapping_sub(offset_to_hi);
        let name = loop {
            let candidate = format!("{LOCAL_PREFIX}pcrel_hi{}", self.next_local);
            self.next_local += 1;
            if !self.symbols.contains(&candidate) {
                break candidate;
            }
        };
        self.define(&name, anchor, true);
        Imm::PcrelLo(name)
    }

    /// Resolve a 12-bit immediate operand, recording a relocation if symbolic.
    fn low_imm(&mut self, imm: Imm) -> i32 {
        match imm {
            Imm::Value(v) => {
                self.check_imm(v as i64, 12);
                v
            }
            Imm::PcrelLo(anchor) => {
                self.record(RelocKind::LoPcRel12, &anchor);
                0
            }
            Imm::PcrelHi(sym) => {
                self.report(Diagnostic::BadOperand {
                    site: self.cursor(),
                    message: format!("%pcrel_hi({sym}) needs a U-type instruction"),
                });
                0
            }
        }
    }

    fn displacement(&mut self, target: Target, kind: RelocKind, bits: u32) -> i32 {
        match target {
            Target::Offset(disp) => {
                if disp & 1 != 0 || !fits_signed(disp as i64, bits) {
                    self.report(Diagnostic::OutOfRange {
                        site: self.cursor(),
                        kind,
                        value: disp as i64,
                    });
                }
                disp
            }
            Target::Label(name) => {
                self.record(kind, &name);
                0
            }
        }
    }

    pub fn emit_r(&mut self, desc: &InstrDesc, rd: Reg, rs1: Reg, rs2: Reg) {
        self.push_word(encode_r(desc, rd, rs1, rs2));
    }

    pub fn emit_i(&mut self, desc: &InstrDesc, rd: Reg, rs1: Reg, imm: impl Into<Imm>) {
        let imm = self.low_imm(imm.into());
        self.push_word(encode_i(desc, rd, rs1, imm));
    }

    pub fn emit_shift(&mut self, desc: &InstrDesc, rd: Reg, rs1: Reg, shamt: u32) {
        if shamt >= 32 {
            self.report(Diagnostic::ImmediateRange {
                site: self.cursor(),
                value: shamt as i64,
                bits: 5,
            });
        }
        self.push_word(encode_shift(desc, rd, rs1, shamt));
    }

    pub fn emit_s(&mut self, desc: &InstrDesc, src: Reg, base: Reg, imm: impl Into<Imm>) {
        let imm = self.low_imm(imm.into());
        self.push_word(encode_s(desc, base, src, imm));
    }

    pub fn emit_b(&mut self, desc: &InstrDesc, rs1: Reg, rs2: Reg, target: impl Into<Target>) {
        let disp = self.displacement(target.into(), RelocKind::BranchPcRel, 13);
        self.push_word(encode_b(desc, rs1, rs2, disp));
    }

    pub fn emit_u(&mut self, desc: &InstrDesc, rd: Reg, imm: impl Into<Imm>) {
        let imm20 = match imm.into() {
            Imm::Value(v) => {
                if !(-(1 << 19)..(1 << 20)).contains(&v) {
                    self.report(Diagnostic::ImmediateRange {
                        site: self.cursor(),
                        value: v as i64,
                        bits: 20,
                    });
                }
                v as u32
            }
            Imm::PcrelHi(sym) => {
                self.record(RelocKind::HiPcRel20, &sym);
                0
            }
            Imm::PcrelLo(anchor) => {
                self.report(Diagnostic::BadOperand {
                    site: self.cursor(),
                    message: format!(
                        "%pcrel_lo anchor `{anchor}` needs an I- or S-type instruction"
                    ),
                });
                0
            }
        };
        self.push_word(encode_u(desc, rd, imm20));
    }

    pub fn emit_j(&mut self, desc: &InstrDesc, rd: Reg, target: impl Into<Target>) {
        let disp = self.displacement(target.into(), RelocKind::JumpPcRel, 21);
        self.push_word(encode_j(desc, rd, disp));
    }

    pub fn emit_fixed(&mut self, desc: &InstrDesc) {
        self.push_word(desc.fixed_bits());
    }

    r_ops! {
        add => ADD, sub => SUB, sll => SLL, slt => SLT, sltu => SLTU,
        xor => XOR, srl => SRL, sra => SRA, or => OR, and => AND,
        mul => MUL, mulh => MULH, mulhsu => MULHSU, mulhu => MULHU,
        div => DIV, divu => DIVU, rem => REM, remu => REMU,
    }

    i_ops! {
        addi => ADDI, slti => SLTI, sltiu => SLTIU, xori => XORI, ori => ORI, andi => ANDI,
        jalr => JALR,
        lb => LB, lh => LH, lw => LW, lbu => LBU, lhu => LHU,
    }

    shift_ops! { slli => SLLI, srli => SRLI, srai => SRAI }

    store_ops! { sb => SB, sh => SH, sw => SW }

    branch_ops! {
        beq => BEQ, bne => BNE, blt => BLT, bge => BGE, bltu => BLTU, bgeu => BGEU,
    }

    pub fn lui(&mut self, rd: Reg, imm: impl Into<Imm>) {
        self.emit_u(&ins::LUI, rd, imm)
    }

    pub fn auipc(&mut self, rd: Reg, imm: impl Into<Imm>) {
        self.emit_u(&ins::AUIPC, rd, imm)
    }

    pub fn jal(&mut self, rd: Reg, target: impl Into<Target>) {
        self.emit_j(&ins::JAL, rd, target)
    }

    pub fn ecall(&mut self) {
        self.emit_fixed(&ins::ECALL)
    }

    pub fn ebreak(&mut self) {
        self.emit_fixed(&ins::EBREAK)
    }

    pub fn fence(&mut self) {
        self.emit_fixed(&ins::FENCE)
    }

    /// The zero word; execution halts when it is fetched.
    pub fn invalid(&mut self) {
        self.push_word(0);
    }

    // pseudo-instructions

    pub fn nop(&mut self) {
        self.addi(Reg::ZERO, Reg::ZERO, 0)
    }

    pub fn mv(&mut self, rd: Reg, rs: Reg) {
        self.addi(rd, rs, 0)
    }

    /// Load a 32-bit constant in one or two instructions.
    pub fn li(&mut self, rd: Reg, value: i32) {
        if fits_signed(value as i64, 12) {
            return self.addi(rd, Reg::ZERO, value);
        }
        let (hi20, lo12) = split_pcrel(value);
        self.lui(rd, (hi20 & 0xF_FFFF) as i32);
        if lo12 != 0 {
            self.addi(rd, rd, lo12);
        }
    }

    pub fn j(&mut self, target: impl Into<Target>) {
        self.jal(Reg::ZERO, target)
    }

    pub fn ret(&mut self) {
        self.jalr(Reg::ZERO, Reg::RA, 0)
    }

    /// `auipc rd, %pcrel_hi(symbol)` + `addi rd, rd, %pcrel_lo`.
    pub fn la(&mut self, rd: Reg, symbol: &str) {
        let hi = self.pcrel_hi(symbol);
        self.auipc(rd, hi);
        let lo = self.pcrel_lo(4);
        self.addi(rd, rd, lo);
    }

    /// `auipc ra, %pcrel_hi(symbol)` + `jalr ra, ra, %pcrel_lo`.
    pub fn call(&mut self, symbol: &str) {
        let hi = self.pcrel_hi(symbol);
        self.auipc(Reg::RA, hi);
        let lo = self.pcrel_lo(4);
        self.jalr(Reg::RA, Reg::RA, lo);
    }

    // data

    pub fn bytes(&mut self, data: &[u8]) {
        self.image.extend_from_slice(data);
    }

    pub fn word(&mut self, value: u32) {
        self.push_word(value);
    }

    /// A word holding the absolute address of `symbol`.
    pub fn word_ref(&mut self, symbol: &str) {
        self.record(RelocKind::AbsoluteWord32, symbol);
        self.push_word(0);
    }

    /// Append `len` zero bytes. A run past the end of the address space is
    /// reported and nothing is emitted.
    pub fn zero(&mut self, len: usize) {
        if len as u64 > self.room() {
            self.report(Diagnostic::BadOperand {
                site: self.cursor(),
                message: format!("{len} zero bytes do not fit below 4 GiB"),
            });
            return;
        }
        self.image.resize(self.image.len() + len, 0);
    }

    /// Pad with zeros until the cursor is a multiple of `align` (a power of two).
    pub fn align(&mut self, align: u32) {
        if align > 1 {
            let pad = (align - self.cursor() % align) % align;
            self.zero(pad as usize);
        }
    }

    pub fn finish(self) -> Object {
        Object {
            base: self.base,
            image: self.image,
            symbols: self.symbols,
            relocations: self.relocations,
            diagnostics: self.diagnostics,
        }
    }
}
