use std::collections::HashMap;

use crate::bits::{self, extract, extract_fields_signed};
use crate::decoder::{Decoded, Decoder};
use crate::instructions::{
    Format, InstrDesc, OPC_AUIPC, OPC_JAL, OPC_LUI, OPC_OP, OPC_OP_IMM, OPC_SYSTEM, TABLE,
};
use crate::reg::Reg;

/// RV32IM decoder.
///
/// Dispatch is a single lookup keyed by `(opcode, funct3, ext)` built from
/// the same table the encoder uses, so the two cannot drift apart.
pub struct Rv32Decoder {
    table: HashMap<(u8, u8, u16), &'static InstrDesc>,
}

impl Default for Rv32Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Rv32Decoder {
    pub fn new() -> Self {
        Self {
            table: TABLE.iter().map(|d| (d.key(), d)).collect(),
        }
    }

    fn key(raw: u32) -> (u8, u8, u16) {
        let opcode = extract(raw, 0, 7) as u8;
        let funct3 = extract(raw, 12, 3) as u8;
        let funct7 = extract(raw, 25, 7) as u16;
        match opcode {
            OPC_LUI | OPC_AUIPC | OPC_JAL => (opcode, 0, 0),
            OPC_OP => (opcode, funct3, funct7),
            OPC_OP_IMM if funct3 == 0b001 || funct3 == 0b101 => (opcode, funct3, funct7),
            OPC_SYSTEM => (opcode, funct3, extract(raw, 20, 12) as u16),
            _ => (opcode, funct3, 0),
        }
    }
}

impl Decoder for Rv32Decoder {
    fn decode(&self, raw32: u32) -> Option<Decoded> {
        let desc = *self.table.get(&Self::key(raw32))?;
        let rd = Reg::from_field(extract(raw32, 7, 5));
        let rs1 = Reg::from_field(extract(raw32, 15, 5));
        let rs2 = Reg::from_field(extract(raw32, 20, 5));
        let z = Reg::ZERO;

        let (rd, rs1, rs2, imm) = match desc.format {
            Format::R => (rd, rs1, rs2, 0),
            Format::I | Format::Load => (rd, rs1, z, extract_fields_signed(raw32, bits::I_IMM)),
            Format::Shift => (rd, rs1, z, extract(raw32, 20, 5) as i32),
            Format::S => (z, rs1, rs2, extract_fields_signed(raw32, bits::S_IMM)),
            Format::B => (z, rs1, rs2, extract_fields_signed(raw32, bits::B_IMM) << 1),
            Format::U => (rd, z, z, (raw32 & 0xFFFF_F000) as i32),
            Format::J => (rd, z, z, extract_fields_signed(raw32, bits::J_IMM) << 1),
            // ecall/ebreak must have rd and rs1 zero
            Format::Sys => {
                if !rd.is_zero() || !rs1.is_zero() {
                    return None;
                }
                (z, z, z, 0)
            }
            Format::Fence => (z, z, z, 0),
        };

        Some(Decoded {
            op: desc.op,
            desc,
            raw: raw32,
            rd,
            rs1,
            rs2,
            imm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Op;

    #[test]
    fn decode_addi_negative() {
        let dec = Rv32Decoder::new();
        // slti x17, x21, -2
        let d = dec.decode(0b111111111110_10101_010_10001_0010011).unwrap();
        assert_eq!(d.op, Op::Slti);
        assert_eq!(d.rd, Reg::new(17));
        assert_eq!(d.rs1, Reg::new(21));
        assert_eq!(d.imm, -2);
    }

    #[test]
    fn decode_mul_vs_add() {
        let dec = Rv32Decoder::new();
        let mul = dec.decode(0b0000001_11111_10101_000_10001_0110011).unwrap();
        assert_eq!(mul.op, Op::Mul);
        assert_eq!(mul.rs2, Reg::new(31));
        let add = dec.decode(0b0000000_11111_10101_000_10001_0110011).unwrap();
        assert_eq!(add.op, Op::Add);
        let sub = dec.decode(0b0100000_11111_10101_000_10001_0110011).unwrap();
        assert_eq!(sub.op, Op::Sub);
    }

    #[test]
    fn decode_rejects_unknown() {
        let dec = Rv32Decoder::new();
        assert!(dec.decode(0).is_none());
        // funct7 = 0b0000010 is not an RV32IM op
        assert!(dec.decode(0b0000010_00001_00010_000_00011_0110011).is_none());
        // fence.i (funct3 = 1)
        assert!(dec.decode(0x0000_100F).is_none());
        // flw from the F extension
        assert!(dec.decode(0x0000_2007).is_none());
    }

    #[test]
    fn decode_system() {
        let dec = Rv32Decoder::new();
        assert_eq!(dec.decode(0x0000_0073).unwrap().op, Op::Ecall);
        assert_eq!(dec.decode(0x0010_0073).unwrap().op, Op::Ebreak);
        assert!(dec.decode(0x0020_0073).is_none());
    }
}
