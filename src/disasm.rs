use crate::decoder::{Decoded, Decoder};
use crate::instructions::{Format, OPC_JALR};
use crate::reg::Reg;

pub fn fmt_decoded(d: &Decoded) -> String {
    let mn = d.mnemonic();
    match d.desc.format {
        Format::R => format!("{mn} {}, {}, {}", d.rd, d.rs1, d.rs2),
        Format::I if d.desc.opcode == OPC_JALR => mem(mn, d.rd, d.rs1, d.imm),
        Format::I | Format::Shift => format!("{mn} {}, {}, {}", d.rd, d.rs1, d.imm),
        Format::Load => mem(mn, d.rd, d.rs1, d.imm),
        Format::S => mem(mn, d.rs2, d.rs1, d.imm),
        Format::B => format!("{mn} {}, {}, {:+}", d.rs1, d.rs2, d.imm),
        Format::U => format!("{mn} {}, {:#x}", d.rd, (d.imm as u32) >> 12),
        Format::J => format!("{mn} {}, {:+}", d.rd, d.imm),
        Format::Sys | Format::Fence => mn.to_string(),
    }
}

fn mem(mn: &str, r: Reg, base: Reg, off: i32) -> String {
    format!("{mn} {r}, {off}({base})")
}

/// Text for any word: an instruction, the halt word, or raw data.
pub fn fmt_word<D: Decoder>(dec: &D, raw: u32) -> String {
    match dec.decode(raw) {
        Some(d) => fmt_decoded(&d),
        None if raw == 0 => "invalid".to_string(),
        None => format!(".word {raw:#010x}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Assembler;
    use crate::isa::rv32::Rv32Decoder;
    use crate::reg::x;

    fn render(build: impl FnOnce(&mut Assembler)) -> String {
        let mut asm = Assembler::new(0);
        build(&mut asm);
        let raw = u32::from_le_bytes(asm.image()[0..4].try_into().unwrap());
        fmt_word(&Rv32Decoder::new(), raw)
    }

    #[test]
    fn canonical_forms() {
        assert_eq!(render(|a| a.addi(x(2), x(0), 42)), "addi x2, x0, 42");
        assert_eq!(render(|a| a.beq(x(1), x(2), 8)), "beq x1, x2, +8");
        assert_eq!(render(|a| a.sb(x(4), x(5), 0x124)), "sb x4, 292(x5)");
        assert_eq!(render(|a| a.lw(x(1), x(2), -4)), "lw x1, -4(x2)");
        assert_eq!(render(|a| a.jal(x(1), -16)), "jal x1, -16");
        assert_eq!(render(|a| a.lui(x(3), 0x12345)), "lui x3, 0x12345");
        assert_eq!(render(|a| a.mul(x(17), x(21), x(31))), "mul x17, x21, x31");
        assert_eq!(render(|a| a.ecall()), "ecall");
        assert_eq!(render(|a| a.invalid()), "invalid");
        assert_eq!(render(|a| a.word(0xFFFF_FFFF)), ".word 0xffffffff");
    }
}
