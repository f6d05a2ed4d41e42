//! Line-oriented assembly text front-end over [`Assembler`].
//!
//! One statement per line, optionally preceded by `label:` definitions.
//! `;` and `#` start a comment. Errors become [`Diagnostic::Syntax`] and the
//! next line is assembled as usual.

use std::collections::HashMap;

use crate::diag::Diagnostic;
use crate::encoder::{Assembler, Imm, Object, Target};
use crate::instructions::{self as ins, Format, InstrDesc};
use crate::reg::Reg;

type PResult<T> = Result<T, String>;

/// Assemble `source` for load address `base`.
pub fn assemble(source: &str, base: u32) -> Object {
    let mut p = Parser::new(base);
    for (i, line) in source.lines().enumerate() {
        if let Err(message) = p.line(line) {
            p.asm.report(Diagnostic::Syntax {
                line: i + 1,
                message,
            });
        }
    }
    p.asm.finish()
}

struct Parser {
    asm: Assembler,
    consts: HashMap<String, i64>,
}

fn strip_comment(line: &str) -> &str {
    let mut in_str = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_str => escaped = true,
            '"' => in_str = !in_str,
            ';' | '#' if !in_str => return &line[..i],
            _ => {}
        }
    }
    line
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
}

/// Split on commas that are not inside quotes or parentheses.
fn split_operands(s: &str) -> Vec<&str> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let (mut depth, mut in_str, mut escaped, mut start) = (0i32, false, false, 0);
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_str => escaped = true,
            '"' => in_str = !in_str,
            '(' if !in_str => depth += 1,
            ')' if !in_str => depth -= 1,
            ',' if !in_str && depth == 0 => {
                out.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(s[start..].trim());
    out
}

fn parse_num(s: &str) -> Option<i64> {
    let t = s.trim().replace('_', "");
    let (neg, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, t.strip_prefix('+').unwrap_or(&t).to_string()),
    };
    let v = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        t.parse::<i64>().ok()?
    };
    Some(if neg { -v } else { v })
}

fn reg(s: &str) -> PResult<Reg> {
    s.parse::<Reg>().map_err(|e| e.to_string())
}

fn expect(ops: &[&str], n: usize, usage: &str) -> PResult<()> {
    if ops.len() != n {
        return Err(format!("expected `{usage}`"));
    }
    Ok(())
}

/// `imm(reg)` split into its parts.
fn mem_operand(s: &str) -> Option<(&str, &str)> {
    let open = s.rfind('(')?;
    let inner = s[open + 1..].strip_suffix(')')?;
    Some((s[..open].trim(), inner.trim()))
}

fn parse_string(s: &str) -> PResult<Vec<u8>> {
    let inner = s
        .trim()
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .ok_or_else(|| format!("expected a quoted string, got `{s}`"))?;
    let mut out = Vec::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let e = chars.next().ok_or("dangling `\\` in string")?;
        out.push(match e {
            'n' => b'\n',
            't' => b'\t',
            'r' => b'\r',
            '0' => 0,
            '\\' => b'\\',
            '"' => b'"',
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                u8::from_str_radix(&hex, 16).map_err(|_| format!("bad escape `\\x{hex}`"))?
            }
            other => return Err(format!("unknown escape `\\{other}`")),
        });
    }
    Ok(out)
}

impl Parser {
    fn new(base: u32) -> Self {
        Self {
            asm: Assembler::new(base),
            consts: HashMap::new(),
        }
    }

    fn value(&self, s: &str) -> PResult<i64> {
        parse_num(s)
            .or_else(|| self.consts.get(s.trim()).copied())
            .ok_or_else(|| format!("bad number `{s}`"))
    }

    /// A value that fits 32 bits, signed or unsigned.
    fn value32(&self, s: &str) -> PResult<i32> {
        let v = self.value(s)?;
        i32::try_from(v)
            .or_else(|_| u32::try_from(v).map(|u| u as i32))
            .map_err(|_| format!("`{s}` does not fit 32 bits"))
    }

    fn imm(&mut self, s: &str) -> PResult<Imm> {
        let s = s.trim();
        if let Some(arg) = s.strip_prefix("%pcrel_hi(").and_then(|r| r.strip_suffix(')')) {
            let sym = arg.trim();
            if !is_ident(sym) {
                return Err(format!("bad symbol `{sym}`"));
            }
            return Ok(self.asm.pcrel_hi(sym));
        }
        if let Some(arg) = s.strip_prefix("%pcrel_lo(").and_then(|r| r.strip_suffix(')')) {
            let off = self.value(arg)?;
            let off = u32::try_from(off).map_err(|_| format!("bad %pcrel_lo offset `{arg}`"))?;
            return Ok(self.asm.pcrel_lo(off));
        }
        Ok(Imm::Value(self.value32(s)?))
    }

    fn target(&self, s: &str) -> PResult<Target> {
        let s = s.trim();
        if let Ok(v) = self.value32(s) {
            return Ok(Target::Offset(v));
        }
        if !is_ident(s) {
            return Err(format!("bad branch target `{s}`"));
        }
        Ok(Target::Label(s.to_string()))
    }

    /// `rd, imm(rs1)` or `rd, rs1, imm`.
    fn reg_mem(&mut self, ops: &[&str], usage: &str) -> PResult<(Reg, Reg, Imm)> {
        match ops {
            [r, m] => {
                let (off, base) = mem_operand(m).ok_or_else(|| format!("expected `{usage}`"))?;
                let off = if off.is_empty() { "0" } else { off };
                Ok((reg(r)?, reg(base)?, self.imm(off)?))
            }
            [r, base, off] => Ok((reg(r)?, reg(base)?, self.imm(off)?)),
            _ => Err(format!("expected `{usage}`")),
        }
    }

    fn line(&mut self, raw: &str) -> PResult<()> {
        let mut s = strip_comment(raw).trim();

        // leading labels
        while let Some(colon) = s.find(':') {
            let name = s[..colon].trim();
            if !is_ident(name) {
                break;
            }
            self.asm.label(name);
            s = s[colon + 1..].trim();
        }
        if s.is_empty() {
            return Ok(());
        }

        let (head, rest) = match s.find(char::is_whitespace) {
            Some(i) => (&s[..i], s[i..].trim()),
            None => (s, ""),
        };

        // `name equ value`
        if let Some(value) = rest
            .split_once(char::is_whitespace)
            .filter(|(kw, _)| kw.eq_ignore_ascii_case("equ"))
            .map(|(_, v)| v)
        {
            if !is_ident(head) {
                return Err(format!("bad constant name `{head}`"));
            }
            let v = self.value(value)?;
            self.consts.insert(head.to_string(), v);
            return Ok(());
        }

        let mn = head.to_ascii_lowercase();
        if mn.starts_with('.') {
            return self.directive(&mn, rest);
        }
        let ops = split_operands(rest);
        self.instruction(&mn, &ops)
    }

    fn directive(&mut self, name: &str, rest: &str) -> PResult<()> {
        let ops = split_operands(rest);
        match name {
            ".word" => {
                for op in ops {
                    match self.value32(op) {
                        Ok(v) => self.asm.word(v as u32),
                        Err(_) if is_ident(op) => self.asm.word_ref(op),
                        Err(e) => return Err(e),
                    }
                }
            }
            ".half" => {
                for op in ops {
                    let v = self.value(op)?;
                    if !(-0x8000..=0xFFFF).contains(&v) {
                        return Err(format!("`{op}` does not fit 16 bits"));
                    }
                    self.asm.bytes(&(v as u16).to_le_bytes());
                }
            }
            ".byte" => {
                for op in ops {
                    let v = self.value(op)?;
                    if !(-0x80..=0xFF).contains(&v) {
                        return Err(format!("`{op}` does not fit 8 bits"));
                    }
                    self.asm.bytes(&[v as u8]);
                }
            }
            ".ascii" | ".asciz" | ".string" => {
                let mut bytes = parse_string(rest)?;
                if name != ".ascii" {
                    bytes.push(0);
                }
                self.asm.bytes(&bytes);
            }
            ".zero" | ".space" => {
                expect(&ops, 1, ".zero n")?;
                let n = u64::try_from(self.value(ops[0])?)
                    .map_err(|_| "negative size".to_string())?;
                if n > self.asm.room() {
                    return Err(format!("{n} bytes run past the end of the address space"));
                }
                self.asm.zero(n as usize);
            }
            ".align" | ".p2align" => {
                expect(&ops, 1, ".align n")?;
                let n = self.value(ops[0])?;
                if !(0..=12).contains(&n) {
                    return Err(format!("alignment 2^{n} out of range"));
                }
                self.asm.align(1 << n);
            }
            ".balign" => {
                expect(&ops, 1, ".balign n")?;
                let n = self.value(ops[0])?;
                if n <= 0 || n > 4096 || (n & (n - 1)) != 0 {
                    return Err(format!("alignment {n} is not a power of two"));
                }
                self.asm.align(n as u32);
            }
            ".text" | ".data" | ".globl" | ".global" | ".section" => {}
            _ => return Err(format!("unknown directive `{name}`")),
        }
        Ok(())
    }

    fn instruction(&mut self, mn: &str, ops: &[&str]) -> PResult<()> {
        match mn {
            "invalid" => {
                expect(ops, 0, "invalid")?;
                self.asm.invalid();
            }
            "nop" => {
                expect(ops, 0, "nop")?;
                self.asm.nop();
            }
            "mv" => {
                expect(ops, 2, "mv rd, rs")?;
                self.asm.mv(reg(ops[0])?, reg(ops[1])?);
            }
            "li" => {
                expect(ops, 2, "li rd, value")?;
                let v = self.value32(ops[1])?;
                self.asm.li(reg(ops[0])?, v);
            }
            "la" => {
                expect(ops, 2, "la rd, symbol")?;
                if !is_ident(ops[1]) {
                    return Err(format!("bad symbol `{}`", ops[1]));
                }
                self.asm.la(reg(ops[0])?, ops[1]);
            }
            "call" => {
                expect(ops, 1, "call symbol")?;
                if !is_ident(ops[0]) {
                    return Err(format!("bad symbol `{}`", ops[0]));
                }
                self.asm.call(ops[0]);
            }
            "j" => {
                expect(ops, 1, "j target")?;
                let t = self.target(ops[0])?;
                self.asm.j(t);
            }
            "jr" => {
                expect(ops, 1, "jr rs")?;
                self.asm.jalr(Reg::ZERO, reg(ops[0])?, 0);
            }
            "ret" => {
                expect(ops, 0, "ret")?;
                self.asm.ret();
            }
            "beqz" | "bnez" => {
                expect(ops, 2, "beqz rs, target")?;
                let desc = if mn == "beqz" { &ins::BEQ } else { &ins::BNE };
                let t = self.target(ops[1])?;
                self.asm.emit_b(desc, reg(ops[0])?, Reg::ZERO, t);
            }
            _ => {
                let desc = ins::lookup(mn).ok_or_else(|| format!("unknown mnemonic `{mn}`"))?;
                self.table_instruction(desc, ops)?;
            }
        }
        Ok(())
    }

    fn table_instruction(&mut self, desc: &'static InstrDesc, ops: &[&str]) -> PResult<()> {
        let mn = desc.mnemonic;
        match desc.format {
            Format::R => {
                expect(ops, 3, &format!("{mn} rd, rs1, rs2"))?;
                self.asm.emit_r(desc, reg(ops[0])?, reg(ops[1])?, reg(ops[2])?);
            }
            Format::I if desc.opcode == ins::OPC_JALR && ops.len() == 1 => {
                self.asm.emit_i(desc, Reg::RA, reg(ops[0])?, 0);
            }
            Format::I if desc.opcode == ins::OPC_JALR => {
                let (rd, rs1, imm) = self.reg_mem(ops, "jalr rd, imm(rs1)")?;
                self.asm.emit_i(desc, rd, rs1, imm);
            }
            Format::I => {
                expect(ops, 3, &format!("{mn} rd, rs1, imm"))?;
                let (rd, rs1) = (reg(ops[0])?, reg(ops[1])?);
                let imm = self.imm(ops[2])?;
                self.asm.emit_i(desc, rd, rs1, imm);
            }
            Format::Load => {
                let (rd, rs1, imm) = self.reg_mem(ops, &format!("{mn} rd, imm(rs1)"))?;
                self.asm.emit_i(desc, rd, rs1, imm);
            }
            Format::Shift => {
                expect(ops, 3, &format!("{mn} rd, rs1, shamt"))?;
                let shamt = u32::try_from(self.value(ops[2])?)
                    .map_err(|_| format!("bad shift amount `{}`", ops[2]))?;
                self.asm.emit_shift(desc, reg(ops[0])?, reg(ops[1])?, shamt);
            }
            Format::S => {
                let (src, base, imm) = self.reg_mem(ops, &format!("{mn} rs2, imm(rs1)"))?;
                self.asm.emit_s(desc, src, base, imm);
            }
            Format::B => {
                expect(ops, 3, &format!("{mn} rs1, rs2, target"))?;
                let t = self.target(ops[2])?;
                self.asm.emit_b(desc, reg(ops[0])?, reg(ops[1])?, t);
            }
            Format::U => {
                expect(ops, 2, &format!("{mn} rd, imm"))?;
                let rd = reg(ops[0])?;
                let imm = self.imm(ops[1])?;
                self.asm.emit_u(desc, rd, imm);
            }
            Format::J => {
                let (rd, t) = match ops {
                    [t] => (Reg::RA, self.target(t)?),
                    [rd, t] => (reg(rd)?, self.target(t)?),
                    _ => return Err("expected `jal [rd,] target`".to_string()),
                };
                self.asm.emit_j(desc, rd, t);
            }
            // fence operands (pred/succ sets) are accepted and dropped
            Format::Fence => self.asm.emit_fixed(desc),
            Format::Sys => {
                expect(ops, 0, mn)?;
                self.asm.emit_fixed(desc);
            }
        }
        Ok(())
    }
}
