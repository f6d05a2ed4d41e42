use pretty_assertions::assert_eq;
use std::io;

use rv32_rs::bits::sign_extend;
use rv32_rs::reg::x;
use rv32_rs::symbols::RelocKind;
use rv32_rs::{
    link, Assembler, CpuConfig, Diagnostic, HostOs, LinkConfig, Linked, Machine, RunOutcome,
};

fn cfg(base: u32) -> LinkConfig {
    LinkConfig {
        base,
        ..LinkConfig::default()
    }
}

fn linked(base: u32, build: impl FnOnce(&mut Assembler)) -> Linked {
    let mut asm = Assembler::new(base);
    build(&mut asm);
    link(asm.finish(), &cfg(base)).unwrap()
}

fn word(l: &mut Linked, addr: u32) -> u32 {
    l.space.peek_u32(addr).unwrap()
}

#[test]
fn forward_branch_matches_literal() {
    let mut sym = linked(0, |a| {
        a.beq(x(1), x(2), "label");
        a.nop();
        a.label("label");
        a.invalid();
    });
    let mut lit = linked(0, |a| a.beq(x(1), x(2), 8));
    assert!(sym.is_clean());
    assert_eq!(word(&mut sym, 0), word(&mut lit, 0));
}

#[test]
fn backward_jump_matches_literal() {
    let mut sym = linked(0x4000, |a| {
        a.label("top");
        a.zero(0x100);
        a.jal(x(1), "top");
    });
    let mut lit = linked(0x4000, |a| {
        a.zero(0x100);
        a.jal(x(1), -0x100);
    });
    assert_eq!(word(&mut sym, 0x4100), word(&mut lit, 0x4100));
}

/// `la` at `site`, target `gap` bytes after the pair; returns the patched pair.
fn pcrel_pair(gap: usize) -> (u32, u32, u32) {
    let mut l = linked(0, |a| {
        a.la(x(5), "target");
        a.invalid();
        a.zero(gap);
        a.label("target");
        a.invalid();
    });
    let target = l.symbols.address("target").unwrap();
    (word(&mut l, 0), word(&mut l, 4), target)
}

#[test]
fn hi_lo_reconstructs_target() {
    for gap in [0usize, 0x7F0, 0x7F4, 0x7F8, 0x800, 0xFF4, 0x1000, 0x17F4, 0x1804, 0x4_0000] {
        let (auipc, addi, target) = pcrel_pair(gap);
        let hi = auipc & 0xFFFF_F000;
        let lo = sign_extend(addi >> 20, 12);
        assert_eq!(hi.wrapping_add(lo as u32), target, "gap {gap:#x}");
    }
}

#[test]
fn hi_lo_bias_when_bit_11_is_set() {
    // target - site = 0x800 + 0xC: lo sign-extends negative, hi must round up
    let (auipc, addi, target) = pcrel_pair(0x800);
    assert_eq!(target, 0x80C);
    assert_eq!(auipc >> 12, 1);
    assert_eq!(sign_extend(addi >> 20, 12), -0x7F4);
}

#[test]
fn hi_lo_backwards() {
    let mut l = linked(0, |a| {
        a.label("buf");
        a.zero(0x900);
        a.la(x(6), "buf");
        a.invalid();
    });
    let (auipc, addi) = (word(&mut l, 0x900), word(&mut l, 0x904));
    let disp = (auipc & 0xFFFF_F000).wrapping_add(sign_extend(addi >> 20, 12) as u32) as i32;
    assert_eq!(disp, -0x900);
}

#[test]
fn pcrel_pair_executes() {
    let mut asm = Assembler::new(0x1000);
    asm.la(x(5), "value");
    asm.lw(x(6), x(5), 0);
    let hi = asm.pcrel_hi("value");
    asm.auipc(x(7), hi);
    asm.addi(x(8), x(0), 99);
    let lo = asm.pcrel_lo(8);
    asm.sw(x(8), x(7), lo);
    asm.invalid();
    asm.zero(0x9F0);
    asm.label("value");
    asm.word(1234);

    let l = link(asm.finish(), &cfg(0x1000)).unwrap();
    assert!(l.is_clean(), "{:?}", l.diagnostics);
    let value = l.symbols.address("value").unwrap();
    let mut m = Machine::from_linked(l, CpuConfig::default());
    let outcome = m.run(&mut HostOs::with_streams(io::empty(), io::sink(), io::sink()));
    assert_eq!(outcome, Ok(RunOutcome::Halted));
    assert_eq!(m.reg(x(5)) as u32, value);
    assert_eq!(m.reg(x(6)), 1234);
    assert_eq!(m.space.peek_u32(value).unwrap(), 99);
}

#[test]
fn absolute_word() {
    let mut l = linked(0x2000, |a| {
        a.word_ref("here");
        a.zero(12);
        a.label("here");
    });
    assert_eq!(word(&mut l, 0x2000), 0x2010);
}

#[test]
fn undefined_symbols_are_reported_and_linking_continues() {
    let mut l = linked(0, |a| {
        a.jal(x(1), "missing");
        a.bne(x(1), x(2), "end");
        a.word_ref("also_missing");
        a.label("end");
    });
    let diags: Vec<_> = l.diagnostics.iter().cloned().collect();
    assert_eq!(
        diags,
        vec![
            Diagnostic::UndefinedSymbol {
                name: "missing".into(),
                site: 0
            },
            Diagnostic::UndefinedSymbol {
                name: "also_missing".into(),
                site: 8
            },
        ]
    );
    // placeholder left alone, later relocation still applied
    assert_eq!(word(&mut l, 0), 0x0000_00EF);
    assert_eq!(word(&mut l, 8), 0);
    let mut lit = linked(0, |a| {
        a.nop();
        a.bne(x(1), x(2), 8);
    });
    assert_eq!(word(&mut l, 4), word(&mut lit, 4));
}

#[test]
fn lo_without_hi_is_reported() {
    let l = linked(0, |a| {
        a.nop();
        let lo = a.pcrel_lo(4);
        a.addi(x(5), x(5), lo);
    });
    let diags: Vec<_> = l.diagnostics.iter().cloned().collect();
    assert_eq!(diags, vec![Diagnostic::MissingHiPair { site: 4, anchor: 0 }]);
}

#[test]
fn duplicate_labels_keep_the_first() {
    let l = linked(0, |a| {
        a.label("twice");
        a.nop();
        a.label("twice");
    });
    let diags: Vec<_> = l.diagnostics.iter().cloned().collect();
    assert_eq!(
        diags,
        vec![Diagnostic::DuplicateSymbol {
            name: "twice".into(),
            address: 0
        }]
    );
    assert_eq!(l.symbols.address("twice"), Some(0));
}

#[test]
fn branch_out_of_range_is_reported() {
    let l = linked(0, |a| {
        a.beq(x(0), x(0), "far");
        a.zero(0x1000);
        a.label("far");
    });
    let diags: Vec<_> = l.diagnostics.iter().cloned().collect();
    assert_eq!(
        diags,
        vec![Diagnostic::OutOfRange {
            site: 0,
            kind: RelocKind::BranchPcRel,
            value: 0x1004
        }]
    );
}

#[test]
fn relocations_are_recorded_at_the_cursor() {
    let mut asm = Assembler::new(0x100);
    asm.nop();
    asm.jal(x(0), "a");
    asm.word_ref("b");
    let kinds: Vec<_> = asm
        .relocations()
        .iter()
        .map(|r| (r.site, r.kind, r.target.as_str()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (0x104, RelocKind::JumpPcRel, "a"),
            (0x108, RelocKind::AbsoluteWord32, "b"),
        ]
    );
}

#[test]
fn config_base_must_match_object() {
    let mut asm = Assembler::new(0x2000);
    asm.label("_start");
    asm.invalid();
    let mut l = link(asm.finish(), &cfg(0x8000)).unwrap();
    assert_eq!(
        l.diagnostics.iter().cloned().collect::<Vec<_>>(),
        vec![Diagnostic::BaseMismatch {
            object: 0x2000,
            config: 0x8000
        }]
    );
    // the image stays where it was assembled
    assert_eq!(l.base, 0x2000);
    assert_eq!(l.entry, 0x2000);
    assert_eq!(l.space.peek_u32(0x2000).unwrap(), 0);
}
