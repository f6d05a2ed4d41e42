use pretty_assertions::assert_eq;
use std::io;

use rv32_rs::reg::x;
use rv32_rs::{
    assemble, link, Assembler, CpuConfig, Diagnostic, HostOs, LinkConfig, Machine, Reg,
    RunOutcome,
};

fn words(image: &[u8]) -> Vec<u32> {
    image
        .chunks(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn syntax_lines(diags: &rv32_rs::Diagnostics) -> Vec<usize> {
    diags
        .iter()
        .filter_map(|d| match d {
            Diagnostic::Syntax { line, .. } => Some(*line),
            _ => None,
        })
        .collect()
}

#[test]
fn text_matches_builder() {
    let obj = assemble(
        "
        mul x17, x21, x31
        sb x4, 0x124(x5)
        sb x4, x5, 0x124
        slti a7, s5, -2
        lw ra, 0(sp)
        beq x1, x2, 8
        jal 0x800
        lui t0, 0x12345
        srai x1, x2, 3
        ecall
        invalid
        ",
        0,
    );
    assert!(obj.diagnostics.is_empty(), "{:?}", obj.diagnostics);

    let mut a = Assembler::new(0);
    a.mul(x(17), x(21), x(31));
    a.sb(x(4), x(5), 0x124);
    a.sb(x(4), x(5), 0x124);
    a.slti(Reg::A7, Reg::S5, -2);
    a.lw(Reg::RA, Reg::SP, 0);
    a.beq(x(1), x(2), 8);
    a.jal(Reg::RA, 0x800);
    a.lui(Reg::T0, 0x12345);
    a.srai(x(1), x(2), 3);
    a.ecall();
    a.invalid();
    assert_eq!(words(&obj.image), words(a.image()));
}

#[test]
fn labels_and_pseudo_instructions() {
    let src = r#"
        ; say hi through the write syscall
        STDOUT equ 1
        _start:
            li a7, 1            # write
            li a0, STDOUT
            la a1, msg
            li a2, 3
            ecall
            call done
            invalid
        done:   li a7, 0
                li a0, 0x2A
                ecall
        msg: .asciz "hi\n"
    "#;
    let obj = assemble(src, 0x1000);
    assert!(obj.diagnostics.is_empty(), "{:?}", obj.diagnostics);
    assert_eq!(obj.symbols.address("_start"), Some(0x1000));
    assert_eq!(obj.symbols.address("done"), Some(0x1000 + 4 * 9));
    let msg = obj.symbols.address("msg").unwrap() as usize - 0x1000;
    assert_eq!(&obj.image[msg..], b"hi\n\0");

    let linked = link(obj, &LinkConfig { base: 0x1000, ..LinkConfig::default() }).unwrap();
    assert!(linked.is_clean());
    let mut m = Machine::from_linked(linked, CpuConfig::default());
    let out = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let mut os = HostOs::with_streams(io::empty(), Shared(out.clone()), io::sink());
    assert_eq!(m.run(&mut os), Ok(RunOutcome::Exited(42)));
    assert_eq!(out.borrow().as_slice(), b"hi\n");
}

struct Shared(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

impl io::Write for Shared {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn explicit_pcrel_operators() {
    let text = assemble(
        "
        auipc t1, %pcrel_hi(value)
        lw t2, %pcrel_lo(4)(t1)
        addi t3, t1, %pcrel_lo(8)
        invalid
        value: .word 7
        ",
        0,
    );
    assert!(text.diagnostics.is_empty(), "{:?}", text.diagnostics);
    let mut linked = link(text, &LinkConfig::default()).unwrap();
    assert!(linked.is_clean(), "{:?}", linked.diagnostics);
    // value sits 16 bytes past the auipc
    assert_eq!(linked.space.peek_u32(0).unwrap() >> 12, 0);
    assert_eq!(linked.space.peek_u32(4).unwrap() >> 20, 16);
    assert_eq!(linked.space.peek_u32(8).unwrap() >> 20, 16);
}

#[test]
fn data_directives() {
    let obj = assemble(
        "
        .byte 1, 0xFF, -1
        .half 0x1234
        .align 2
        here: .word 0xDEADBEEF, here
        .balign 16
        .zero 2
        .ascii \"a;b\"
        ",
        0x100,
    );
    assert!(obj.diagnostics.is_empty(), "{:?}", obj.diagnostics);
    assert_eq!(obj.symbols.address("here"), Some(0x108));
    assert_eq!(
        obj.image,
        [
            1, 0xFF, 0xFF, 0x34, 0x12, 0, 0, 0, // bytes, half, pad
            0xEF, 0xBE, 0xAD, 0xDE, 0, 0, 0, 0, // word + placeholder
            0, 0, b'a', b';', b'b',
        ]
    );
    assert_eq!(obj.relocations.len(), 1);
    assert_eq!(obj.relocations[0].site, 0x10C);
}

#[test]
fn jalr_forms() {
    let obj = assemble("jalr t0\njalr ra, 4(t0)\njalr ra, t0, 4\njr ra\nret\n", 0);
    assert!(obj.diagnostics.is_empty(), "{:?}", obj.diagnostics);
    let mut a = Assembler::new(0);
    a.jalr(Reg::RA, Reg::T0, 0);
    a.jalr(Reg::RA, Reg::T0, 4);
    a.jalr(Reg::RA, Reg::T0, 4);
    a.jalr(Reg::ZERO, Reg::RA, 0);
    a.ret();
    assert_eq!(words(&obj.image), words(a.image()));
}

#[test]
fn syntax_errors_name_their_lines() {
    let obj = assemble(
        "nop\n\
         addi x1, x0\n\
         frob x1\n\
         lw x1, 4[x2]\n\
         add x1, x2, x99\n\
         .ascii \"unterminated\n\
         .bogus 3\n\
         li x1, 0x1_0000_0000\n\
         nop\n",
        0,
    );
    assert_eq!(syntax_lines(&obj.diagnostics), vec![2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(obj.image.len(), 8);
}

#[test]
fn range_errors_are_not_syntax_errors() {
    let obj = assemble("addi x1, x0, 4096\nbeq x0, x0, 3\n", 0);
    assert_eq!(syntax_lines(&obj.diagnostics), Vec::<usize>::new());
    assert_eq!(obj.diagnostics.len(), 2);
    assert_eq!(obj.image.len(), 8);
}

#[test]
fn oversized_zero_fill_is_a_syntax_error() {
    let obj = assemble(".zero 0x7fffffffffffffff\n.space 0x100000001\nnop\n", 0);
    assert_eq!(syntax_lines(&obj.diagnostics), vec![1, 2]);
    assert_eq!(words(&obj.image), vec![0x0000_0013]);

    // exactly filling the rest of the address space is fine
    let obj = assemble(".zero 8\n", 0xFFFF_FFF8);
    assert!(obj.diagnostics.is_empty(), "{:?}", obj.diagnostics);
    assert_eq!(obj.image.len(), 8);
}
