use pretty_assertions::assert_eq;
use std::io;

use rv32_rs::cpu::{Step, HALT_EXIT_CODE, WATCHDOG_EXIT_CODE};
use rv32_rs::reg::x;
use rv32_rs::{
    link, Access, Assembler, CpuConfig, HostOs, LinkConfig, Machine, MemoryError, Reg, RunOutcome,
    Trap,
};

fn quiet_os() -> HostOs {
    HostOs::with_streams(io::empty(), io::sink(), io::sink())
}

fn machine_with(cfg: &LinkConfig, build: impl FnOnce(&mut Assembler)) -> Machine {
    let mut asm = Assembler::new(cfg.base);
    build(&mut asm);
    let linked = link(asm.finish(), cfg).unwrap();
    assert!(linked.is_clean(), "{:?}", linked.diagnostics);
    Machine::from_linked(linked, CpuConfig::default())
}

fn machine(build: impl FnOnce(&mut Assembler)) -> Machine {
    machine_with(&LinkConfig::default(), build)
}

fn run(build: impl FnOnce(&mut Assembler)) -> (Machine, Result<RunOutcome, Trap>) {
    let mut m = machine(build);
    let outcome = m.run(&mut quiet_os());
    (m, outcome)
}

#[test]
fn addi_then_halt() {
    let (m, outcome) = run(|a| {
        a.addi(x(2), x(0), 42);
        a.invalid();
    });
    assert_eq!(outcome, Ok(RunOutcome::Halted));
    assert_eq!(outcome.unwrap().exit_code(), HALT_EXIT_CODE);
    assert_eq!(m.reg(x(2)), 42);
}

#[test]
fn store_byte_writes_low_byte() {
    let (mut m, outcome) = run(|a| {
        a.li(x(4), 0x1234_5678);
        a.addi(x(5), x(0), 4);
        a.sb(x(4), x(5), 0x124);
        a.invalid();
    });
    assert_eq!(outcome, Ok(RunOutcome::Halted));
    assert_eq!(m.space.peek_u32(0x128).unwrap(), 0x78);
}

#[test]
fn exit_syscall_stops_with_code() {
    let (_, outcome) = run(|a| {
        a.addi(x(17), x(0), 0);
        a.addi(x(10), x(0), 1);
        a.ecall();
        a.addi(x(10), x(0), 7); // not reached
        a.invalid();
    });
    assert_eq!(outcome, Ok(RunOutcome::Exited(1)));
    assert_eq!(outcome.unwrap().exit_code(), 1);
}

#[test]
fn self_jump_hits_watchdog() {
    let (m, outcome) = run(|a| {
        a.label("spin");
        a.j("spin");
    });
    assert_eq!(outcome, Ok(RunOutcome::WatchdogExpired { executed: 2000 }));
    assert_eq!(outcome.unwrap().exit_code(), WATCHDOG_EXIT_CODE);
    assert_eq!(m.cpu.retired(), 2000);
}

#[test]
fn watchdog_budget_is_configurable() {
    let mut asm = Assembler::new(0);
    asm.label("spin");
    asm.j("spin");
    let linked = link(asm.finish(), &LinkConfig::default()).unwrap();
    let mut m = Machine::from_linked(
        linked,
        CpuConfig {
            watchdog: 5,
            ..CpuConfig::default()
        },
    );
    assert_eq!(
        m.run(&mut quiet_os()),
        Ok(RunOutcome::WatchdogExpired { executed: 5 })
    );
}

#[test]
fn register_zero_is_hardwired() {
    let (m, outcome) = run(|a| {
        a.addi(x(0), x(0), 5);
        a.lui(x(0), 0xFFFFF);
        a.jal(x(0), 8);
        a.invalid();
        a.add(x(1), x(0), x(0));
        a.invalid();
    });
    assert_eq!(outcome, Ok(RunOutcome::Halted));
    assert_eq!(m.reg(Reg::ZERO), 0);
    assert_eq!(m.reg(x(1)), 0);
}

#[test]
fn counted_loop() {
    // sum 1..=10
    let (m, _) = run(|a| {
        a.addi(x(1), x(0), 0);
        a.addi(x(2), x(0), 1);
        a.addi(x(3), x(0), 11);
        a.label("loop");
        a.add(x(1), x(1), x(2));
        a.addi(x(2), x(2), 1);
        a.blt(x(2), x(3), "loop");
        a.invalid();
    });
    assert_eq!(m.reg(x(1)), 55);
}

#[test]
fn call_and_return_through_stack() {
    let (m, outcome) = run(|a| {
        a.addi(Reg::A0, x(0), 41);
        a.call("bump");
        a.invalid();
        a.label("bump");
        a.addi(Reg::SP, Reg::SP, -4);
        a.sw(Reg::RA, Reg::SP, 0);
        a.addi(Reg::A0, Reg::A0, 1);
        a.lw(Reg::RA, Reg::SP, 0);
        a.addi(Reg::SP, Reg::SP, 4);
        a.ret();
    });
    assert_eq!(outcome, Ok(RunOutcome::Halted));
    assert_eq!(m.reg(Reg::A0), 42);
    assert_eq!(m.reg(Reg::RA), 12);
}

#[test]
fn loads_extend_correctly() {
    let (m, _) = run(|a| {
        a.la(x(5), "data");
        a.lb(x(1), x(5), 0);
        a.lbu(x(2), x(5), 0);
        a.lh(x(3), x(5), 0);
        a.lhu(x(4), x(5), 0);
        a.lw(x(6), x(5), 0);
        a.invalid();
        a.align(4);
        a.label("data");
        a.word(0x1234_8080);
    });
    assert_eq!(m.reg(x(1)), -128);
    assert_eq!(m.reg(x(2)), 0x80);
    assert_eq!(m.reg(x(3)), -32640);
    assert_eq!(m.reg(x(4)), 0x8080);
    assert_eq!(m.reg(x(6)), 0x1234_8080);
}

#[test]
fn alu_semantics() {
    let (m, _) = run(|a| {
        a.li(x(1), -7);
        a.addi(x(2), x(0), 2);
        a.div(x(3), x(1), x(2));
        a.rem(x(4), x(1), x(2));
        a.divu(x(5), x(1), x(0));
        a.remu(x(6), x(1), x(0));
        a.div(x(7), x(1), x(0));
        a.sra(x(8), x(1), x(2));
        a.srl(x(9), x(1), x(2));
        a.sltu(x(10), x(2), x(1));
        a.slt(x(11), x(2), x(1));
        a.mulh(x(12), x(1), x(1));
        a.mulhu(x(13), x(1), x(1));
        a.xori(x(14), x(1), -1);
        a.invalid();
    });
    assert_eq!(m.reg(x(3)), -3);
    assert_eq!(m.reg(x(4)), -1);
    assert_eq!(m.reg(x(5)), -1);
    assert_eq!(m.reg(x(6)), -7);
    assert_eq!(m.reg(x(7)), -1);
    assert_eq!(m.reg(x(8)), -2);
    assert_eq!(m.reg(x(9)) as u32, 0xFFFF_FFF9 >> 2);
    assert_eq!(m.reg(x(10)), 1);
    assert_eq!(m.reg(x(11)), 0);
    assert_eq!(m.reg(x(12)), 0);
    assert_eq!(m.reg(x(13)) as u32, 0xFFFF_FFF2);
    assert_eq!(m.reg(x(14)), 6);
}

#[test]
fn overflowing_division() {
    let (m, _) = run(|a| {
        a.li(x(1), i32::MIN);
        a.addi(x(2), x(0), -1);
        a.div(x(3), x(1), x(2));
        a.rem(x(4), x(1), x(2));
        a.invalid();
    });
    assert_eq!(m.reg(x(3)), i32::MIN);
    assert_eq!(m.reg(x(4)), 0);
}

#[test]
fn jalr_clears_low_bit() {
    let (m, _) = run(|a| {
        a.addi(x(1), x(0), 13);
        a.jalr(x(2), x(1), 0); // lands on 12
        a.invalid();
        a.addi(x(3), x(0), 1);
        a.invalid();
    });
    assert_eq!(m.reg(x(2)), 8);
    assert_eq!(m.reg(x(3)), 1);
}

#[test]
fn fetch_requires_execute() {
    let cfg = LinkConfig {
        text_access: Access::READ | Access::WRITE,
        ..LinkConfig::default()
    };
    let mut m = machine_with(&cfg, |a| a.nop());
    let err = m.run(&mut quiet_os()).unwrap_err();
    assert!(matches!(
        err,
        Trap::Memory {
            pc: 0,
            source: MemoryError::AccessDenied { .. }
        }
    ));
}

#[test]
fn unknown_encoding_is_fatal() {
    let (_, outcome) = run(|a| {
        a.nop();
        a.word(0xFFFF_FFFF);
    });
    assert_eq!(outcome, Err(Trap::InvalidInstruction { pc: 4, raw: 0xFFFF_FFFF }));
}

#[test]
fn ebreak_is_fatal() {
    let (_, outcome) = run(|a| a.ebreak());
    assert_eq!(outcome, Err(Trap::Breakpoint { pc: 0 }));
}

#[test]
fn wild_load_faults() {
    let (_, outcome) = run(|a| {
        a.lui(x(1), 0x80000);
        a.lw(x(2), x(1), 0);
    });
    assert_eq!(
        outcome,
        Err(Trap::Memory {
            pc: 4,
            source: MemoryError::Unmapped {
                addr: 0x8000_0000,
                len: 4
            }
        })
    );
}

#[test]
fn misaligned_jump_target_faults() {
    let (_, outcome) = run(|a| {
        a.addi(x(1), x(0), 6);
        a.jalr(x(0), x(1), 0);
    });
    assert_eq!(outcome, Err(Trap::MisalignedFetch { pc: 6 }));
}

#[test]
fn sp_starts_at_stack_top() {
    let mut asm = Assembler::new(0);
    asm.invalid();
    let linked = link(asm.finish(), &LinkConfig::default()).unwrap();
    let top = linked.stack_top.unwrap();
    let m = Machine::from_linked(linked, CpuConfig::default());
    assert_eq!(m.reg(Reg::SP) as u32, top);

    let mut asm = Assembler::new(0);
    asm.invalid();
    let linked = link(asm.finish(), &LinkConfig::default()).unwrap();
    let cfg = CpuConfig {
        initial_sp: Some(0x100),
        ..CpuConfig::default()
    };
    assert_eq!(Machine::from_linked(linked, cfg).reg(Reg::SP), 0x100);
}

#[test]
fn single_stepping() {
    let mut m = machine(|a| {
        a.addi(x(1), x(0), 1);
        a.ecall();
        a.invalid();
    });
    assert_eq!(m.step(), Ok(Step::Retired));
    assert_eq!(m.step(), Ok(Step::Ecall));
    assert_eq!(m.step(), Ok(Step::Halted));
    assert_eq!(m.cpu.pc, 8);
}
