use super::sink::Recorder;
use super::*;
use crate::virtual_machine::assembler::assemble_source;

fn run_vm(source: &str) -> VM<'static> {
    run_vm_with(source, VmConfig::default())
}

fn run_vm_with(source: &str, config: VmConfig) -> VM<'static> {
    let program = assemble_source(source).expect("assembly failed");
    let mut vm = VM::new(config);
    vm.run(&program).expect("vm run failed");
    vm
}

fn run_expect_err(source: &str) -> VMError {
    run_expect_err_with(source, VmConfig::default())
}

fn run_expect_err_with(source: &str, config: VmConfig) -> VMError {
    let program = match assemble_source(source) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let mut vm = VM::new(config);
    vm.run(&program).expect_err("expected error")
}

fn run_recorded(source: &str) -> (VM<'static>, Recorder) {
    let program = assemble_source(source).expect("assembly failed");
    let mut vm = VM::default();
    let mut recorder = Recorder::default();
    vm.run_with(&program, &mut recorder)
        .expect("vm run failed");
    (vm, recorder)
}

fn small_stack(stack_size: usize) -> VmConfig {
    VmConfig {
        stack_size,
        ..VmConfig::default()
    }
}

fn op(mnemonic: &str) -> u8 {
    Isa::shared().opcode(mnemonic).unwrap()
}

// ==================== Push / Pop ====================

#[test]
fn empty_program_does_nothing() {
    let vm = run_vm("");
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.steps(), 0);
    assert_eq!(vm.fault(), None);
    assert_eq!(vm.signal(), None);
}

#[test]
fn push_writes_little_endian_bytes() {
    let vm = run_vm("push_u8 7\npush_u16 513");
    assert_eq!(vm.stack(), &[7, 1, 2]);
    assert_eq!(vm.get_u16().unwrap(), 513);
    assert_eq!(vm.stack_depth(), 3);
}

#[test]
fn push_bool() {
    assert!(run_vm("push_bool 1").get_bool().unwrap());
    assert!(!run_vm("push_bool 0").get_bool().unwrap());
    assert!(run_vm("push_bool 7").get_bool().unwrap());
}

#[test]
fn top_value_reads_any_kind() {
    let vm = run_vm("push_i16 300");
    assert_eq!(vm.top_value(Kind::I16).unwrap(), Value::I16(300));
    assert_eq!(vm.top_value(Kind::U8).unwrap(), Value::U8(1));
    assert!(matches!(
        vm.top_value(Kind::U64),
        Err(VMError::StackUnderflow { .. })
    ));
}

#[test]
fn pop_family() {
    assert_eq!(run_vm("push_u32 1\npush_u8 2\npop1").stack(), &[1, 0, 0, 0]);
    assert_eq!(run_vm("push_u64 1\npop8").stack_depth(), 0);
    assert_eq!(run_vm("push_u32 9\npopg 3").stack(), &[9]);
}

#[test]
fn pop_on_empty_stack_underflows() {
    assert!(matches!(
        run_expect_err("pop1"),
        VMError::StackUnderflow {
            requested: 1,
            depth: 0
        }
    ));
}

// ==================== Dup / Swap ====================

#[test]
fn dup_copies_top_bytes() {
    assert_eq!(run_vm("push_u16 1\npush_u16 2\ndup2").stack(), &[1, 0, 2, 0, 2, 0]);
    assert_eq!(
        run_vm("push_u8 1\npush_u8 2\npush_u8 3\ndupg 2").stack(),
        &[1, 2, 3, 2, 3]
    );
}

#[test]
fn swap_exchanges_adjacent_blocks() {
    assert_eq!(run_vm("push_u8 1\npush_u8 2\nswap1").stack(), &[2, 1]);
    assert_eq!(
        run_vm("push_u8 1\npush_u8 2\npush_u8 3\npush_u8 4\nswapg 2").stack(),
        &[3, 4, 1, 2]
    );
}

#[test]
fn swap_needs_twice_the_width() {
    assert!(matches!(
        run_expect_err("push_u8 1\npush_u8 2\npush_u8 3\nswap2"),
        VMError::StackUnderflow {
            requested: 4,
            depth: 3
        }
    ));
}

// ==================== Arithmetic ====================

#[test]
fn add_overwrites_top_and_leaves_left_operand() {
    let vm = run_vm("push_u32 40\npush_u32 2\nadd_u32");
    assert_eq!(vm.get_u32().unwrap(), 42);
    assert_eq!(vm.stack(), &[40, 0, 0, 0, 42, 0, 0, 0]);
}

#[test]
fn residue_is_discarded_explicitly() {
    let vm = run_vm("push_u32 40\npush_u32 2\nadd_u32\nswap4\npop4");
    assert_eq!(vm.stack_depth(), 4);
    assert_eq!(vm.get_u32().unwrap(), 42);
}

#[test]
fn sub_wraps() {
    assert_eq!(run_vm("push_u8 1\npush_u8 2\nsub_u8").get_u8().unwrap(), 255);
    assert_eq!(run_vm("push_i8 1\npush_i8 2\nsub_i8").get_i8().unwrap(), -1);
}

#[test]
fn mul() {
    assert_eq!(run_vm("push_i128 3\npush_i128 4\nmul_i128").get_i128().unwrap(), 12);
    assert_eq!(run_vm("push_u16 300\npush_u16 300\nmul_u16").get_u16().unwrap(), 24464);
}

#[test]
fn div_and_rem() {
    assert_eq!(run_vm("push_i32 17\npush_i32 5\ndiv_i32").get_i32().unwrap(), 3);
    assert_eq!(run_vm("push_i32 17\npush_i32 5\nrem_i32").get_i32().unwrap(), 2);
    assert_eq!(run_vm("push_u64 100\npush_u64 7\nrem_u64").get_u64().unwrap(), 2);
}

#[test]
fn div_by_zero_latches_fault_and_keeps_stack() {
    let vm = run_vm("push_u16 9\npush_u16 0\ndiv_u16");
    assert_eq!(vm.fault(), Some(Fault::DivisionByZero { offset: 6 }));
    assert_eq!(vm.stack(), &[9, 0, 0, 0]);
}

#[test]
fn fault_survives_other_instructions() {
    let vm = run_vm("push_u8 1\npush_u8 0\nrem_u8\ninc_u8\npush_u8 3");
    assert_eq!(vm.fault(), Some(Fault::DivisionByZero { offset: 4 }));
    assert_eq!(vm.stack(), &[1, 1, 3]);
}

#[test]
fn successful_division_clears_fault() {
    let vm = run_vm("push_u8 9\npush_u8 0\ndiv_u8\npop1\npush_u8 3\ndiv_u8");
    assert_eq!(vm.fault(), None);
    assert_eq!(vm.get_u8().unwrap(), 3);
}

#[test]
fn float_division_by_zero_latches_fault() {
    let vm = run_vm("push_f64 1\npush_f64 0\ndiv_f64");
    assert!(vm.fault().is_some());
    assert_eq!(vm.get_f64().unwrap(), 0.0);
}

#[test]
fn float_arithmetic() {
    assert_eq!(run_vm("push_f32 1.5\npush_f32 2.25\nmul_f32").get_f32().unwrap(), 3.375);
    assert_eq!(run_vm("push_f64 1\npush_f64 4\ndiv_f64").get_f64().unwrap(), 0.25);
}

#[test]
fn f128_arithmetic() {
    assert_eq!(
        run_vm("push_f128 1.5\npush_f128 2.25\nadd_f128").get_f128().unwrap(),
        3.75
    );
    assert_eq!(
        run_vm("push_f128 1\npush_f128 3\nsub_f128\nabs_f128").get_f128().unwrap(),
        2.0
    );
    assert_eq!(run_vm("push_f128 2.5").stack_depth(), 16);
}

#[test]
fn f128_resolves_past_53_bits() {
    let vm = run_vm("push_f128 1152921504606846976\ndup16\ninc_f128\ncmp_f128");
    assert_eq!(vm.compare(), -1);
    assert_eq!(vm.stack_depth(), 32);
    let expected = super::extended::F128::from_decimal("1152921504606846977").unwrap();
    assert_eq!(vm.top_value(Kind::F128).unwrap(), Value::F128(expected));
    assert_eq!(vm.top_value(Kind::F128).unwrap().to_string(), "1152921504606846977");

    let vm = run_vm("push_f128 1\npush_f128 3\ndiv_f128\npush_f128 3\nmul_f128\npush_f128 1\ncmp_f128");
    assert_eq!(vm.compare(), 0);
}

#[test]
fn abs() {
    assert_eq!(run_vm("push_i16 3\npush_i16 10\nsub_i16\nabs_i16").get_i16().unwrap(), 7);
    assert_eq!(run_vm("push_f32 1\npush_f32 3\nsub_f32\nabs_f32").get_f32().unwrap(), 2.0);
}

#[test]
fn abs_of_minimum_wraps() {
    let vm = run_vm("push_i8 0\npush_i8 127\nsub_i8\ndec_i8\nabs_i8");
    assert_eq!(vm.get_i8().unwrap(), -128);
}

#[test]
fn inc_and_dec_wrap() {
    assert_eq!(run_vm("push_u8 255\ninc_u8").get_u8().unwrap(), 0);
    assert_eq!(run_vm("push_u64 0\ndec_u64").get_u64().unwrap(), u64::MAX);
    assert_eq!(
        run_vm("push_u128 340282366920938463463374607431768211455\ninc_u128")
            .get_u128()
            .unwrap(),
        0
    );
    assert_eq!(run_vm("push_f64 0.5\ninc_f64").get_f64().unwrap(), 1.5);
}

#[test]
fn arithmetic_on_short_stack_underflows() {
    assert!(matches!(
        run_expect_err("push_u8 1\nadd_u16"),
        VMError::StackUnderflow { .. }
    ));
    assert!(matches!(
        run_expect_err("inc_u32"),
        VMError::StackUnderflow { .. }
    ));
}

// ==================== Locals ====================

#[test]
fn setl_then_pushl() {
    let vm = run_vm("setl_u32 4 123456\npushl_u32 4");
    assert_eq!(vm.get_u32().unwrap(), 123456);
    assert_eq!(vm.local(4).unwrap(), Value::U32(123456));
}

#[test]
fn popl_moves_top_into_slot() {
    let vm = run_vm("push_i64 99\npopl_i64 0");
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.local(0).unwrap(), Value::I64(99));
}

#[test]
fn popl_tags_bytes_with_its_kind() {
    let vm = run_vm("push_u16 258\npopl_u8 1");
    assert_eq!(vm.local(1).unwrap(), Value::U8(1));
    assert_eq!(vm.stack(), &[2]);
}

#[test]
fn setl_overwrites_tag() {
    let vm = run_vm("setl_u8 0 1\nsetl_f64 0 2.5\npushl_f64 0");
    assert_eq!(vm.local(0).unwrap(), Value::F64(2.5));
    assert_eq!(vm.get_f64().unwrap(), 2.5);
}

#[test]
fn pushl_with_wrong_kind_fails() {
    assert!(matches!(
        run_expect_err("setl_u8 0 1\npushl_u16 0"),
        VMError::LocalTypeMismatch {
            index: 0,
            expected: "u16",
            actual: "u8"
        }
    ));
}

#[test]
fn pushl_from_empty_slot_fails() {
    assert!(matches!(
        run_expect_err("pushl_u8 3"),
        VMError::LocalTypeMismatch {
            index: 3,
            expected: "u8",
            actual: "none"
        }
    ));
}

#[test]
fn local_index_255_is_out_of_range() {
    assert!(matches!(
        run_expect_err("setl_u8 255 1"),
        VMError::InvalidLocalIndex {
            index: 255,
            available: LOCALS
        }
    ));
    assert!(matches!(
        run_expect_err("push_u8 1\npopl_u8 255"),
        VMError::InvalidLocalIndex { index: 255, .. }
    ));
    assert_eq!(run_vm("setl_u8 254 1").local(254).unwrap(), Value::U8(1));
}

// ==================== Compare / Jumps ====================

#[test]
fn cmp_sets_register_without_touching_stack() {
    let vm = run_vm("push_i32 5\npush_i32 7\ncmp_i32");
    assert_eq!(vm.compare(), -1);
    assert_eq!(vm.stack_depth(), 8);

    assert_eq!(run_vm("push_u8 7\npush_u8 7\ncmp_u8").compare(), 0);
    assert_eq!(run_vm("push_f64 0.5\npush_f64 0.25\ncmp_f64").compare(), 1);
}

#[test]
fn cmp_respects_signedness() {
    assert_eq!(run_vm("push_u8 0\npush_u8 1\nsub_u8\npush_u8 1\ncmp_u8").compare(), 1);
    assert_eq!(run_vm("push_i8 0\npush_i8 1\nsub_i8\npush_i8 1\ncmp_i8").compare(), -1);
}

#[test]
fn conditional_jumps() {
    let cases = [
        (1, 1, "jz", true),
        (1, 1, "jnz", false),
        (1, 1, "jnl", true),
        (1, 1, "jng", true),
        (1, 2, "jz", false),
        (1, 2, "jnz", true),
        (1, 2, "jl", true),
        (1, 2, "jg", false),
        (1, 2, "jnl", false),
        (1, 2, "jng", true),
        (2, 1, "jl", false),
        (2, 1, "jg", true),
        (2, 1, "jnl", true),
        (2, 1, "jng", false),
        (2, 1, "jmp", true),
    ];
    for (a, b, jump, taken) in cases {
        let source = format!("push_u8 {a}\npush_u8 {b}\ncmp_u8\n{jump} @skip\npush_u8 42\n@skip");
        let depth = run_vm(&source).stack_depth();
        assert_eq!(depth == 2, taken, "{jump} after comparing {a} with {b}");
    }
}

#[test]
fn comparison_register_starts_at_zero() {
    assert_eq!(run_vm("jz @end\npush_u8 1\n@end").stack_depth(), 0);
}

#[test]
fn jump_past_end_stops_the_run() {
    let vm = run_vm("jmp 1000\npush_u8 1");
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.steps(), 1);
}

#[test]
fn backward_loop_counts_down() {
    let vm = run_vm(
        r#"
            push_u8 5
            @loop
            dec_u8
            push_u8 0
            cmp_u8
            pop1
            jnz @loop
        "#,
    );
    assert_eq!(vm.get_u8().unwrap(), 0);
    assert_eq!(vm.stack_depth(), 1);
    assert_eq!(vm.steps(), 26);
}

#[test]
fn fibonacci() {
    let vm = run_vm(
        r#"
            // counter stays on the stack, locals hold the last two terms
            push_u8 0
            setl_u8 0 0
            setl_u8 1 1
            setl_u8 2 0
            @loop
            push_u8 9
            cmp_u8
            pop1
            jnl @end
            inc_u8
            pushl_u8 0
            pushl_u8 1
            add_u8
            popl_u8 2
            pop1
            pushl_u8 1
            popl_u8 0
            pushl_u8 2
            popl_u8 1
            jmp @loop
            @end
            pop1
            pushl_u8 2
        "#,
    );
    assert_eq!(vm.get_u8().unwrap(), 55);
    assert_eq!(vm.stack_depth(), 1);
    assert_eq!(vm.local(1).unwrap(), Value::U8(55));
    assert_eq!(vm.local(0).unwrap(), Value::U8(34));
}

// ==================== Debugging ====================

#[test]
fn sig_records_code_and_stops() {
    let (vm, recorder) = run_recorded("push_u8 1\nsig 3\npush_u8 2");
    assert_eq!(vm.signal(), Some(3));
    assert_eq!(vm.stack(), &[1]);
    assert_eq!(recorder.events.len(), 1);
    let (event, snapshot) = &recorder.events[0];
    assert_eq!(*event, Event::Signal);
    assert_eq!(snapshot.code, 3);
    assert_eq!(snapshot.offset, 2);
    assert_eq!(snapshot.stack, vec![1]);
}

#[test]
fn dbg_reports_and_continues() {
    let (vm, recorder) = run_recorded("setl_u8 0 7\nsetl_bool 1 1\npush_u8 255\ndbg 5\npush_u8 1");
    assert_eq!(vm.stack_depth(), 2);
    assert_eq!(vm.signal(), None);
    let (event, snapshot) = &recorder.events[0];
    assert_eq!(*event, Event::Debug);
    assert_eq!(snapshot.code, 5);
    assert_eq!(snapshot.offset, 8);
    assert_eq!(snapshot.stack, vec![255]);
    assert_eq!(snapshot.locals, vec![Value::U8(7), Value::Bool(true)]);
}

#[test]
fn snapshot_locals_stop_at_first_empty_slot() {
    let (_, recorder) = run_recorded("setl_u8 0 1\nsetl_u8 2 3\ndbg 0");
    assert_eq!(recorder.events[0].1.locals, vec![Value::U8(1)]);
}

#[test]
fn ret_dumps_state_and_continues() {
    let (vm, recorder) = run_recorded("push_u8 4\nret\ninc_u8");
    assert_eq!(vm.get_u8().unwrap(), 5);
    assert_eq!(recorder.events.len(), 1);
    assert_eq!(recorder.events[0].0, Event::Return);
    assert_eq!(recorder.events[0].1.code, 0);
}

#[test]
fn snapshot_after_run() {
    let vm = run_vm("setl_u16 0 258\npush_u8 9");
    let snapshot = vm.snapshot();
    assert_eq!(snapshot.stack, vec![9]);
    assert_eq!(snapshot.locals, vec![Value::U16(258)]);
}

// ==================== Limits / Errors ====================

#[test]
fn stack_overflow() {
    assert!(matches!(
        run_expect_err_with("push_u32 1\npush_u8 1", small_stack(4)),
        VMError::StackOverflow {
            requested: 1,
            depth: 4,
            capacity: 4
        }
    ));
    assert!(matches!(
        run_expect_err_with("push_u16 1\ndup2", small_stack(3)),
        VMError::StackOverflow { requested: 2, .. }
    ));
}

#[test]
fn stack_capacity_is_configurable() {
    let vm = run_vm_with("push_u32 1", small_stack(4));
    assert_eq!(vm.stack_capacity(), 4);
    assert_eq!(VM::default().stack_capacity(), DEFAULT_STACK_SIZE);
}

#[test]
fn invalid_opcode() {
    let mut vm = VM::default();
    let err = vm.run(&[op("push_u8"), 1, 0xC4]).unwrap_err();
    assert!(matches!(
        err,
        VMError::InvalidInstruction {
            opcode: 0xC4,
            offset: 2
        }
    ));
    assert_eq!(vm.stack(), &[1]);
}

#[test]
fn truncated_immediate() {
    let mut vm = VM::default();
    let err = vm.run(&[op("push_u32"), 1, 2]).unwrap_err();
    assert!(matches!(
        err,
        VMError::UnexpectedEndOfBytecode {
            ip: 1,
            requested: 4,
            available: 2
        }
    ));
}

#[test]
fn step_limit() {
    let config = VmConfig {
        max_steps: Some(10),
        ..VmConfig::default()
    };
    let program = assemble_source("@top\njmp @top").unwrap();
    let mut vm = VM::new(config.clone());
    assert!(matches!(
        vm.run(&program).unwrap_err(),
        VMError::StepLimitExceeded { limit: 10 }
    ));
    assert_eq!(vm.steps(), 10);

    let config = VmConfig {
        max_steps: Some(3),
        ..config
    };
    assert_eq!(run_vm_with("push_u8 1\ninc_u8\ninc_u8", config).get_u8().unwrap(), 3);
}

// ==================== Lifecycle ====================

#[test]
fn run_resets_state() {
    let mut vm = VM::default();
    let first = assemble_source("push_u8 1\npush_u8 0\ndiv_u8\nsetl_u8 3 9\npush_u8 1\ncmp_u8\nsig 1").unwrap();
    vm.run_with(&first, &mut Recorder::default()).unwrap();
    assert!(vm.fault().is_some());
    assert_eq!(vm.signal(), Some(1));
    assert_eq!(vm.compare(), -1);

    vm.run(&assemble_source("push_u8 2").unwrap()).unwrap();
    assert_eq!(vm.fault(), None);
    assert_eq!(vm.signal(), None);
    assert_eq!(vm.compare(), 0);
    assert_eq!(vm.local(3).unwrap(), Value::None);
    assert_eq!(vm.stack(), &[2]);
    assert_eq!(vm.steps(), 1);
}

#[test]
fn profile_counts_by_category() {
    let (vm, _) = run_recorded("push_u8 1\npush_u8 2\nadd_u8\ncmp_u8\nsetl_u8 0 1\ndbg 0\njmp 100");
    let counts: Vec<(&str, u64)> = vm
        .profile()
        .iter()
        .map(|(category, count)| (category.as_str(), count))
        .collect();
    assert_eq!(
        counts,
        vec![
            ("Stack", 2),
            ("Locals", 1),
            ("Arithmetic", 1),
            ("Compare", 1),
            ("Control", 1),
            ("Debug", 1),
        ]
    );
    assert_eq!(vm.profile().total(), 7);
}

#[test]
fn custom_instruction_table() {
    let isa = Isa::new();
    let mut vm = VM::with_isa(&isa, VmConfig::default());
    vm.run(&[isa.opcode("push_u8").unwrap(), 6, isa.opcode("inc_u8").unwrap()])
        .unwrap();
    assert_eq!(vm.get_u8().unwrap(), 7);
}
