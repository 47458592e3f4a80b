//! End-to-end scenarios driving the whole pipeline from a freshly built
//! `Program` through to final assembly text. These stand in for the
//! design spec's worked LANCE-source-to-assembly examples, minus the
//! (out-of-scope) LANCE front end itself: each test builds the `Program`
//! a correct front end would have produced for the scenario, the same
//! way `lancec`'s `ir_text` front end does.

use lance_codegen::diagnostics::DiagnosticSink;
use lance_codegen::driver::Driver;
use lance_codegen::ir::instruction::RegArg;
use lance_codegen::ir::program::Program;
use lance_codegen::ir::symbol::SymbolKind;
use lance_codegen::ir_text;
use lance_codegen::settings::Flags;

fn compile(program: &mut Program) -> String {
    let driver = Driver::new(Flags::new());
    let mut out = Vec::new();
    driver.compile(program, &mut out).expect("compilation should succeed");
    String::from_utf8(out).unwrap()
}

/// `int a; read a; write a;`
#[test]
fn scalar_read_and_write_round_trips_through_a_global_slot() {
    let mut p = Program::new();
    let mut sink = DiagnosticSink::new();
    let a = p.create_symbol(&mut sink, "a", SymbolKind::Int).unwrap();
    assert!(!sink.has_errors());

    let v = p.new_vreg();
    let scratch = p.new_vreg();
    p.gen_read_int(RegArg::new(v)).unwrap();
    p.gen_sw_global(RegArg::new(v), a, RegArg::new(scratch)).unwrap();

    let v2 = p.new_vreg();
    p.gen_lw_global(RegArg::new(v2), a).unwrap();
    p.gen_print_int(RegArg::new(v2)).unwrap();

    let text = compile(&mut p);
    assert!(text.contains(".data"));
    assert!(text.contains("a:"));
    assert!(text.contains(".space 4"));
    assert!(text.contains("ecall"));
}

/// The back-end-relevant tail of `a = 3 + 4;` — constant folding itself
/// is a front-end concern, so the front end is assumed to have already
/// reduced the expression to a single literal by the time it reaches
/// this crate.
#[test]
fn constant_initialised_scalar_lowers_to_a_single_store() {
    let mut p = Program::new();
    let mut sink = DiagnosticSink::new();
    let a = p.create_symbol(&mut sink, "a", SymbolKind::Int).unwrap();

    let v = p.new_vreg();
    let scratch = p.new_vreg();
    p.gen_li(RegArg::new(v), 7).unwrap();
    p.gen_sw_global(RegArg::new(v), a, RegArg::new(scratch)).unwrap();

    let text = compile(&mut p);
    assert!(text.contains("li"));
    assert!(text.contains("sw"));
}

/// Array indexing lowers to an address computation (`la` plus an
/// offset) rather than a second global-variable access path.
#[test]
fn array_element_access_uses_address_plus_offset() {
    let mut p = Program::new();
    let mut sink = DiagnosticSink::new();
    let arr = p.create_symbol(&mut sink, "arr", SymbolKind::IntArray(10)).unwrap();
    assert!(!sink.has_errors());

    let base = p.new_vreg();
    let dest = p.new_vreg();
    p.gen_la(RegArg::new(base), arr).unwrap();
    p.gen_lw(RegArg::new(dest), 12, RegArg::new(base)).unwrap();
    p.gen_print_int(RegArg::new(dest)).unwrap();

    let text = compile(&mut p);
    assert!(text.contains("la"));
    assert!(text.contains("lw"));
    assert!(text.contains("12("));
}

/// A zero-size array is rejected by the front-end-facing constructor,
/// not by a back-end panic.
#[test]
fn zero_size_array_is_rejected_as_a_front_end_error() {
    let mut p = Program::new();
    let mut sink = DiagnosticSink::new();
    let result = p.create_symbol(&mut sink, "bad", SymbolKind::IntArray(0));
    assert!(result.is_none());
    assert!(sink.has_errors());
}

/// Forces enough simultaneously live temporaries to exhaust the 23
/// general-purpose registers, confirming the pipeline still produces
/// valid-looking output with spill slots rather than failing.
#[test]
fn register_pressure_spills_rather_than_failing() {
    use lance_codegen::isa::registers::GP_REGS;

    let mut p = Program::new();
    let mut vregs = Vec::new();
    for _ in 0..(GP_REGS.len() + 4) {
        let v = p.new_vreg();
        p.gen_li(RegArg::new(v), 1).unwrap();
        vregs.push(v);
    }
    let acc = p.new_vreg();
    p.gen_addi(RegArg::new(acc), RegArg::new(vregs[0]), 0).unwrap();
    for &v in &vregs[1..] {
        p.gen_add(RegArg::new(acc), RegArg::new(acc), RegArg::new(v)).unwrap();
    }
    p.gen_print_int(RegArg::new(acc)).unwrap();

    let text = compile(&mut p);
    assert!(text.contains("spill_"));
}

/// A conditional loop (`while (n) { n = n - 1; }`) round-trips through
/// CFG construction, liveness and allocation without the allocator
/// assigning the loop variable two different registers across the back
/// edge.
#[test]
fn simple_loop_compiles_and_keeps_the_induction_variable_live() {
    let mut p = Program::new();
    let n = p.new_vreg();
    p.gen_li(RegArg::new(n), 5).unwrap();

    let top = p.create_label();
    let bottom = p.create_label();
    p.assign_label(top);
    p.gen_beqz(RegArg::new(n), bottom).unwrap();
    p.gen_subi(RegArg::new(n), RegArg::new(n), 1).unwrap();
    p.gen_j(top).unwrap();
    p.assign_label(bottom);
    p.gen_print_int(RegArg::new(n)).unwrap();

    let text = compile(&mut p);
    assert!(text.contains("beq"));
    assert!(text.contains("addi"));
}

/// The `ir_text` stand-in notation drives the same pipeline end to end,
/// exactly as `lancec` does from the command line.
#[test]
fn ir_text_notation_compiles_through_the_same_pipeline() {
    let src = "\
        symbol total int\n\
        vreg t0\n\
        vreg scratch\n\
        li t0, 42\n\
        swg t0, total, scratch\n\
        exit0\n\
    ";
    let mut p = Program::new();
    let mut sink = DiagnosticSink::new();
    ir_text::parse(&mut p, &mut sink, src).unwrap();
    assert!(!sink.has_errors());

    let text = compile(&mut p);
    assert!(text.contains("total:"));
    assert!(text.contains("li"));
}
