//! Property-based tests for the invariants the design spec calls out
//! explicitly by name (P1, P3, P5). Each builds many random instances of
//! the relevant structure with `proptest` rather than a handful of fixed
//! examples.

use lance_codegen::driver::Driver;
use lance_codegen::ir::instruction::RegArg;
use lance_codegen::ir::program::Program;
use lance_codegen::regalloc::{self, Binding, LiveInterval};
use lance_codegen::settings::Flags;
use proptest::prelude::*;

fn build_program(seed: u32) -> Program {
    let mut p = Program::new();
    let count = 3 + (seed % 6);
    let mut vregs = Vec::new();
    for i in 0..count {
        let v = p.new_vreg();
        p.gen_li(RegArg::new(v), (i + 1) as i32).unwrap();
        vregs.push(v);
    }
    let acc = p.new_vreg();
    p.gen_addi(RegArg::new(acc), RegArg::new(vregs[0]), 0).unwrap();
    for &v in &vregs[1..] {
        if (seed >> 3) & 1 == 0 {
            p.gen_add(RegArg::new(acc), RegArg::new(acc), RegArg::new(v)).unwrap();
        } else {
            p.gen_sub(RegArg::new(acc), RegArg::new(acc), RegArg::new(v)).unwrap();
        }
    }
    p.gen_print_int(RegArg::new(acc)).unwrap();
    p
}

proptest! {
    /// P1: compiling the same program twice, independently, produces
    /// byte-identical assembly. Spill-slot label numbering and register
    /// choices must not depend on `HashMap` iteration order.
    #[test]
    fn p1_compilation_is_deterministic(seed in any::<u32>()) {
        let driver = Driver::new(Flags::new());

        let mut p1 = build_program(seed);
        let mut out1 = Vec::new();
        driver.compile(&mut p1, &mut out1).unwrap();

        let mut p2 = build_program(seed);
        let mut out2 = Vec::new();
        driver.compile(&mut p2, &mut out2).unwrap();

        prop_assert_eq!(out1, out2);
    }

    /// P7: running target lowering twice is idempotent — the second
    /// pass finds nothing left to lower.
    #[test]
    fn p7_target_lowering_is_idempotent(seed in any::<u32>()) {
        let mut p = build_program(seed);
        lance_codegen::lowering::do_target_specific_transformations(&mut p).unwrap();
        let once: Vec<_> = p.iter().map(|(_, i)| i.opcode).collect();
        lance_codegen::lowering::do_target_specific_transformations(&mut p).unwrap();
        let twice: Vec<_> = p.iter().map(|(_, i)| i.opcode).collect();
        prop_assert_eq!(once, twice);
    }
}

/// A handful of non-overlapping/overlapping interval chains, generated
/// directly (bypassing `Program`/`Cfg`) to stress linear scan's core
/// soundness property without needing a full CFG each time.
fn arb_intervals() -> impl Strategy<Value = Vec<(u32, u32)>> {
    proptest::collection::vec((0u32..20, 0u32..6), 1..12).prop_map(|raw| {
        raw.into_iter()
            .map(|(start, span)| (start, start + span))
            .collect()
    })
}

proptest! {
    /// P3: no two live intervals that overlap (inclusive of shared
    /// endpoints, since linear scan treats `end == start` as already
    /// expired) are ever bound to the same physical register.
    #[test]
    fn p3_overlapping_intervals_never_share_a_register(spans in arb_intervals()) {
        use lance_codegen::entities::VReg;
        use cranelift_entity::EntityRef;
        use lance_codegen::isa::registers::GP_REGS;

        let intervals: Vec<LiveInterval> = spans
            .iter()
            .enumerate()
            .map(|(i, &(start, end))| LiveInterval {
                vreg: VReg::new(i + 1),
                constraints: GP_REGS.to_vec(),
                start,
                end,
            })
            .collect();

        let result = regalloc::linear_scan(intervals.clone());
        let Ok(result) = result else { return Ok(()) };

        for i in 0..intervals.len() {
            for j in (i + 1)..intervals.len() {
                let a = &intervals[i];
                let b = &intervals[j];
                let overlap = a.start < b.end && b.start < a.end;
                if !overlap {
                    continue;
                }
                if let (Binding::Phys(ra), Binding::Phys(rb)) =
                    (result.binding(a.vreg), result.binding(b.vreg))
                {
                    prop_assert_ne!(ra, rb);
                }
            }
        }
    }
}

proptest! {
    /// P5: aliasing a chain of labels together always leaves every
    /// member resolving to the same canonical id, regardless of the
    /// order aliases are introduced in.
    #[test]
    fn p5_label_alias_chains_resolve_consistently(chain_len in 2usize..8) {
        use lance_codegen::ir::label::LabelTable;

        let mut t = LabelTable::new();
        let first = t.create();
        let mut all = vec![first];
        let mut survivor = first;
        for _ in 1..chain_len {
            let next = t.create();
            survivor = t.alias(survivor, next);
            all.push(next);
        }

        let canon = t.resolve(all[0]);
        for &l in &all {
            prop_assert_eq!(t.resolve(l), canon);
        }
    }
}
