//! Orchestrates the back-end pipeline (§6 of the design spec): target
//! lowering, then register allocation (CFG build, liveness, linear scan,
//! spill materialisation, re-linearisation), with optional debug-log
//! dumps alongside the two stages.

use crate::diagnostics::CodegenResult;
use crate::flowgraph::Cfg;
use crate::ir::program::Program;
use crate::regalloc::{self, RegAllocResult};
use crate::settings::Flags;
use crate::spill::{self, SpillSlotMap};
use crate::{lowering, printer};
use cranelift_entity::EntityRef;
use std::fs::File;
use std::io::Write;

/// Owns the pipeline's configuration and drives it end to end. Built
/// once per compilation by the CLI (or by a test) and handed a `Program`
/// the front end has already validated (`DiagnosticSink::has_errors()`
/// checked false).
pub struct Driver {
    pub flags: Flags,
}

impl Driver {
    pub fn new(flags: Flags) -> Self {
        Self { flags }
    }

    /// `do_target_specific_transformations` (§4.2-§4.4): pseudo-op
    /// lowering, syscall expansion, immediate legalisation, in that fixed
    /// order.
    pub fn lower_for_target(&self, program: &mut Program) -> CodegenResult<()> {
        lowering::do_target_specific_transformations(program)
    }

    /// `do_register_allocation` (§4.5-§4.6): build the CFG, run liveness
    /// to a fixed point, linear-scan allocate, materialise spills, then
    /// re-linearise the program's instruction list from the resulting
    /// block order. Returns the spill-slot map the printer needs to
    /// render the extra `.space 4` data-segment entries spilling
    /// introduced.
    pub fn allocate_registers(&self, program: &mut Program) -> CodegenResult<SpillSlotMap> {
        let cfg = Cfg::build(program)?;
        let result = regalloc::allocate(&cfg, program)?;
        if let Some(base) = &self.flags.debug_log_base {
            if self.flags.emit_debug_logs {
                self.write_debug_logs(base, &cfg, &result)?;
            }
        }
        let (order, slots) = spill::materialise_spills(program, &cfg, &result)?;
        program.set_order(order);
        Ok(slots)
    }

    /// Runs the full back end — lowering, then allocation — and writes
    /// the final assembly to `out`.
    pub fn compile(&self, program: &mut Program, out: &mut dyn Write) -> CodegenResult<()> {
        program.emit_epilogue()?;
        self.lower_for_target(program)?;
        let slots = self.allocate_registers(program)?;
        printer::write_assembly(out, program, &slots, self.flags.debug_dump_assembly)
    }

    fn write_debug_logs(&self, base: &str, cfg: &Cfg, result: &RegAllocResult) -> CodegenResult<()> {
        let cf_path = format!("{base}_controlFlow.log");
        let mut cf = File::create(&cf_path)?;
        for block_id in cfg.block_order() {
            let block = cfg.block(block_id);
            writeln!(
                cf,
                "block {:?}: {} node(s), pred={:?}, succ={:?}",
                block_id,
                block.nodes.len(),
                block.pred,
                block.succ
            )?;
        }

        let df_path = format!("{base}_dataFlow.log");
        let mut df = File::create(&df_path)?;
        for block_id in cfg.block_order() {
            for node in &cfg.block(block_id).nodes {
                writeln!(
                    df,
                    "{:?}: def={:?} use={:?} in={:?} out={:?}",
                    node.inst, node.defs, node.uses, node.live_in, node.live_out
                )?;
            }
        }

        let ra_path = format!("{base}_regAlloc.log");
        let mut ra = File::create(&ra_path)?;
        let mut bindings: Vec<_> = result.bindings.iter().collect();
        bindings.sort_by_key(|(vreg, _)| vreg.index());
        for (vreg, binding) in bindings {
            writeln!(ra, "{vreg:?} -> {binding:?}")?;
        }
        writeln!(ra, "spilled: {:?}", result.spilled)?;

        log::debug!("wrote debug logs to {cf_path}, {df_path}, {ra_path}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::RegArg;
    use crate::isa::registers::GP_REGS;

    #[test]
    fn compile_runs_the_full_pipeline_and_emits_assembly() {
        let mut p = Program::new();
        let v1 = p.new_vreg();
        p.gen_li(RegArg::new(v1), 42).unwrap();
        let driver = Driver::new(Flags::new());
        let mut out = Vec::new();
        driver.compile(&mut p, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("li"));
        assert!(text.contains("ecall"));
    }

    #[test]
    fn spilling_program_still_compiles_to_valid_assembly() {
        let mut p = Program::new();
        let mut vregs = Vec::new();
        for _ in 0..(GP_REGS.len() + 1) {
            let v = p.new_vreg();
            p.gen_li(RegArg::new(v), 1).unwrap();
            vregs.push(v);
        }
        let acc = p.new_vreg();
        p.gen_addi(RegArg::new(acc), RegArg::new(vregs[0]), 0).unwrap();
        for &v in &vregs[1..] {
            p.gen_add(RegArg::new(acc), RegArg::new(acc), RegArg::new(v)).unwrap();
        }
        let driver = Driver::new(Flags::new());
        let mut out = Vec::new();
        driver.compile(&mut p, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("spill_"));
    }
}
