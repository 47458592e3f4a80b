//! Control-flow graph construction and liveness analysis.
//!
//! A [`Cfg`] is built once, after target lowering, by partitioning the
//! program's flat instruction list into basic blocks and resolving each
//! terminator's label operand to the block it targets. Liveness then runs
//! as a backward fixed point over that graph. The register allocator and
//! spill materialiser both consume the same `Cfg` value; spill
//! materialisation is the only pass that rewrites it, and the final step
//! of `Driver::allocate_registers` re-linearises it back into the
//! program's instruction order.

use crate::diagnostics::{CodegenError, CodegenResult};
use crate::entities::{BlockId, InstId, VReg};
use crate::ir::instruction::InstructionData;
use crate::ir::program::Program;
use crate::isa::registers::RegSet;
use crate::isa::TargetConventions;
use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;
use std::collections::HashMap;

/// A per-CFG interned virtual register: the same `vreg` occurring at
/// several instructions collapses to one `CfgVar` whose whitelist is the
/// *intersection* of every occurrence's constraint.
#[derive(Copy, Clone, Debug)]
pub struct CfgVar {
    pub vreg: VReg,
    pub mc_whitelist: Option<RegSet>,
}

/// One instruction's position in the CFG, plus its def/use and live-in/out
/// sets (all sparse sets over the small number of vregs actually touched
/// at that program point).
#[derive(Clone, Debug)]
pub struct CfgNode {
    pub inst: InstId,
    pub defs: SmallVec<[VReg; 2]>,
    pub uses: SmallVec<[VReg; 3]>,
    pub live_in: SmallVec<[VReg; 4]>,
    pub live_out: SmallVec<[VReg; 4]>,
}

/// A basic block: a straight-line run of [`CfgNode`]s plus its
/// predecessor/successor edges, deduplicated on insertion.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub nodes: Vec<CfgNode>,
    pub pred: Vec<BlockId>,
    pub succ: Vec<BlockId>,
}

impl Block {
    fn add_pred(&mut self, b: BlockId) {
        if !self.pred.contains(&b) {
            self.pred.push(b);
        }
    }

    fn add_succ(&mut self, b: BlockId) {
        if !self.succ.contains(&b) {
            self.succ.push(b);
        }
    }
}

/// The control-flow graph for one program. `end` is a sentinel empty block
/// every halting/returning block and every fallthrough off the last block
/// drains into, so every block's successor set is never empty.
#[derive(Clone, Debug)]
pub struct Cfg {
    blocks: PrimaryMap<BlockId, Block>,
    start: BlockId,
    end: BlockId,
    registers: HashMap<VReg, CfgVar>,
}

fn set_insert(set: &mut SmallVec<[VReg; 4]>, v: VReg) -> bool {
    match set.binary_search(&v) {
        Ok(_) => false,
        Err(pos) => {
            set.insert(pos, v);
            true
        }
    }
}

fn set_union(into: &mut SmallVec<[VReg; 4]>, other: &[VReg]) -> bool {
    let mut changed = false;
    for &v in other {
        changed |= set_insert(into, v);
    }
    changed
}

/// `{rd?, scratch-as-def?}` and `{rs1?, rs2?/value?}` for one instruction,
/// matching the operand shape directly rather than going through the
/// generic [`crate::ir::instruction::InstructionShape`] accessor, since a
/// couple of shapes (`StoreGlobal`'s scratch-as-definition) don't fit that
/// record-like view.
fn defs_uses_of(data: &InstructionData) -> (SmallVec<[VReg; 2]>, SmallVec<[VReg; 3]>) {
    use InstructionData::*;
    let mut defs = SmallVec::new();
    let mut uses = SmallVec::new();
    match data {
        Binary { rd, rs1, rs2 } => {
            defs.push(rd.vreg);
            uses.push(rs1.vreg);
            uses.push(rs2.vreg);
        }
        BinaryImm { rd, rs1, .. } => {
            defs.push(rd.vreg);
            uses.push(rs1.vreg);
        }
        Branch { rs1, rs2, .. } => {
            uses.push(rs1.vreg);
            uses.push(rs2.vreg);
        }
        BranchZero { rs1, .. } => {
            uses.push(rs1.vreg);
        }
        Jump { .. } => {}
        LoadImm { rd, .. } => {
            defs.push(rd.vreg);
        }
        LoadAddr { rd, .. } => {
            defs.push(rd.vreg);
        }
        Load { rd, rs1, .. } => {
            defs.push(rd.vreg);
            uses.push(rs1.vreg);
        }
        Store { rs1, rs2, .. } => {
            uses.push(rs1.vreg);
            uses.push(rs2.vreg);
        }
        LoadGlobal { rd, .. } => {
            defs.push(rd.vreg);
        }
        StoreGlobal { value, scratch, .. } => {
            defs.push(scratch.vreg);
            uses.push(value.vreg);
        }
        Nullary => {}
        SyscallRead { rd } => {
            defs.push(rd.vreg);
        }
        SyscallWrite { rs1 } => {
            uses.push(rs1.vreg);
        }
    }
    (defs, uses)
}

impl Cfg {
    pub fn blocks(&self) -> &PrimaryMap<BlockId, Block> {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn start(&self) -> BlockId {
        self.start
    }

    pub fn end(&self) -> BlockId {
        self.end
    }

    pub fn var(&self, vreg: VReg) -> Option<&CfgVar> {
        self.registers.get(&vreg)
    }

    pub fn registers(&self) -> &HashMap<VReg, CfgVar> {
        &self.registers
    }

    /// Iterate every block id in builder order, including the sentinel end
    /// block last.
    pub fn block_order(&self) -> impl Iterator<Item = BlockId> {
        self.blocks.keys()
    }

    /// Global preorder indices of every `ecall` instruction, in the same
    /// block-then-node traversal [`crate::regalloc::collect_live_intervals`]
    /// uses to assign interval endpoints. The caller-save narrowing pass
    /// needs these to know which intervals straddle a call site.
    pub fn call_site_indices(&self, program: &Program) -> Vec<u32> {
        let mut indices = Vec::new();
        let mut index: u32 = 0;
        for block_id in self.block_order() {
            if block_id == self.end {
                continue;
            }
            for node in &self.blocks[block_id].nodes {
                if program.inst(node.inst).opcode.is_call() {
                    indices.push(index);
                }
                index += 1;
            }
        }
        indices
    }

    fn intern(&mut self, vreg: VReg, whitelist: Option<RegSet>) -> CodegenResult<()> {
        match self.registers.get_mut(&vreg) {
            None => {
                self.registers.insert(vreg, CfgVar { vreg, mc_whitelist: whitelist });
            }
            Some(existing) => {
                existing.mc_whitelist = match (existing.mc_whitelist, whitelist) {
                    (None, w) => w,
                    (w, None) => w,
                    (Some(a), Some(b)) => {
                        let merged = a.intersection(&b);
                        if merged.is_empty() {
                            return Err(CodegenError::EmptyConstraintIntersection(vreg));
                        }
                        Some(merged)
                    }
                };
            }
        }
        Ok(())
    }

    /// Build the CFG from `program`'s current (post target-lowering)
    /// instruction order, then compute liveness to a fixed point.
    pub fn build(program: &Program) -> CodegenResult<Cfg> {
        use cranelift_entity::EntityRef;
        let mut cfg = Cfg {
            blocks: PrimaryMap::new(),
            start: BlockId::new(0),
            end: BlockId::new(0),
            registers: HashMap::new(),
        };
        cfg.partition(program);
        cfg.compute_def_uses(program)?;
        cfg.compute_transitions(program)?;
        cfg.compute_liveness();
        log::debug!(
            "built CFG with {} blocks (including end sentinel)",
            cfg.blocks.keys().count()
        );
        Ok(cfg)
    }

    fn partition(&mut self, program: &Program) {
        let mut current: Option<Block> = None;
        for (id, inst) in program.iter() {
            let starts_new = inst.label.is_some() || current.is_none();
            if starts_new {
                if let Some(block) = current.take() {
                    self.blocks.push(block);
                }
                current = Some(Block::default());
            }
            let block = current.as_mut().unwrap();
            block.nodes.push(CfgNode {
                inst: id,
                defs: SmallVec::new(),
                uses: SmallVec::new(),
                live_in: SmallVec::new(),
                live_out: SmallVec::new(),
            });
            if inst.opcode.is_halt_or_return() || inst.opcode.is_jump_or_branch() {
                self.blocks.push(current.take().unwrap());
            }
        }
        if let Some(block) = current.take() {
            self.blocks.push(block);
        }
        self.start = self.blocks.keys().next().unwrap_or_else(|| self.blocks.push(Block::default()));
        self.end = self.blocks.push(Block::default());
    }

    fn compute_def_uses(&mut self, program: &Program) -> CodegenResult<()> {
        let conv = TargetConventions;
        let x0_live = conv.x0_always_live();
        for block in self.blocks.values_mut() {
            for node in &mut block.nodes {
                let inst = program.inst(node.inst);
                let (mut defs, mut uses) = defs_uses_of(&inst.data);
                if x0_live {
                    defs.retain(|v| !v.is_zero());
                    uses.retain(|v| !v.is_zero());
                }
                node.defs = defs;
                node.uses = uses;
            }
        }
        for block in self.blocks.values() {
            for node in &block.nodes {
                let inst = program.inst(node.inst);
                for reg in [inst.data.rd(), inst.data.rs1(), inst.data.rs2()].into_iter().flatten() {
                    if !reg.vreg.is_zero() {
                        self.intern(reg.vreg, reg.mc_whitelist)?;
                    }
                }
                if let InstructionData::StoreGlobal { value, scratch, .. } = &inst.data {
                    if !value.vreg.is_zero() {
                        self.intern(value.vreg, value.mc_whitelist)?;
                    }
                    if !scratch.vreg.is_zero() {
                        self.intern(scratch.vreg, scratch.mc_whitelist)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn label_owner(&self, program: &Program, label: crate::entities::LabelId) -> Option<BlockId> {
        let canon = program.labels().resolve(label);
        for id in self.blocks.keys() {
            if let Some(first) = self.blocks[id].nodes.first() {
                let first_inst = program.inst(first.inst);
                if let Some(l) = first_inst.label {
                    if program.labels().resolve(l) == canon {
                        return Some(id);
                    }
                }
            }
        }
        None
    }

    fn compute_transitions(&mut self, program: &Program) -> CodegenResult<()> {
        let order: Vec<BlockId> = self.blocks.keys().collect();
        for (idx, &id) in order.iter().enumerate() {
            if id == self.end {
                continue;
            }
            let next_block = order.get(idx + 1).copied().filter(|&b| b != self.end);
            let last_inst = match self.blocks[id].nodes.last() {
                Some(n) => n.inst,
                None => continue,
            };
            let inst = program.inst(last_inst);
            if inst.opcode.is_halt_or_return() {
                self.link(id, self.end);
                continue;
            }
            if inst.opcode.is_jump_or_branch() {
                let target = inst.data.address_param().ok_or(CodegenError::MalformedBlock(id))?;
                let owner = self
                    .label_owner(program, target)
                    .ok_or(CodegenError::UnresolvedBranchTarget(target))?;
                self.link(id, owner);
                if !inst.opcode.is_unconditional_jump() {
                    self.link(id, next_block.unwrap_or(self.end));
                }
                continue;
            }
            self.link(id, next_block.unwrap_or(self.end));
        }
        Ok(())
    }

    fn link(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].add_succ(to);
        self.blocks[to].add_pred(from);
    }

    fn compute_liveness(&mut self) {
        let order: Vec<BlockId> = self.blocks.keys().collect();
        let mut iterations = 0usize;
        loop {
            iterations += 1;
            let mut changed = false;
            for &block_id in order.iter().rev() {
                if block_id == self.end {
                    continue;
                }
                let succ_live_ins: Vec<SmallVec<[VReg; 4]>> = self.blocks[block_id]
                    .succ
                    .iter()
                    .filter_map(|&s| self.blocks[s].nodes.first().map(|n| n.live_in.clone()))
                    .collect();
                let node_count = self.blocks[block_id].nodes.len();
                for i in (0..node_count).rev() {
                    let live_out = if i + 1 < node_count {
                        self.blocks[block_id].nodes[i + 1].live_in.clone()
                    } else {
                        let mut out = SmallVec::new();
                        for live_in in &succ_live_ins {
                            set_union(&mut out, live_in);
                        }
                        out
                    };
                    let node = &mut self.blocks[block_id].nodes[i];
                    if set_union(&mut node.live_out, &live_out) {
                        changed = true;
                    }
                    if set_union(&mut node.live_in, &node.uses.clone()) {
                        changed = true;
                    }
                    let carried: SmallVec<[VReg; 4]> = node
                        .live_out
                        .iter()
                        .copied()
                        .filter(|v| !node.defs.contains(v))
                        .collect();
                    if set_union(&mut node.live_in, &carried) {
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        log::debug!("liveness reached a fixed point after {iterations} iterations");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::RegArg;
    use crate::ir::program::Program;

    #[test]
    fn straight_line_program_is_one_block_plus_sentinel() {
        let mut p = Program::new();
        let v1 = p.new_vreg();
        p.gen_li(RegArg::new(v1), 7).unwrap();
        p.gen_exit0().unwrap();
        let cfg = Cfg::build(&p).unwrap();
        assert_eq!(cfg.blocks().keys().count(), 2);
        assert_eq!(cfg.blocks()[cfg.start()].nodes.len(), 2);
    }

    #[test]
    fn branch_splits_into_blocks_and_resolves_target() {
        let mut p = Program::new();
        let v1 = p.new_vreg();
        let l = p.create_label();
        p.gen_beqz(RegArg::new(v1), l).unwrap();
        p.gen_li(RegArg::new(v1), 1).unwrap();
        p.assign_label(l);
        p.gen_exit0().unwrap();
        let cfg = Cfg::build(&p).unwrap();
        assert_eq!(cfg.blocks().keys().count(), 4);
    }

    #[test]
    fn liveness_propagates_use_before_def_across_blocks() {
        let mut p = Program::new();
        let v1 = p.new_vreg();
        let v2 = p.new_vreg();
        p.gen_li(RegArg::new(v1), 5).unwrap();
        p.gen_add(RegArg::new(v2), RegArg::new(v1), RegArg::new(v1)).unwrap();
        p.gen_exit0().unwrap();
        let cfg = Cfg::build(&p).unwrap();
        let block = &cfg.blocks()[cfg.start()];
        assert!(block.nodes[0].live_out.contains(&v1));
        assert!(!block.nodes[0].live_in.contains(&v1));
    }
}
