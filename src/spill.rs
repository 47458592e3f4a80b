//! Spill materialisation (§4.6 of the design spec).
//!
//! Walks the already-allocated [`Cfg`] block by block, inserting a
//! global load before every read of a spilled vreg and a global store
//! before every eviction of a dirty one, staging the traffic through the
//! three scratch registers `crate::isa::registers::SPILL_REGS` withholds
//! from the allocator. The rewritten blocks are re-linearised back into
//! the program's flat instruction order.
//!
//! After this pass every operand in the program carries a *physical*
//! register number rather than a virtual one:
//! [`crate::ir::instruction::RegArg::vreg`] is repurposed to hold the
//! chosen [`PhysReg`]'s number directly. By this point in the pipeline
//! the virtual/physical distinction has served its purpose (P4: no vreg
//! id may leak past this pass into the printer).

use crate::diagnostics::{CodegenError, CodegenResult};
use crate::entities::{InstId, LabelId, VReg};
use crate::flowgraph::Cfg;
use crate::ir::instruction::{Instruction, InstructionData, RegArg};
use crate::ir::program::Program;
use crate::ir::Opcode;
use crate::isa::registers::{PhysReg, NUM_SPILL_REGS, SPILL_REGS};
use crate::regalloc::{Binding, RegAllocResult};
use cranelift_entity::EntityRef;
use std::collections::HashMap;

/// Maps every spilled vreg to the label backing its 4-byte data-segment
/// slot.
pub type SpillSlotMap = HashMap<VReg, LabelId>;

#[derive(Copy, Clone, Debug)]
enum Role {
    Def,
    Use,
}

/// Every register-operand slot an instruction carries, tagged with
/// whether it's read or written. Mirrors `crate::flowgraph`'s def/use
/// extraction, but returns mutable references so step 3 of spill
/// materialisation can rewrite each operand's vreg in place.
fn operand_refs(data: &mut InstructionData) -> Vec<(Role, &mut RegArg)> {
    use InstructionData::*;
    match data {
        Binary { rd, rs1, rs2 } => vec![(Role::Def, rd), (Role::Use, rs1), (Role::Use, rs2)],
        BinaryImm { rd, rs1, .. } => vec![(Role::Def, rd), (Role::Use, rs1)],
        Branch { rs1, rs2, .. } => vec![(Role::Use, rs1), (Role::Use, rs2)],
        BranchZero { rs1, .. } => vec![(Role::Use, rs1)],
        Jump { .. } => vec![],
        LoadImm { rd, .. } => vec![(Role::Def, rd)],
        LoadAddr { rd, .. } => vec![(Role::Def, rd)],
        Load { rd, rs1, .. } => vec![(Role::Def, rd), (Role::Use, rs1)],
        Store { rs1, rs2, .. } => vec![(Role::Use, rs1), (Role::Use, rs2)],
        LoadGlobal { rd, .. } => vec![(Role::Def, rd)],
        StoreGlobal { value, scratch, .. } => vec![(Role::Def, scratch), (Role::Use, value)],
        Nullary => vec![],
        SyscallRead { rd } => vec![(Role::Def, rd)],
        SyscallWrite { rs1 } => vec![(Role::Use, rs1)],
    }
}

/// `sw`/`SwGlobal`'s own address-scratch operand is a definition in
/// dataflow terms but never holds data worth preserving; writing it back
/// to memory would be both wrong (it's an address, not the stored value)
/// and wasted work.
fn is_pure_store(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::Sw | Opcode::SwGlobal)
}

fn is_terminator(opcode: Opcode) -> bool {
    opcode.is_jump_or_branch() || opcode.is_halt_or_return()
}

#[derive(Clone, Copy, Default)]
struct SlotState {
    held: Option<VReg>,
    needs_writeback: bool,
}

/// Allocates a fresh `.space 4` label for every spilled vreg, named for
/// readability in debug dumps. Sorted by vreg id so label numbering (and
/// therefore the final assembly) is deterministic regardless of the
/// allocator's internal `HashMap` iteration order (P1).
fn allocate_spill_slots(program: &mut Program, result: &RegAllocResult) -> SpillSlotMap {
    let mut spilled: Vec<VReg> = result.spilled.clone();
    spilled.sort_by_key(|v| v.index());
    spilled.dedup();
    let mut map = SpillSlotMap::new();
    for vreg in spilled {
        let label = program.create_label();
        program.set_label_name(label, &format!("spill_{}", vreg.index()));
        map.insert(vreg, label);
    }
    map
}

fn write_global(value: PhysReg, target: LabelId) -> Instruction {
    Instruction::new(
        Opcode::SwGlobal,
        InstructionData::StoreGlobal {
            value: RegArg::new(VReg::new(value.number() as usize)),
            target,
            // `t6` is excluded from both `GP_REGS` and `SPILL_REGS`, so no
            // vreg is ever allocated there and no other spill slot ever
            // claims it: it's free at every program point, making it the
            // natural dedicated address-scratch for spill writebacks.
            scratch: RegArg::new(VReg::new(PhysReg::T6.number() as usize)),
        },
    )
}

fn read_global(dest: PhysReg, target: LabelId) -> Instruction {
    Instruction::new(
        Opcode::LwGlobal,
        InstructionData::LoadGlobal {
            rd: RegArg::new(VReg::new(dest.number() as usize)),
            target,
        },
    )
}

/// Rewrites `program` in place per spill slot bookkeeping for one block,
/// returning the spilled-operand-load/store-staged instruction ids in
/// final order (not yet including the block's own re-fetched
/// instructions' relative position relative to a trailing terminator —
/// callers splice those back in).
struct BlockResult {
    body: Vec<InstId>,
    terminator_pre: Vec<InstId>,
    terminator: Option<InstId>,
    flush: Vec<InstId>,
}

fn process_block(program: &mut Program, cfg: &Cfg, result: &RegAllocResult, slots: &SpillSlotMap, block_id: crate::entities::BlockId) -> CodegenResult<BlockResult> {
    let mut state = [SlotState::default(); NUM_SPILL_REGS];
    let node_count = cfg.block(block_id).nodes.len();
    let node_insts: Vec<InstId> = cfg.block(block_id).nodes.iter().map(|n| n.inst).collect();

    let mut body = Vec::new();
    let mut terminator_pre = Vec::new();
    let mut terminator = None;

    for (node_idx, &inst_id) in node_insts.iter().enumerate() {
        let mut inst = program.inst(inst_id).clone();
        let opcode = inst.opcode;
        let mut refs = operand_refs(&mut inst.data);
        let mut assigned_slot: Vec<Option<usize>> = vec![None; refs.len()];
        // Tracks slots this instruction has already claimed for a given
        // vreg, so a value referenced by two of this instruction's
        // operands (e.g. `add rd, t, t`) is loaded once and shared rather
        // than claiming two of the only `NUM_SPILL_REGS` scratch slots.
        let mut claimed_this_inst: HashMap<VReg, usize> = HashMap::new();

        // Pass 1: reuse a slot already holding this operand's value.
        for (i, (role, r)) in refs.iter().enumerate() {
            if r.vreg.is_zero() || result.binding(r.vreg) != Binding::Spill {
                continue;
            }
            let held_slot = claimed_this_inst
                .get(&r.vreg)
                .copied()
                .or_else(|| (0..NUM_SPILL_REGS).find(|&s| state[s].held == Some(r.vreg)));
            if let Some(slot_idx) = held_slot {
                assigned_slot[i] = Some(slot_idx);
                claimed_this_inst.insert(r.vreg, slot_idx);
                if matches!(role, Role::Def) && !is_pure_store(opcode) {
                    state[slot_idx].needs_writeback = true;
                }
            }
        }

        let mut occupied: Vec<usize> = assigned_slot.iter().filter_map(|x| *x).collect();
        let mut pre_insts: Vec<Instruction> = Vec::new();

        // Pass 2: assign remaining spilled operands to a free slot.
        for (i, (role, r)) in refs.iter().enumerate() {
            if r.vreg.is_zero() || result.binding(r.vreg) != Binding::Spill || assigned_slot[i].is_some() {
                continue;
            }
            if let Some(&slot_idx) = claimed_this_inst.get(&r.vreg) {
                assigned_slot[i] = Some(slot_idx);
                if matches!(role, Role::Def) && !is_pure_store(opcode) {
                    state[slot_idx].needs_writeback = true;
                }
                continue;
            }
            let slot_idx = (0..NUM_SPILL_REGS)
                .find(|s| !occupied.contains(s))
                .ok_or(CodegenError::SpillPoolExhausted(inst_id))?;
            occupied.push(slot_idx);

            if let Some(held) = state[slot_idx].held {
                if state[slot_idx].needs_writeback {
                    pre_insts.push(write_global(SPILL_REGS[slot_idx], slots[&held]));
                }
            }
            if matches!(role, Role::Use) {
                pre_insts.push(read_global(SPILL_REGS[slot_idx], slots[&r.vreg]));
            }
            state[slot_idx] = SlotState {
                held: Some(r.vreg),
                needs_writeback: matches!(role, Role::Def) && !is_pure_store(opcode),
            };
            assigned_slot[i] = Some(slot_idx);
            claimed_this_inst.insert(r.vreg, slot_idx);
        }

        // A label on the first node of a block marks a branch target;
        // if we're inserting loads ahead of it, the label must move to
        // the first inserted instruction so jumps still land correctly.
        if node_idx == 0 && inst.label.is_some() && !pre_insts.is_empty() {
            pre_insts[0].label = inst.label.take();
        }

        // Step 3: rewrite every operand to its final physical register.
        for (i, (_, r)) in refs.iter_mut().enumerate() {
            if r.vreg.is_zero() {
                continue;
            }
            let phys = match assigned_slot[i] {
                Some(slot_idx) => SPILL_REGS[slot_idx],
                None => match result.binding(r.vreg) {
                    Binding::Phys(p) => p,
                    Binding::Spill => unreachable!("spilled operand left unassigned a slot"),
                },
            };
            r.vreg = VReg::new(phys.number() as usize);
            r.mc_whitelist = None;
        }
        drop(refs);

        let pre_ids: Vec<InstId> = pre_insts.into_iter().map(|i| program.push_raw(i)).collect();

        if node_idx + 1 == node_count && is_terminator(opcode) {
            *program.inst_mut(inst_id) = inst;
            terminator_pre = pre_ids;
            terminator = Some(inst_id);
        } else {
            *program.inst_mut(inst_id) = inst;
            body.extend(pre_ids);
            body.push(inst_id);
        }
    }

    let mut flush = Vec::new();
    for (slot_idx, s) in state.iter().enumerate() {
        if s.needs_writeback {
            let held = s.held.expect("needs_writeback implies a held vreg");
            flush.push(program.push_raw(write_global(SPILL_REGS[slot_idx], slots[&held])));
        }
    }

    Ok(BlockResult { body, terminator_pre, terminator, flush })
}

/// Runs spill materialisation over the whole CFG and returns the final,
/// fully physical-register program order (block order preserved; the end
/// sentinel contributes nothing) together with the map from spilled vreg
/// to its `.space 4` data-segment label, which the printer needs to
/// render those extra slots.
pub fn materialise_spills(program: &mut Program, cfg: &Cfg, result: &RegAllocResult) -> CodegenResult<(Vec<InstId>, SpillSlotMap)> {
    let slots = allocate_spill_slots(program, result);
    log::debug!("allocated {} spill slot(s)", slots.len());

    let mut final_order = Vec::new();
    for block_id in cfg.block_order() {
        if block_id == cfg.end() {
            continue;
        }
        let block = process_block(program, cfg, result, &slots, block_id)?;
        final_order.extend(block.body);
        final_order.extend(block.terminator_pre);
        final_order.extend(block.flush);
        if let Some(t) = block.terminator {
            final_order.push(t);
        }
    }
    Ok((final_order, slots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::RegArg as RA;
    use crate::isa::registers::GP_REGS;

    /// Forces a spill by keeping `GP_REGS.len() + 1` vregs simultaneously
    /// live, then checks that every emitted operand is either a scratch
    /// register or one of the allocator's real bindings, and that the
    /// spilled vreg gets exactly one `.space 4` slot (P4).
    #[test]
    fn spilling_emits_only_physical_and_scratch_operands() {
        let mut p = Program::new();
        let mut vregs = Vec::new();
        for _ in 0..(GP_REGS.len() + 1) {
            let v = p.new_vreg();
            p.gen_li(RA::new(v), 1).unwrap();
            vregs.push(v);
        }
        // Keep every temporary alive simultaneously by summing them all.
        let acc = p.new_vreg();
        p.gen_addi(RA::new(acc), RA::new(vregs[0]), 0).unwrap();
        for &v in &vregs[1..] {
            p.gen_add(RA::new(acc), RA::new(acc), RA::new(v)).unwrap();
        }
        p.gen_exit0().unwrap();
        crate::lowering::do_target_specific_transformations(&mut p).unwrap();
        let cfg = Cfg::build(&p).unwrap();
        let result = crate::regalloc::allocate(&cfg, &p).unwrap();
        assert!(!result.spilled.is_empty());

        let (order, _slots) = materialise_spills(&mut p, &cfg, &result).unwrap();
        p.set_order(order);

        let allocatable: std::collections::HashSet<u8> =
            GP_REGS.iter().chain(SPILL_REGS.iter()).map(|r| r.number()).collect();
        for (_, inst) in p.iter() {
            for reg in [inst.data.rd(), inst.data.rs1(), inst.data.rs2()].into_iter().flatten() {
                if reg.vreg.is_zero() {
                    continue;
                }
                assert!(
                    allocatable.contains(&(reg.vreg.index() as u8)) || reg.vreg.index() as u8 == PhysReg::T6.number(),
                    "operand {:?} is not a physical or scratch register",
                    reg.vreg
                );
            }
        }
    }

    /// A spilled vreg referenced twice by the same instruction (`add rd,
    /// t, t`) must be loaded once and shared between both operand slots,
    /// not claim two of the three scratch registers for one value.
    #[test]
    fn same_spilled_vreg_used_twice_in_one_instruction_shares_a_slot() {
        let mut p = Program::new();
        let t = p.new_vreg();
        let rd = p.new_vreg();
        p.gen_li(RA::new(t), 5).unwrap();
        p.gen_add(RA::new(rd), RA::new(t), RA::new(t)).unwrap();
        p.gen_exit0().unwrap();

        let cfg = Cfg::build(&p).unwrap();
        let mut result = RegAllocResult::default();
        result.bindings.insert(t, Binding::Spill);
        result.bindings.insert(rd, Binding::Phys(GP_REGS[0]));
        result.spilled.push(t);

        let (order, _slots) = materialise_spills(&mut p, &cfg, &result).unwrap();
        p.set_order(order);

        let loads = p.iter().filter(|(_, i)| i.opcode == Opcode::LwGlobal).count();
        assert_eq!(loads, 1, "the same spilled vreg should only be loaded once per instruction");

        let add = p.iter().find(|(_, i)| i.opcode == Opcode::Add).unwrap().1;
        assert_eq!(add.data.rs1().unwrap().vreg, add.data.rs2().unwrap().vreg);
    }
}
