//! Linear-scan register allocation with pre-colouring constraints.
//!
//! This is a different algorithm from this tree's historical
//! graph-colouring allocator (`src/regalloc/coloring.rs` and friends):
//! live intervals are processed once in ascending start order, each picking
//! the first free register from an ordered, per-interval constraint list
//! seeded from neighbouring pinned intervals and caller-save clobbers.

use crate::diagnostics::{CodegenError, CodegenResult};
use crate::entities::VReg;
use crate::flowgraph::Cfg;
use crate::isa::registers::{PhysReg, RegSet, GP_REGS};
use std::collections::HashMap;

/// The half-open range of global instruction indices during which a vreg
/// is live, plus the ordered list of physical registers the allocator may
/// bind it to (tried left to right).
#[derive(Clone, Debug)]
pub struct LiveInterval {
    pub vreg: VReg,
    pub constraints: Vec<PhysReg>,
    pub start: u32,
    pub end: u32,
}

/// Where a vreg ended up: a physical register, or a spill (handled by
/// [`crate::spill`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    Phys(PhysReg),
    Spill,
}

/// The allocator's output: every vreg's binding, plus the spilled subset
/// in the order linear scan decided to evict them (relevant only for
/// logging; spill materialisation doesn't care about this order).
#[derive(Debug, Default)]
pub struct RegAllocResult {
    pub bindings: HashMap<VReg, Binding>,
    pub spilled: Vec<VReg>,
}

impl RegAllocResult {
    pub fn binding(&self, vreg: VReg) -> Binding {
        if vreg.is_zero() {
            return Binding::Phys(PhysReg::ZERO);
        }
        self.bindings.get(&vreg).copied().unwrap_or(Binding::Spill)
    }
}

/// Walk the CFG in block-then-node order (the program's own linear order,
/// since the CFG is built without reordering instructions) and extend
/// every live vreg's interval to cover each index it is live at.
pub fn collect_live_intervals(cfg: &Cfg) -> Vec<LiveInterval> {
    let mut spans: HashMap<VReg, (u32, u32)> = HashMap::new();
    let mut index: u32 = 0;
    for block_id in cfg.block_order() {
        if block_id == cfg.end() {
            continue;
        }
        for node in &cfg.block(block_id).nodes {
            let touched = node
                .live_in
                .iter()
                .chain(node.live_out.iter())
                .chain(node.defs.iter())
                .copied();
            for v in touched {
                spans
                    .entry(v)
                    .and_modify(|(s, e)| {
                        *s = (*s).min(index);
                        *e = (*e).max(index);
                    })
                    .or_insert((index, index));
            }
            index += 1;
        }
    }
    let mut intervals: Vec<LiveInterval> = spans
        .into_iter()
        .map(|(vreg, (start, end))| LiveInterval { vreg, constraints: Vec::new(), start, end })
        .collect();
    intervals.sort_by_key(|iv| (iv.start, iv.vreg));
    intervals
}

fn float_to_front(constraints: &mut Vec<PhysReg>, preferred: RegSet) {
    let (front, back): (Vec<PhysReg>, Vec<PhysReg>) =
        constraints.iter().copied().partition(|r| preferred.contains(*r));
    constraints.clear();
    constraints.extend(front);
    constraints.extend(back);
}

fn subtract(constraints: &mut Vec<PhysReg>, remove: RegSet) {
    constraints.retain(|r| !remove.contains(*r));
}

/// Seeds every interval's ordered constraint list: intervals whose vreg
/// carries an explicit whitelist (from a `RegArg::pinned` operand, e.g. a
/// syscall's `a0`/`a7`) get that whitelist verbatim; every other interval
/// starts from the full general-purpose set and is narrowed by forward
/// scanning the overlapping pinned intervals (§4.5).
pub fn seed_constraints(intervals: &mut [LiveInterval], cfg: &Cfg) -> CodegenResult<()> {
    let mut order: Vec<usize> = (0..intervals.len()).collect();
    order.sort_by_key(|&i| (intervals[i].start, intervals[i].vreg));

    for &i in &order {
        if let Some(whitelist) = cfg.var(intervals[i].vreg).and_then(|v| v.mc_whitelist) {
            intervals[i].constraints = whitelist.iter().collect();
        }
    }

    for (pos, &i) in order.iter().enumerate() {
        if cfg.var(intervals[i].vreg).and_then(|v| v.mc_whitelist).is_some() {
            continue;
        }
        intervals[i].constraints = GP_REGS.to_vec();
        let this_end = intervals[i].end;
        for &j in &order[pos + 1..] {
            let other_start = intervals[j].start;
            if other_start > this_end {
                break;
            }
            let Some(other_whitelist) = cfg.var(intervals[j].vreg).and_then(|v| v.mc_whitelist) else {
                continue;
            };
            if other_start == this_end {
                float_to_front(&mut intervals[i].constraints, other_whitelist);
            } else {
                subtract(&mut intervals[i].constraints, other_whitelist);
            }
        }
        if intervals[i].constraints.is_empty() {
            return Err(CodegenError::EmptyConstraintList(intervals[i].vreg));
        }
    }
    Ok(())
}

/// Subtracts the caller-save set from every interval straddling an `ecall`
/// call site, skipping intervals with an explicit whitelist of their own
/// (those are already pinned to one of the very registers a call clobbers,
/// e.g. the syscall number in `a7`, and must not be narrowed further).
pub fn handle_caller_save_registers(intervals: &mut [LiveInterval], cfg: &Cfg, call_site_indices: &[u32]) {
    if call_site_indices.is_empty() {
        return;
    }
    let caller_save = RegSet::caller_save();
    for iv in intervals.iter_mut() {
        if cfg.var(iv.vreg).and_then(|v| v.mc_whitelist).is_some() {
            continue;
        }
        if call_site_indices.iter().any(|&c| iv.start <= c && c <= iv.end) {
            subtract(&mut iv.constraints, caller_save);
        }
    }
}

/// Runs expire/assign/spill for every interval in ascending `start` order.
pub fn linear_scan(mut intervals: Vec<LiveInterval>) -> CodegenResult<RegAllocResult> {
    intervals.sort_by_key(|iv| (iv.start, iv.vreg));
    let mut free = RegSet::all_gp();
    let mut active: Vec<usize> = Vec::new(); // indices into `intervals`, kept sorted by end
    let mut result = RegAllocResult::default();

    for i in 0..intervals.len() {
        let start = intervals[i].start;

        // Expire.
        let mut preferred: Option<PhysReg> = None;
        let mut still_active = Vec::with_capacity(active.len());
        for &a in &active {
            let end = intervals[a].end;
            if end < start {
                if let Binding::Phys(r) = result.binding(intervals[a].vreg) {
                    free.insert(r);
                }
            } else if end == start {
                if let Binding::Phys(r) = result.binding(intervals[a].vreg) {
                    free.insert(r);
                    preferred = Some(r);
                }
            } else {
                still_active.push(a);
            }
        }
        active = still_active;
        if let Some(r) = preferred {
            let mut set = RegSet::EMPTY;
            set.insert(r);
            float_to_front(&mut intervals[i].constraints, set);
        }

        if intervals[i].constraints.is_empty() {
            return Err(CodegenError::EmptyConstraintList(intervals[i].vreg));
        }

        // Assign.
        if let Some(&reg) = intervals[i].constraints.iter().find(|r| free.contains(**r)) {
            free.remove(reg);
            result.bindings.insert(intervals[i].vreg, Binding::Phys(reg));
            insert_active(&mut active, &intervals, i);
            continue;
        }

        // Spill.
        if let Some(&last) = active.last() {
            let stolen_reg = match result.binding(intervals[last].vreg) {
                Binding::Phys(r) => Some(r),
                Binding::Spill => None,
            };
            if let Some(reg) = stolen_reg {
                if intervals[last].end > intervals[i].end && intervals[i].constraints.contains(&reg) {
                    result.bindings.insert(intervals[i].vreg, Binding::Phys(reg));
                    result.bindings.insert(intervals[last].vreg, Binding::Spill);
                    result.spilled.push(intervals[last].vreg);
                    active.pop();
                    insert_active(&mut active, &intervals, i);
                    log::debug!(
                        "spilled {:?} to admit {:?} into {:?}",
                        intervals[last].vreg,
                        intervals[i].vreg,
                        reg
                    );
                    continue;
                }
            }
        }
        result.bindings.insert(intervals[i].vreg, Binding::Spill);
        result.spilled.push(intervals[i].vreg);
        log::debug!("spilled {:?} (no free or stealable register)", intervals[i].vreg);
    }

    Ok(result)
}

fn insert_active(active: &mut Vec<usize>, intervals: &[LiveInterval], i: usize) {
    let pos = active.partition_point(|&a| intervals[a].end <= intervals[i].end);
    active.insert(pos, i);
}

/// Runs interval collection, constraint seeding, caller-save narrowing and
/// linear scan in sequence.
pub fn allocate(cfg: &Cfg, program: &crate::ir::Program) -> CodegenResult<RegAllocResult> {
    let mut intervals = collect_live_intervals(cfg);
    seed_constraints(&mut intervals, cfg)?;
    let call_sites = cfg.call_site_indices(program);
    handle_caller_save_registers(&mut intervals, cfg, &call_sites);
    linear_scan(intervals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_intervals_can_share_a_register() {
        let a = LiveInterval { vreg: VReg::new(1), constraints: GP_REGS.to_vec(), start: 0, end: 2 };
        let b = LiveInterval { vreg: VReg::new(2), constraints: GP_REGS.to_vec(), start: 3, end: 5 };
        let result = linear_scan(vec![a, b]).unwrap();
        assert_eq!(result.binding(VReg::new(1)), result.binding(VReg::new(2)));
    }

    #[test]
    fn overlapping_intervals_get_distinct_registers() {
        let a = LiveInterval { vreg: VReg::new(1), constraints: GP_REGS.to_vec(), start: 0, end: 5 };
        let b = LiveInterval { vreg: VReg::new(2), constraints: GP_REGS.to_vec(), start: 1, end: 5 };
        let result = linear_scan(vec![a, b]).unwrap();
        assert_ne!(result.binding(VReg::new(1)), result.binding(VReg::new(2)));
    }

    #[test]
    fn exhausting_the_pool_spills_the_latest_ending_interval() {
        let mut intervals = Vec::new();
        for n in 1..=(GP_REGS.len() as u32 + 1) {
            intervals.push(LiveInterval {
                vreg: VReg::new(n as usize),
                constraints: GP_REGS.to_vec(),
                start: 0,
                end: n,
            });
        }
        let result = linear_scan(intervals).unwrap();
        assert_eq!(result.spilled.len(), 1);
    }
}

use cranelift_entity::EntityRef;
