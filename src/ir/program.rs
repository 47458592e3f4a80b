//! The central IR container: instruction arena, symbol table, label table,
//! virtual-register counter and the pending-label slot.

use crate::diagnostics::{CodegenError, CodegenResult, DiagnosticSink};
use crate::entities::{InstId, LabelId, VReg};
use crate::ir::instruction::{Instruction, InstructionData, InstructionShape, RegArg};
use crate::ir::label::LabelTable;
use crate::ir::opcode::Opcode;
use crate::ir::symbol::{Symbol, SymbolKind};
use crate::isa::syscall;
use cranelift_entity::{EntityRef, PrimaryMap};
use std::collections::HashMap;

/// The IR for a single compilation unit.
///
/// Invariants (I1-I5 of the design spec): `next_vreg` strictly exceeds
/// every `VReg` referenced by an instruction; every label-assignment is
/// either the sole bearer of its id or an explicit alias; `pending_label`,
/// if set, becomes the next appended instruction's label; every
/// `address_param` resolves in `labels`; symbol names are unique. The last
/// is enforced by `symbol_index`; the others are enforced by construction
/// since every code path that could violate them lives on `Program` itself.
macro_rules! binary_ctor {
    ($name:ident, $opc:ident) => {
        pub fn $name(&mut self, rd: RegArg, rs1: RegArg, rs2: RegArg) -> CodegenResult<InstId> {
            self.gen_binary(Opcode::$opc, rd, rs1, rs2)
        }
    };
}

macro_rules! binary_imm_ctor {
    ($name:ident, $opc:ident) => {
        pub fn $name(&mut self, rd: RegArg, rs1: RegArg, imm: i32) -> CodegenResult<InstId> {
            self.gen_binary_imm(Opcode::$opc, rd, rs1, imm)
        }
    };
}

macro_rules! branch_ctor {
    ($name:ident, $opc:ident) => {
        pub fn $name(&mut self, rs1: RegArg, rs2: RegArg, target: LabelId) -> CodegenResult<InstId> {
            self.gen_branch(Opcode::$opc, rs1, rs2, target)
        }
    };
}

macro_rules! branch_zero_ctor {
    ($name:ident, $opc:ident) => {
        pub fn $name(&mut self, rs1: RegArg, target: LabelId) -> CodegenResult<InstId> {
            self.gen_branch_zero(Opcode::$opc, rs1, target)
        }
    };
}

#[derive(Clone, Debug)]
pub struct Program {
    arena: PrimaryMap<InstId, Instruction>,
    order: Vec<InstId>,
    symbols: Vec<Symbol>,
    symbol_index: HashMap<String, usize>,
    labels: LabelTable,
    next_vreg: u32,
    pending_label: Option<LabelId>,
}

impl Program {
    /// A fresh program with `x0` reserved and a global `_start` label
    /// pending on the first instruction appended (matching the historical
    /// implementation, which creates this label before the front end ever
    /// runs).
    pub fn new() -> Self {
        let mut labels = LabelTable::new();
        let start = labels.create();
        labels.set_name(start, "_start");
        labels.set_global(start, true);
        Self {
            arena: PrimaryMap::new(),
            order: Vec::new(),
            symbols: Vec::new(),
            symbol_index: HashMap::new(),
            labels,
            next_vreg: 1,
            pending_label: Some(start),
        }
    }

    // -- vregs ---------------------------------------------------------

    /// Allocate a fresh virtual register.
    pub fn new_vreg(&mut self) -> VReg {
        let v = VReg::new(self.next_vreg as usize);
        self.next_vreg += 1;
        v
    }

    fn validate_vreg(&self, v: VReg) -> CodegenResult<()> {
        if v.is_zero() || v.index() < self.next_vreg as usize {
            Ok(())
        } else {
            Err(CodegenError::UnknownVReg(v))
        }
    }

    fn validate_reg_arg(&self, r: RegArg) -> CodegenResult<()> {
        self.validate_vreg(r.vreg)
    }

    // -- symbols ---------------------------------------------------------

    /// Declare a new symbol. Reports a front-end error (via `sink`) and
    /// returns `None` for a zero-size array or a duplicate name, matching
    /// `createSymbol`'s non-fatal validation; otherwise reserves a
    /// `l_<id>`-named label and returns it.
    pub fn create_symbol(
        &mut self,
        sink: &mut DiagnosticSink,
        name: impl Into<String>,
        kind: SymbolKind,
    ) -> Option<LabelId> {
        let name = name.into();
        if let SymbolKind::IntArray(0) = kind {
            sink.emit_error(format!("array '{name}' must have a positive size"));
            return None;
        }
        if self.symbol_index.contains_key(&name) {
            sink.emit_error(format!("redeclaration of '{name}'"));
            return None;
        }
        let label = self.labels.create();
        self.labels.set_name(label, &format!("l_{name}"));
        let idx = self.symbols.len();
        self.symbols.push(Symbol {
            name: name.clone(),
            kind,
            label,
        });
        self.symbol_index.insert(name, idx);
        Some(label)
    }

    pub fn get_symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbol_index.get(name).map(|&i| &self.symbols[i])
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    // -- labels ---------------------------------------------------------

    pub fn create_label(&mut self) -> LabelId {
        self.labels.create()
    }

    pub fn set_label_name(&mut self, label: LabelId, name: &str) {
        self.labels.set_name(label, name);
    }

    pub fn set_label_global(&mut self, label: LabelId, global: bool) {
        self.labels.set_global(label, global);
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Attach `label` to the next instruction appended. If a label is
    /// already pending, the two become aliases (§4.1); see
    /// [`LabelTable::alias`] for the exact id/name-unification rule.
    pub fn assign_label(&mut self, label: LabelId) {
        self.pending_label = Some(match self.pending_label {
            Some(pending) => self.labels.alias(pending, label),
            None => label,
        });
    }

    // -- instruction arena -----------------------------------------------

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.arena[id]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.arena[id]
    }

    /// The instruction list in program order.
    pub fn order(&self) -> &[InstId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstId, &Instruction)> {
        self.order.iter().map(move |&id| (id, &self.arena[id]))
    }

    /// Insert an instruction into the arena without touching the pending
    /// label or the program order. Used by passes (target lowering, spill
    /// materialisation) that build a whole new order themselves.
    pub fn push_raw(&mut self, inst: Instruction) -> InstId {
        self.arena.push(inst)
    }

    /// Replace the program order wholesale. Used after a pass rebuilds the
    /// instruction list from scratch (target lowering; CFG
    /// re-linearisation after spill materialisation).
    pub fn set_order(&mut self, order: Vec<InstId>) {
        self.order = order;
    }

    /// Append an already-constructed instruction, consuming any pending
    /// label. This is the single path that honours invariant I3; every
    /// `gen*` constructor funnels through it.
    fn append(&mut self, mut inst: Instruction) -> CodegenResult<InstId> {
        if let Some(rd) = inst.data.rd() {
            self.validate_reg_arg(rd)?;
        }
        if let Some(rs1) = inst.data.rs1() {
            self.validate_reg_arg(rs1)?;
        }
        if let Some(rs2) = inst.data.rs2() {
            self.validate_reg_arg(rs2)?;
        }
        if inst.label.is_none() {
            inst.label = self.pending_label.take();
        } else {
            self.pending_label = None;
        }
        let id = self.arena.push(inst);
        self.order.push(id);
        Ok(id)
    }

    /// Remove the instruction at program-order position `pos`, migrating
    /// its label (and, best-effort, its comment) onto the next instruction.
    /// If there is no next instruction, or it already carries a label, a
    /// `Nop` is synthesised to host the migrated label (§4.1).
    pub fn remove_at(&mut self, pos: usize) {
        let removed_id = self.order.remove(pos);
        let removed = self.arena[removed_id].clone();
        if removed.label.is_none() {
            return;
        }
        if pos < self.order.len() && self.arena[self.order[pos]].label.is_none() {
            let next = &mut self.arena[self.order[pos]];
            next.label = removed.label;
            if next.comment.is_none() {
                next.comment = removed.comment;
            }
        } else {
            let mut nop = Instruction::new(Opcode::Nop, InstructionData::Nullary);
            nop.label = removed.label;
            nop.comment = removed.comment;
            let id = self.arena.push(nop);
            self.order.insert(pos, id);
        }
    }

    /// Append an `Exit0` syscall placeholder unless the program already
    /// ends with one; if a label is still pending, an `Exit0` is emitted
    /// unconditionally to anchor it (§4.1).
    pub fn emit_epilogue(&mut self) -> CodegenResult<InstId> {
        if self.pending_label.is_none() {
            if let Some(&last) = self.order.last() {
                if self.arena[last].opcode == Opcode::Exit0 {
                    return Ok(last);
                }
            }
        }
        self.gen_exit0()
    }

    // -- generators: R-format binary and pseudo-comparisons --------------

    fn gen_binary(&mut self, opcode: Opcode, rd: RegArg, rs1: RegArg, rs2: RegArg) -> CodegenResult<InstId> {
        self.append(Instruction::new(opcode, InstructionData::Binary { rd, rs1, rs2 }))
    }

    fn gen_binary_imm(&mut self, opcode: Opcode, rd: RegArg, rs1: RegArg, imm: i32) -> CodegenResult<InstId> {
        self.append(Instruction::new(opcode, InstructionData::BinaryImm { rd, rs1, imm }))
    }

    fn gen_branch(&mut self, opcode: Opcode, rs1: RegArg, rs2: RegArg, target: LabelId) -> CodegenResult<InstId> {
        self.append(Instruction::new(opcode, InstructionData::Branch { rs1, rs2, target }))
    }

    fn gen_branch_zero(&mut self, opcode: Opcode, rs1: RegArg, target: LabelId) -> CodegenResult<InstId> {
        self.append(Instruction::new(opcode, InstructionData::BranchZero { rs1, target }))
    }

    binary_ctor!(gen_add, Add);
    binary_ctor!(gen_sub, Sub);
    binary_ctor!(gen_and, And);
    binary_ctor!(gen_or, Or);
    binary_ctor!(gen_xor, Xor);
    binary_ctor!(gen_mul, Mul);
    binary_ctor!(gen_div, Div);
    binary_ctor!(gen_sll, Sll);
    binary_ctor!(gen_srl, Srl);
    binary_ctor!(gen_sra, Sra);
    binary_ctor!(gen_slt, Slt);
    binary_ctor!(gen_sltu, Sltu);
    binary_ctor!(gen_seq, Seq);
    binary_ctor!(gen_sne, Sne);
    binary_ctor!(gen_sge, Sge);
    binary_ctor!(gen_sgeu, Sgeu);
    binary_ctor!(gen_sgt, Sgt);
    binary_ctor!(gen_sgtu, Sgtu);
    binary_ctor!(gen_sle, Sle);
    binary_ctor!(gen_sleu, Sleu);

    binary_imm_ctor!(gen_addi, Addi);
    binary_imm_ctor!(gen_andi, Andi);
    binary_imm_ctor!(gen_ori, Ori);
    binary_imm_ctor!(gen_xori, Xori);
    binary_imm_ctor!(gen_slli, Slli);
    binary_imm_ctor!(gen_srli, Srli);
    binary_imm_ctor!(gen_srai, Srai);
    binary_imm_ctor!(gen_slti, Slti);
    binary_imm_ctor!(gen_sltiu, Sltiu);
    binary_imm_ctor!(gen_subi, Subi);
    binary_imm_ctor!(gen_muli, Muli);
    binary_imm_ctor!(gen_divi, Divi);
    binary_imm_ctor!(gen_seqi, Seqi);
    binary_imm_ctor!(gen_snei, Snei);
    binary_imm_ctor!(gen_sgei, Sgei);
    binary_imm_ctor!(gen_sgeiu, Sgeiu);
    binary_imm_ctor!(gen_sgti, Sgti);
    binary_imm_ctor!(gen_sgtiu, Sgtiu);
    binary_imm_ctor!(gen_slei, Slei);
    binary_imm_ctor!(gen_sleiu, Sleiu);

    branch_ctor!(gen_beq, Beq);
    branch_ctor!(gen_bne, Bne);
    branch_ctor!(gen_blt, Blt);
    branch_ctor!(gen_bltu, Bltu);
    branch_ctor!(gen_bge, Bge);
    branch_ctor!(gen_bgeu, Bgeu);
    branch_ctor!(gen_bgt, Bgt);
    branch_ctor!(gen_bgtu, Bgtu);
    branch_ctor!(gen_ble, Ble);
    branch_ctor!(gen_bleu, Bleu);

    branch_zero_ctor!(gen_beqz, Beqz);
    branch_zero_ctor!(gen_bnez, Bnez);
    branch_zero_ctor!(gen_blez, Blez);
    branch_zero_ctor!(gen_bgez, Bgez);
    branch_zero_ctor!(gen_bltz, Bltz);
    branch_zero_ctor!(gen_bgtz, Bgtz);

    pub fn gen_j(&mut self, target: LabelId) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::J, InstructionData::Jump { target }))
    }

    pub fn gen_li(&mut self, rd: RegArg, imm: i32) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::Li, InstructionData::LoadImm { rd, imm }))
    }

    pub fn gen_la(&mut self, rd: RegArg, target: LabelId) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::La, InstructionData::LoadAddr { rd, target }))
    }

    pub fn gen_lw(&mut self, rd: RegArg, imm: i32, rs1: RegArg) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::Lw, InstructionData::Load { rd, rs1, imm }))
    }

    pub fn gen_sw(&mut self, rs2: RegArg, imm: i32, rs1: RegArg) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::Sw, InstructionData::Store { rs1, rs2, imm }))
    }

    pub fn gen_lw_global(&mut self, rd: RegArg, target: LabelId) -> CodegenResult<InstId> {
        self.append(Instruction::new(
            Opcode::LwGlobal,
            InstructionData::LoadGlobal { rd, target },
        ))
    }

    /// `*(i32*)target = value`, using `scratch` to hold the computed
    /// address (the historical `genSWGlobal(program, value, target,
    /// scratch)`).
    pub fn gen_sw_global(&mut self, value: RegArg, target: LabelId, scratch: RegArg) -> CodegenResult<InstId> {
        self.append(Instruction::new(
            Opcode::SwGlobal,
            InstructionData::StoreGlobal { value, target, scratch },
        ))
    }

    pub fn gen_nop(&mut self) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::Nop, InstructionData::Nullary))
    }

    pub fn gen_ecall(&mut self) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::Ecall, InstructionData::Nullary))
    }

    pub fn gen_ebreak(&mut self) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::Ebreak, InstructionData::Nullary))
    }

    pub fn gen_exit0(&mut self) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::Exit0, InstructionData::Nullary))
    }

    pub fn gen_read_int(&mut self, rd: RegArg) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::ReadInt, InstructionData::SyscallRead { rd }))
    }

    pub fn gen_print_int(&mut self, rs1: RegArg) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::PrintInt, InstructionData::SyscallWrite { rs1 }))
    }

    pub fn gen_print_char(&mut self, rs1: RegArg) -> CodegenResult<InstId> {
        self.append(Instruction::new(Opcode::PrintChar, InstructionData::SyscallWrite { rs1 }))
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

/// Syscall numbers placed in `a7` by `fix_syscalls`, re-exported here so
/// front-end-adjacent callers constructing syscall placeholders directly
/// can cross-reference them without reaching into `isa`.
pub use syscall as syscall_numbers;
