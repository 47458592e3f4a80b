//! Instruction operands and the tagged-sum instruction data.

use crate::entities::{LabelId, VReg};
use crate::ir::opcode::Opcode;
use crate::isa::registers::RegSet;

/// One register operand: a virtual register plus an optional whitelist of
/// physical registers the allocator is permitted to bind it to.
///
/// A whitelist of exactly one register is how syscall argument/return
/// registers (`a0`, `a7`) and spill scratch operands get pinned (§4.2,
/// §4.6); `None` means "any allocatable general-purpose register".
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RegArg {
    pub vreg: VReg,
    pub mc_whitelist: Option<RegSet>,
}

impl RegArg {
    /// An unconstrained operand.
    pub fn new(vreg: VReg) -> Self {
        Self {
            vreg,
            mc_whitelist: None,
        }
    }

    /// An operand pinned to exactly one physical register.
    pub fn pinned(vreg: VReg, reg: crate::isa::registers::PhysReg) -> Self {
        let mut set = RegSet::EMPTY;
        set.insert(reg);
        Self {
            vreg,
            mc_whitelist: Some(set),
        }
    }

    /// An operand constrained to an arbitrary whitelist.
    pub fn constrained(vreg: VReg, whitelist: RegSet) -> Self {
        Self {
            vreg,
            mc_whitelist: Some(whitelist),
        }
    }
}

/// The operand shape carried by an instruction, one variant per RV32IM
/// format class (plus the pseudo/placeholder shapes target lowering
/// removes). Each variant owns exactly the fields its format needs — see
/// the "IR as tagged sum" design note: there is no `Instruction` state in
/// which, say, a branch carries an immediate or an R-format op carries a
/// label.
#[derive(Clone, Debug)]
pub enum InstructionData {
    /// R-format: `rd = rs1 OP rs2`. Also used by the pseudo-comparisons
    /// (`Seq`, `Sgt`, ...) before lowering rewrites them away.
    Binary {
        rd: RegArg,
        rs1: RegArg,
        rs2: RegArg,
    },
    /// I-format: `rd = rs1 OP imm`.
    BinaryImm {
        rd: RegArg,
        rs1: RegArg,
        imm: i32,
    },
    /// B-format: `if rs1 OP rs2 then goto target`.
    Branch {
        rs1: RegArg,
        rs2: RegArg,
        target: LabelId,
    },
    /// Pseudo B-format: `if rs1 OP 0 then goto target` (`Beqz` & co).
    BranchZero { rs1: RegArg, target: LabelId },
    /// Unconditional jump.
    Jump { target: LabelId },
    /// `rd = imm`.
    LoadImm { rd: RegArg, imm: i32 },
    /// `rd = &target`.
    LoadAddr { rd: RegArg, target: LabelId },
    /// `rd = *(i32*)(rs1 + imm)`.
    Load { rd: RegArg, rs1: RegArg, imm: i32 },
    /// `*(i32*)(rs1 + imm) = rs2`.
    Store { rs1: RegArg, rs2: RegArg, imm: i32 },
    /// Pseudo: `rd = *(i32*)target`.
    LoadGlobal { rd: RegArg, target: LabelId },
    /// Pseudo: `*(i32*)target = value`, using `scratch` to compute the
    /// address. `scratch` is the register the lowered `la`/`sw` pair
    /// actually writes; `value` is the register holding the value stored.
    StoreGlobal {
        value: RegArg,
        target: LabelId,
        scratch: RegArg,
    },
    /// No operands at all: `Nop`, `Ecall`, `Ebreak`, and the `Exit0`
    /// syscall placeholder (it takes neither an input nor an output).
    Nullary,
    /// The `ReadInt` syscall placeholder: produces a value.
    SyscallRead { rd: RegArg },
    /// The `PrintInt`/`PrintChar` syscall placeholders: consume a value.
    SyscallWrite { rs1: RegArg },
}

/// Record-like accessors over [`InstructionData`], so the CFG builder and
/// printer don't need to match on every variant's exact shape.
pub trait InstructionShape {
    fn rd(&self) -> Option<RegArg>;
    fn rs1(&self) -> Option<RegArg>;
    fn rs2(&self) -> Option<RegArg>;
    fn imm(&self) -> Option<i32>;
    fn address_param(&self) -> Option<LabelId>;
    fn rd_mut(&mut self) -> Option<&mut RegArg>;
    fn rs1_mut(&mut self) -> Option<&mut RegArg>;
    fn rs2_mut(&mut self) -> Option<&mut RegArg>;
}

impl InstructionShape for InstructionData {
    fn rd(&self) -> Option<RegArg> {
        use InstructionData::*;
        match self {
            Binary { rd, .. }
            | BinaryImm { rd, .. }
            | LoadImm { rd, .. }
            | LoadAddr { rd, .. }
            | Load { rd, .. }
            | LoadGlobal { rd, .. }
            | SyscallRead { rd } => Some(*rd),
            _ => None,
        }
    }

    fn rs1(&self) -> Option<RegArg> {
        use InstructionData::*;
        match self {
            Binary { rs1, .. }
            | BinaryImm { rs1, .. }
            | Branch { rs1, .. }
            | BranchZero { rs1, .. }
            | Load { rs1, .. }
            | Store { rs1, .. } => Some(*rs1),
            SyscallWrite { rs1 } => Some(*rs1),
            _ => None,
        }
    }

    fn rs2(&self) -> Option<RegArg> {
        use InstructionData::*;
        match self {
            Binary { rs2, .. } | Branch { rs2, .. } | Store { rs2, .. } => Some(*rs2),
            _ => None,
        }
    }

    fn imm(&self) -> Option<i32> {
        use InstructionData::*;
        match self {
            BinaryImm { imm, .. } | LoadImm { imm, .. } | Load { imm, .. } | Store { imm, .. } => {
                Some(*imm)
            }
            _ => None,
        }
    }

    fn address_param(&self) -> Option<LabelId> {
        use InstructionData::*;
        match self {
            Branch { target, .. }
            | BranchZero { target, .. }
            | Jump { target, .. }
            | LoadAddr { target, .. }
            | LoadGlobal { target, .. }
            | StoreGlobal { target, .. } => Some(*target),
            _ => None,
        }
    }

    fn rd_mut(&mut self) -> Option<&mut RegArg> {
        use InstructionData::*;
        match self {
            Binary { rd, .. }
            | BinaryImm { rd, .. }
            | LoadImm { rd, .. }
            | LoadAddr { rd, .. }
            | Load { rd, .. }
            | LoadGlobal { rd, .. }
            | SyscallRead { rd } => Some(rd),
            _ => None,
        }
    }

    fn rs1_mut(&mut self) -> Option<&mut RegArg> {
        use InstructionData::*;
        match self {
            Binary { rs1, .. }
            | BinaryImm { rs1, .. }
            | Branch { rs1, .. }
            | BranchZero { rs1, .. }
            | Load { rs1, .. }
            | Store { rs1, .. } => Some(rs1),
            SyscallWrite { rs1 } => Some(rs1),
            _ => None,
        }
    }

    fn rs2_mut(&mut self) -> Option<&mut RegArg> {
        use InstructionData::*;
        match self {
            Binary { rs2, .. } | Branch { rs2, .. } | Store { rs2, .. } => Some(rs2),
            _ => None,
        }
    }
}

/// One instruction: an opcode, its operand data, and the bookkeeping
/// (label, comment) the rest of the pipeline hangs off it.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub label: Option<LabelId>,
    pub opcode: Opcode,
    pub data: InstructionData,
    pub comment: Option<String>,
}

impl Instruction {
    pub fn new(opcode: Opcode, data: InstructionData) -> Self {
        Self {
            label: None,
            opcode,
            data,
            comment: None,
        }
    }

    /// `StoreGlobal`'s `scratch` operand also doubles as the value operand
    /// for `SwGlobal`'s historical `rd` slot; `value_operand` names the
    /// register actually being stored, which is `rs1` for ordinary `Store`
    /// and `value` for `StoreGlobal`.
    pub fn value_operand(&self) -> Option<RegArg> {
        match &self.data {
            InstructionData::Store { rs2, .. } => Some(*rs2),
            InstructionData::StoreGlobal { value, .. } => Some(*value),
            _ => None,
        }
    }
}
