//! Opaque entity references used throughout the back end.
//!
//! Virtual registers, labels, instructions and basic blocks are never passed
//! around as raw indices or pointers. Each gets its own newtype wrapping a
//! `u32`, built with [`cranelift_entity::entity_impl`] so that it can key a
//! [`cranelift_entity::PrimaryMap`] or [`cranelift_entity::SecondaryMap`].
//! Mixing up a `VReg` and an `InstId` is then a type error instead of a
//! mis-indexed array at runtime.

use cranelift_entity::entity_impl;

/// A virtual register identifier.
///
/// `0` is reserved for the hardware zero register (`x0`); it is a legal
/// operand, not a sentinel. The distinguished "not yet allocated" value is
/// [`VReg::INVALID`], which is `u32::MAX` and can never collide with a real
/// register id because [`super::ir::Program`] aborts before `next_vreg`
/// could reach it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(u32);
entity_impl!(VReg, "vreg");

impl VReg {
    /// The hardware zero register, `x0`. Always live, always reads as zero.
    pub const ZERO: VReg = VReg(0);

    /// Sentinel distinguishing "no register" from the legal register `x0`.
    pub const INVALID: VReg = VReg(u32::MAX);

    /// True for the hardware zero register.
    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

/// A label identifier. Two `Label` values with the same id are aliases of
/// the same program point; see [`crate::ir::label::LabelTable`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u32);
entity_impl!(LabelId, "label");

/// A handle to an instruction stored in a [`crate::ir::Program`]'s
/// instruction arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);
entity_impl!(InstId, "inst");

/// A handle to a basic block owned by a [`crate::flowgraph::Cfg`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);
entity_impl!(BlockId, "block");
