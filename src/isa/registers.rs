//! The physical register file of the RV32IM target and the allocator's
//! register-set bitset.
//!
//! Mirrors `target_info.h`'s `enum { REG_ZERO, REG_RA, ... }` layout exactly
//! so the numbering a reader sees in disassembly matches the ABI names one
//! register at a time, but represents it as a checked newtype rather than a
//! bare `int`.

use std::fmt;

/// One of the 32 RV32IM integer registers, `x0`..`x31`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg(u8);

macro_rules! phys_regs {
    ($($name:ident = $num:expr => $abi:expr),* $(,)?) => {
        impl PhysReg {
            $(
                #[allow(missing_docs)]
                pub const $name: PhysReg = PhysReg($num);
            )*

            /// The ABI register name (`zero`, `ra`, `t0`, `s3`, `a5`, ...).
            pub fn abi_name(self) -> &'static str {
                match self.0 {
                    $($num => $abi,)*
                    _ => unreachable!("PhysReg values are constructed only from this table"),
                }
            }
        }
    };
}

phys_regs! {
    ZERO = 0  => "zero",
    RA   = 1  => "ra",
    SP   = 2  => "sp",
    GP   = 3  => "gp",
    TP   = 4  => "tp",
    T0   = 5  => "t0",
    T1   = 6  => "t1",
    T2   = 7  => "t2",
    S0   = 8  => "s0",
    S1   = 9  => "s1",
    A0   = 10 => "a0",
    A1   = 11 => "a1",
    A2   = 12 => "a2",
    A3   = 13 => "a3",
    A4   = 14 => "a4",
    A5   = 15 => "a5",
    A6   = 16 => "a6",
    A7   = 17 => "a7",
    S2   = 18 => "s2",
    S3   = 19 => "s3",
    S4   = 20 => "s4",
    S5   = 21 => "s5",
    S6   = 22 => "s6",
    S7   = 23 => "s7",
    S8   = 24 => "s8",
    S9   = 25 => "s9",
    S10  = 26 => "s10",
    S11  = 27 => "s11",
    T3   = 28 => "t3",
    T4   = 29 => "t4",
    T5   = 30 => "t5",
    T6   = 31 => "t6",
}

/// Total number of physical registers in the file.
pub const NUM_REGISTERS: usize = 32;

/// Number of physical scratch registers withheld from the allocator and
/// dedicated to staging spilled operands. Must be at least as large as the
/// maximum number of distinct register operands on any one instruction.
pub const NUM_SPILL_REGS: usize = 3;

/// The scratch registers reserved for spill materialisation, one per
/// possible operand position (`rd`, `rs1`, `rs2`).
pub const SPILL_REGS: [PhysReg; NUM_SPILL_REGS] = [PhysReg::S9, PhysReg::S10, PhysReg::S11];

/// Registers available to the linear-scan allocator, in preference order:
/// callee-saved (`s0`-`s8`), then temporaries (`t0`-`t5`), then argument
/// registers (`a0`-`a7`). `zero`, `ra`, `sp`, `gp`, `tp`, `t6` and the three
/// [`SPILL_REGS`] are never handed out.
pub const GP_REGS: [PhysReg; 23] = [
    PhysReg::S0,
    PhysReg::S1,
    PhysReg::S2,
    PhysReg::S3,
    PhysReg::S4,
    PhysReg::S5,
    PhysReg::S6,
    PhysReg::S7,
    PhysReg::S8,
    PhysReg::T0,
    PhysReg::T1,
    PhysReg::T2,
    PhysReg::T3,
    PhysReg::T4,
    PhysReg::T5,
    PhysReg::A0,
    PhysReg::A1,
    PhysReg::A2,
    PhysReg::A3,
    PhysReg::A4,
    PhysReg::A5,
    PhysReg::A6,
    PhysReg::A7,
];

/// Registers a callee is free to clobber across an `ecall`, and therefore
/// must be subtracted from the constraints of any live interval that
/// straddles a call site unless that interval is already pinned there.
pub const CALLER_SAVE: [PhysReg; 14] = [
    PhysReg::T0,
    PhysReg::T1,
    PhysReg::T2,
    PhysReg::T3,
    PhysReg::T4,
    PhysReg::T5,
    PhysReg::A0,
    PhysReg::A1,
    PhysReg::A2,
    PhysReg::A3,
    PhysReg::A4,
    PhysReg::A5,
    PhysReg::A6,
    PhysReg::A7,
];

impl PhysReg {
    /// The raw register number, `0..32`.
    pub fn number(self) -> u8 {
        self.0
    }

    /// Reconstruct a register from its raw number. Used by spill
    /// materialisation, which repurposes an operand's vreg field to carry
    /// a physical register number once allocation has finished (see
    /// `crate::spill`).
    pub fn from_number(n: u8) -> Self {
        debug_assert!((n as usize) < NUM_REGISTERS, "register number out of range: {n}");
        PhysReg(n)
    }
}

impl fmt::Debug for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abi_name())
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abi_name())
    }
}

/// A dense bitset over the 32 physical registers.
///
/// Used both as the allocator's pool of currently-free registers and as the
/// ordered-then-flattened representation of a live interval's constraint
/// set once we only need membership tests (insertion order is kept
/// separately by [`crate::regalloc::interval::LiveInterval`] when it
/// matters, since this bitset cannot preserve preference order).
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct RegSet(u32);

impl RegSet {
    /// The empty set.
    pub const EMPTY: RegSet = RegSet(0);

    /// Build a set from an iterator of registers.
    pub fn from_iter(regs: impl IntoIterator<Item = PhysReg>) -> Self {
        let mut set = Self::EMPTY;
        for r in regs {
            set.insert(r);
        }
        set
    }

    /// All 23 allocatable general-purpose registers.
    pub fn all_gp() -> Self {
        Self::from_iter(GP_REGS)
    }

    /// The caller-save subset of the allocatable registers.
    pub fn caller_save() -> Self {
        Self::from_iter(CALLER_SAVE)
    }

    /// Insert `reg` into the set.
    pub fn insert(&mut self, reg: PhysReg) {
        self.0 |= 1 << reg.0;
    }

    /// Remove `reg` from the set.
    pub fn remove(&mut self, reg: PhysReg) {
        self.0 &= !(1 << reg.0);
    }

    /// Test membership.
    pub fn contains(&self, reg: PhysReg) -> bool {
        self.0 & (1 << reg.0) != 0
    }

    /// True if the set contains no registers.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Set intersection.
    pub fn intersection(&self, other: &RegSet) -> RegSet {
        RegSet(self.0 & other.0)
    }

    /// Set difference (`self` minus `other`).
    pub fn difference(&self, other: &RegSet) -> RegSet {
        RegSet(self.0 & !other.0)
    }

    /// Iterate the set's members in increasing register-number order.
    pub fn iter(&self) -> impl Iterator<Item = PhysReg> + '_ {
        let bits = self.0;
        (0..NUM_REGISTERS as u8).filter_map(move |n| {
            if bits & (1 << n) != 0 {
                Some(PhysReg(n))
            } else {
                None
            }
        })
    }
}

impl fmt::Debug for RegSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gp_regs_excludes_reserved_and_spill_registers() {
        let gp = RegSet::all_gp();
        for reserved in [PhysReg::ZERO, PhysReg::RA, PhysReg::SP, PhysReg::GP, PhysReg::TP, PhysReg::T6] {
            assert!(!gp.contains(reserved), "{reserved:?} must not be allocatable");
        }
        for spill in SPILL_REGS {
            assert!(!gp.contains(spill), "{spill:?} is reserved for spill traffic");
        }
        assert_eq!(gp.iter().count(), 23);
    }

    #[test]
    fn caller_save_is_subset_of_gp_regs() {
        let gp = RegSet::all_gp();
        for r in CALLER_SAVE {
            assert!(gp.contains(r));
        }
    }

    #[test]
    fn set_algebra() {
        let mut s = RegSet::from_iter([PhysReg::S0, PhysReg::S1, PhysReg::T0]);
        assert!(s.contains(PhysReg::S0));
        s.remove(PhysReg::S0);
        assert!(!s.contains(PhysReg::S0));
        let other = RegSet::from_iter([PhysReg::T0]);
        assert_eq!(s.intersection(&other), other);
        assert_eq!(s.difference(&other), RegSet::from_iter([PhysReg::S1]));
    }
}
