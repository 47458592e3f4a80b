//! Error reporting surfaces.
//!
//! The back end distinguishes two error channels (§7 of the design spec):
//!
//! - [`DiagnosticSink`] is owned by the (out-of-scope) front end. It collects
//!   *source* errors — undeclared variables, bad types, and so on. The back
//!   end never writes to it; it only reads [`DiagnosticSink::has_errors`]
//!   before doing any work, mirroring the historical `emitError`/`num_error`
//!   convention without the global mutable counter.
//! - [`CodegenError`] is returned by every fallible back-end entry point. It
//!   represents a bug in the compiler or malformed IR reaching a pass that
//!   assumed it had already been validated — the historical `fatalError`
//!   sink, but typed and propagated with `?` instead of aborting the process.

use crate::entities::{InstId, LabelId, VReg};
use crate::isa::registers::PhysReg;
use thiserror::Error;

/// A single front-end diagnostic, carrying a source location opaque to the
/// back end (the front end defines its own location type and formats it
/// into `message` before handing it to the sink).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Fully formatted diagnostic text, including any source location.
    pub message: String,
}

/// Collects front-end errors so the back end can refuse to run on malformed
/// input without maintaining a global counter.
///
/// The front end constructs one of these per compilation and calls
/// [`DiagnosticSink::emit_error`] as it encounters problems. The driver calls
/// [`DiagnosticSink::has_errors`] once, before invoking
/// [`crate::driver::Driver::lower_for_target`], and declines to proceed if it
/// returns `true`.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    errors: Vec<Diagnostic>,
}

impl DiagnosticSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a front-end error. Does not stop the front end from
    /// continuing to parse or type-check; it only prevents code generation.
    pub fn emit_error(&mut self, message: impl Into<String>) {
        self.errors.push(Diagnostic {
            message: message.into(),
        });
    }

    /// Whether any error has been recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The number of errors recorded so far.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// All recorded diagnostics, in the order they were emitted.
    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }
}

/// A compiler-internal failure: malformed IR, an invariant violation, or an
/// I/O failure while reading/writing a compilation artifact.
///
/// Every variant corresponds to a `fatalError` call site in the historical
/// implementation. None of these are expected to be reachable from valid,
/// front-end-validated input; reaching one is a bug in the compiler or in
/// whatever constructed the `Program`.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// A `VReg` used in a generator call was never allocated by
    /// `Program::new_vreg`.
    #[error("virtual register {0:?} is not defined by this program (next_vreg did not exceed it)")]
    UnknownVReg(VReg),

    /// An `address_param` referenced a label not present in the program's
    /// label table (I4).
    #[error("instruction {inst:?} references undefined label {label:?}")]
    UndefinedLabel {
        /// The instruction with the dangling reference.
        inst: InstId,
        /// The label id that could not be resolved.
        label: LabelId,
    },

    /// A branch/jump target label does not head any basic block.
    #[error("label {0:?} is not the first instruction of any basic block")]
    UnresolvedBranchTarget(LabelId),

    /// Intersecting two occurrences' register whitelists for the same
    /// [`crate::flowgraph::CfgVar`] produced the empty set.
    #[error("register constraints for virtual register {0:?} are unsatisfiable (empty intersection)")]
    EmptyConstraintIntersection(VReg),

    /// Constraint seeding produced an empty ordered constraint list for a
    /// live interval before linear scan even started.
    #[error("live interval for virtual register {0:?} has no candidate physical registers")]
    EmptyConstraintList(VReg),

    /// The spill materialiser needed a scratch slot but all
    /// [`crate::isa::registers::NUM_SPILL_REGS`] were already committed to
    /// other operands of the same instruction.
    #[error("instruction {0:?} requires more than {} distinct spilled operands", crate::isa::registers::NUM_SPILL_REGS)]
    SpillPoolExhausted(InstId),

    /// Target lowering reached an opcode it does not know how to lower
    /// (should be unreachable given the closed `Opcode` enum, but pattern
    /// matches in the lowering passes are written defensively).
    #[error("opcode {0} reached target lowering without a lowering rule")]
    UnloweredOpcode(&'static str),

    /// A basic block's terminator classification produced neither a
    /// fallthrough nor a resolved jump/branch/halt edge.
    #[error("block {0:?} ends without a terminator that the CFG builder recognizes")]
    MalformedBlock(crate::entities::BlockId),

    /// A physical register constraint referenced a register outside the
    /// allocatable set (e.g. a scratch-only register) where that is not
    /// permitted.
    #[error("physical register {0:?} is not a valid constraint in this context")]
    InvalidPhysReg(PhysReg),

    /// Wraps a failure to read the input file or write an output artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for the result type returned by back-end passes.
pub type CodegenResult<T> = Result<T, CodegenError>;
