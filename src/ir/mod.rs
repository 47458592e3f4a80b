//! The intermediate representation: instructions, labels, symbols and the
//! `Program` container that owns them.

pub mod instruction;
pub mod label;
pub mod opcode;
pub mod program;
pub mod symbol;

pub use instruction::{Instruction, InstructionData, InstructionShape, RegArg};
pub use opcode::Opcode;
pub use program::Program;
pub use symbol::{Symbol, SymbolKind};
