//! A RISC-V (RV32IM) code generation back end for the LANCE teaching
//! compiler.
//!
//! This crate owns the part of the toolchain that turns a front-end-built
//! [`ir::program::Program`] into textual RV32IM assembly: target-specific
//! lowering, control-flow/liveness analysis, linear-scan register
//! allocation with pre-colouring, spill materialisation, and the assembly
//! printer. [`driver::Driver`] runs the whole pipeline; the LANCE parser
//! and semantic analysis that build the `Program` in the first place are
//! out of scope (see [`ir_text`] for the minimal stand-in `lancec` uses).

#![warn(missing_docs, unused_import_braces)]

pub mod diagnostics;
pub mod driver;
pub mod entities;
pub mod flowgraph;
pub mod ir;
pub mod ir_text;
pub mod isa;
pub mod lowering;
pub mod printer;
pub mod regalloc;
pub mod settings;
pub mod spill;

pub use crate::diagnostics::{CodegenError, CodegenResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
