//! Driver configuration ("Flags"), mirroring the shape of the historical
//! `settings::Flags` object rather than scattering booleans through
//! function signatures (§2a of the design spec).

/// Pipeline-wide configuration, built once by the CLI and threaded
/// through [`crate::driver::Driver`].
#[derive(Debug, Clone, Default)]
pub struct Flags {
    /// Write `<base>_controlFlow.log` / `_dataFlow.log` / `_regAlloc.log`
    /// debug dumps alongside the output assembly.
    pub emit_debug_logs: bool,
    /// The `<base>` prefix debug logs are written under, when
    /// `emit_debug_logs` is set. Typically the output path with its
    /// extension stripped.
    pub debug_log_base: Option<String>,
    /// Render otherwise-fatal unlowered syscall placeholders as C-like
    /// pseudo-calls instead of rejecting them. Only meaningful together
    /// with `emit_debug_logs`; real builds never set this.
    pub debug_dump_assembly: bool,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }
}
