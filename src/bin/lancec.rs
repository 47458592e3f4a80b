//! `lancec`: a standalone driver for the back end implemented by
//! `lance_codegen`.
//!
//! The production `compiler` binary's CLI parsing and LANCE front end are
//! out of this crate's scope (§1 of the design spec); this binary reads
//! the minimal textual IR notation `lance_codegen::ir_text` defines
//! instead of LANCE source, so the back end can be exercised end to end
//! from the command line.

use anyhow::{Context, Result};
use clap::Parser;
use lance_codegen::diagnostics::DiagnosticSink;
use lance_codegen::driver::Driver;
use lance_codegen::ir::program::Program;
use lance_codegen::ir_text;
use lance_codegen::settings::Flags;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// RV32IM assembly back end for the LANCE teaching compiler.
#[derive(Parser, Debug)]
#[command(name = "lancec", version, about)]
struct Args {
    /// Input file, in `lance_codegen::ir_text`'s notation.
    input: PathBuf,

    /// Output assembly path. Defaults to the input path with its
    /// extension replaced by `.asm`.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Write `<output>_controlFlow.log`, `_dataFlow.log` and
    /// `_regAlloc.log` debug dumps alongside the output.
    #[arg(long)]
    debug_logs: bool,
}

fn run(args: Args) -> Result<()> {
    let source = fs::read_to_string(&args.input).with_context(|| format!("reading {}", args.input.display()))?;

    let output = args.output.unwrap_or_else(|| args.input.with_extension("asm"));

    let mut program = Program::new();
    let mut sink = DiagnosticSink::new();
    ir_text::parse(&mut program, &mut sink, &source)?;
    if sink.has_errors() {
        for diag in sink.errors() {
            eprintln!("error: {}", diag.message);
        }
        anyhow::bail!("{} error(s); no output written", sink.error_count());
    }

    let mut flags = Flags::new();
    if args.debug_logs {
        flags.emit_debug_logs = true;
        flags.debug_log_base = Some(output.with_extension("").to_string_lossy().into_owned());
    }
    let driver = Driver::new(flags);

    let mut out = Vec::new();
    driver.compile(&mut program, &mut out).context("code generation failed")?;
    fs::write(&output, out).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("lancec: {e:#}");
            ExitCode::FAILURE
        }
    }
}
