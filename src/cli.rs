//! Command-line interface.
//!
//! This module is the entry point for all CLI commands and orchestrates the
//! engine over files and stdin.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::engine::Engine;
use crate::errors::{print_error, WeftError};

// ============================================================================
// CLI ARGUMENTS
// ============================================================================

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "weft",
    version,
    about = "A line-oriented macro processor for plain-text documents."
)]
pub struct WeftArgs {
    #[command(subcommand)]
    pub command: ArgsCommand,
}

/// An enumeration of all available CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum ArgsCommand {
    /// Expand the input and write the result to stdout.
    Run {
        /// Input files, fed in order through one session; "-" reads stdin.
        /// With no files, stdin is read.
        files: Vec<PathBuf>,
        /// Process the input but suppress the expanded output.
        #[arg(short, long)]
        quiet: bool,
    },
    /// Expand the input, then list the global macros it defines as JSON.
    Macros {
        /// Input files; "-" or no files reads stdin.
        files: Vec<PathBuf>,
    },
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

/// The main entry point for the CLI.
pub fn run() {
    let args = WeftArgs::parse();

    match args.command {
        ArgsCommand::Run { files, quiet } => {
            let input = read_inputs_or_exit(&files);
            let mut engine = Engine::new().with_diagnostics(Box::new(io::stderr()));
            if !quiet {
                engine = engine.with_output(Box::new(io::stdout().lock()));
            }
            if let Err(e) = process_input(engine, &input) {
                print_error(e);
                process::exit(1);
            }
        }

        ArgsCommand::Macros { files } => {
            let input = read_inputs_or_exit(&files);
            let mut engine = Engine::new().with_diagnostics(Box::new(io::stderr()));
            if let Err(e) = engine.feed(&input) {
                print_error(e);
                process::exit(1);
            }
            if let Err(e) = engine.end_input() {
                print_error(e);
                process::exit(1);
            }
            print_macro_dump(&engine);
        }
    }
}

fn process_input(mut engine: Engine, input: &[u8]) -> Result<(), WeftError> {
    engine.feed(input)?;
    engine.end_input()?;
    Ok(())
}

// ============================================================================
// INPUT LOADING
// ============================================================================

fn read_inputs_or_exit(files: &[PathBuf]) -> Vec<u8> {
    read_inputs(files).unwrap_or_else(|e| {
        print_error(e);
        process::exit(1);
    })
}

/// Concatenates the named inputs; `-` (and the empty file list) reads stdin.
fn read_inputs(files: &[PathBuf]) -> Result<Vec<u8>, WeftError> {
    if files.is_empty() {
        return read_stdin();
    }
    let mut input = Vec::new();
    for path in files {
        if path.as_os_str() == "-" {
            input.extend_from_slice(&read_stdin()?);
        } else {
            let bytes = std::fs::read(path)
                .map_err(|e| WeftError::read(path.to_string_lossy(), e))?;
            input.extend_from_slice(&bytes);
        }
    }
    Ok(input)
}

fn read_stdin() -> Result<Vec<u8>, WeftError> {
    let mut input = Vec::new();
    io::stdin()
        .read_to_end(&mut input)
        .map_err(|e| WeftError::read("<stdin>", e))?;
    Ok(input)
}

// ============================================================================
// MACRO DUMP
// ============================================================================

#[derive(Debug, Serialize)]
struct MacroSummary {
    name: String,
    body: String,
    multiline: bool,
}

fn print_macro_dump(engine: &Engine) {
    let mut summaries: Vec<MacroSummary> = engine
        .global_macros()
        .map(|(name, def)| MacroSummary {
            name: String::from_utf8_lossy(name).into_owned(),
            body: String::from_utf8_lossy(&def.body).into_owned(),
            multiline: !def.is_oneline(),
        })
        .collect();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));

    match serde_json::to_string_pretty(&summaries) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("failed to serialize macro dump: {e}");
            process::exit(1);
        }
    }
}
