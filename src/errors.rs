//! Error handling.
//!
//! The expansion engine itself never hard-fails: malformed constructs
//! degrade to deleted spans or literal text so that partial documents still
//! produce output. Errors therefore only exist at the I/O boundary — reading
//! input for the CLI and writing to a live output sink.

use std::io;

use miette::Diagnostic;
use thiserror::Error;

/// The crate's error type.
#[derive(Debug, Error, Diagnostic)]
pub enum WeftError {
    #[error("failed to read {path}: {source}")]
    #[diagnostic(code(weft::io::read))]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write expanded output: {0}")]
    #[diagnostic(code(weft::io::write))]
    Write(#[from] io::Error),
}

impl WeftError {
    pub fn read(path: impl Into<String>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }
}

/// Renders an error with full miette diagnostics to stderr.
pub fn print_error(error: WeftError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}
