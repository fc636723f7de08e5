//! The embedded-script seam.
//!
//! The engine treats its scripting runtime as an opaque collaborator: it
//! hands over a self-contained program and gets back either a textual result,
//! "no value", or an error. The engine itself implements the
//! expression/statement fallback (`return <fragment>` first, then the bare
//! fragment), so implementations only ever see complete programs.
//!
//! [`crate::interp::Interp`] is the built-in implementation; any
//! expression-capable embeddable runtime can be plugged in instead.

use thiserror::Error;

/// Where an evaluation failed: compiling the program, or running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    Load,
    Eval,
}

/// A script failure with the runtime's own message text.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub message: String,
}

impl ScriptError {
    pub fn load(message: impl Into<String>) -> Self {
        Self {
            kind: ScriptErrorKind::Load,
            message: message.into(),
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self {
            kind: ScriptErrorKind::Eval,
            message: message.into(),
        }
    }
}

/// An embeddable script runtime.
///
/// State persists across `eval` calls for the lifetime of the instance; the
/// engine drops the instance on context reset and builds a fresh one from
/// its factory on next use. `Ok(None)` means the program produced no value
/// (or one with no textual representation), which the engine renders as
/// empty expansion text.
pub trait ScriptEngine {
    fn eval(&mut self, program: &str) -> Result<Option<String>, ScriptError>;
}

/// Builds a fresh runtime instance on first use and after every reset.
pub type ScriptEngineFactory = Box<dyn Fn() -> Box<dyn ScriptEngine>>;
