pub use crate::errors::{print_error, WeftError};

pub mod args;
pub mod cli;
pub mod engine;
pub mod errors;
pub mod interp;
pub mod macros;
pub mod scanner;
pub mod script;
pub mod syntax;

pub use crate::engine::{expand, expand_str, Engine};
pub use crate::interp::Interp;
pub use crate::script::{ScriptEngine, ScriptError, ScriptErrorKind};
