//! mifront-mi: GDB/MI output parsing for mifront.
//!
//! This crate turns raw lines written by a debugger running with
//! `--interpreter=mi2` into structured records. It handles byte framing,
//! the record grammar, nested values and C-string escapes. Parsing is pure:
//! nothing here knows about sessions, breakpoints or threads.

pub mod error;
pub mod escape;
pub mod framing;
pub mod parser;
pub mod record;
pub mod value;

// Re-export key types for convenience.
pub use error::SyntaxError;
pub use escape::quote;
pub use framing::LineBuffer;
pub use parser::{Parser, DEFAULT_MAX_DEPTH};
pub use record::{
    AsyncClass, AsyncKind, AsyncRecord, Record, ResultClass, ResultRecord, StreamKind,
    StreamRecord, Token,
};
pub use value::{Results, Value};
