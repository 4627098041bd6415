//! MI syntax error types.

use thiserror::Error;

/// A line that could not be parsed as a GDB/MI output record.
///
/// Offsets are byte offsets into the line as received (after the line
/// terminator was stripped).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    /// The line ended while more input was required.
    #[error("unexpected end of line at offset {offset}: expected {expected}")]
    UnexpectedEnd {
        /// Where the input ran out.
        offset: usize,
        /// What the parser was looking for.
        expected: &'static str,
    },

    /// A character did not fit the grammar at this position.
    #[error("unexpected '{found}' at offset {offset}: expected {expected}")]
    UnexpectedChar {
        /// Offset of the offending character.
        offset: usize,
        /// The offending character.
        found: char,
        /// What the parser was looking for.
        expected: &'static str,
    },

    /// A C-string was opened but never closed.
    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString {
        /// Offset of the opening quote.
        offset: usize,
    },

    /// Tuples and lists were nested deeper than the configured limit.
    #[error("nesting exceeds {limit} levels at offset {offset}")]
    DepthExceeded {
        /// The configured limit.
        limit: usize,
        /// Offset of the bracket that crossed the limit.
        offset: usize,
    },

    /// A result record carried a class outside done/running/connected/error/exit.
    #[error("unknown result class '{0}'")]
    UnknownResultClass(String),

    /// The numeric token prefix does not fit into a token.
    #[error("invalid token '{0}'")]
    InvalidToken(String),
}

impl SyntaxError {
    /// Byte offset the error refers to, when it has one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            SyntaxError::UnexpectedEnd { offset, .. }
            | SyntaxError::UnexpectedChar { offset, .. }
            | SyntaxError::UnterminatedString { offset }
            | SyntaxError::DepthExceeded { offset, .. } => Some(*offset),
            SyntaxError::UnknownResultClass(_) | SyntaxError::InvalidToken(_) => None,
        }
    }
}
