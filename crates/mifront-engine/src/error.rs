//! Engine error types.

use mifront_mi::{SyntaxError, Token};
use thiserror::Error;

use crate::breakpoints::BreakpointId;
use crate::state::SessionStatus;

/// Errors from debugger-control operations.
///
/// Each failure is delivered to exactly one place: the reply of the
/// request that caused it, a diagnostic change, or a status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The debugger could not be started or could not load the program.
    #[error("failed to launch debugger: {0}")]
    Launch(String),

    /// A command was written after the debugger exited or was asked to.
    #[error("debugger pipe closed")]
    PipeClosed,

    /// A line of debugger output did not parse.
    #[error("protocol syntax error: {0}")]
    Protocol(#[from] SyntaxError),

    /// The debugger refused to create a breakpoint.
    #[error("breakpoint rejected: {0}")]
    BreakpointRejected(String),

    /// An expression could not be evaluated in the current frame.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The debugger exited before answering.
    #[error("session terminated")]
    SessionTerminated,

    /// The variable handle was never created or has been disposed.
    #[error("invalid variable handle: {0}")]
    InvalidHandle(String),

    /// No breakpoint with this id exists.
    #[error("unknown breakpoint: {0}")]
    UnknownBreakpoint(BreakpointId),

    /// The operation is not allowed in the current execution status.
    #[error("cannot {op} while {status}")]
    InvalidState {
        /// The refused operation.
        op: &'static str,
        /// Status at the time of the request.
        status: SessionStatus,
    },

    /// A status change outside the legal edges.
    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        /// Status before the event.
        from: SessionStatus,
        /// Status the event asked for.
        to: SessionStatus,
    },

    /// The debugger answered a command with `^error`.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// A result record named a token that is not pending.
    #[error("result for unknown token {0}")]
    UnmatchedToken(Token),

    /// A result record lacked fields the command always returns.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_launch_display() {
        let err = EngineError::Launch("gdb-missing: No such file or directory".into());
        assert_eq!(
            err.to_string(),
            "failed to launch debugger: gdb-missing: No such file or directory"
        );
    }

    #[test]
    fn error_pipe_closed_display() {
        assert_eq!(EngineError::PipeClosed.to_string(), "debugger pipe closed");
    }

    #[test]
    fn error_from_syntax_error() {
        let err: EngineError = SyntaxError::UnterminatedString { offset: 4 }.into();
        assert!(matches!(err, EngineError::Protocol(_)));
        assert!(err.to_string().contains("unterminated string"));
    }

    #[test]
    fn error_invalid_state_display() {
        let err = EngineError::InvalidState {
            op: "step",
            status: SessionStatus::Running,
        };
        assert_eq!(err.to_string(), "cannot step while running");
    }

    #[test]
    fn error_illegal_transition_display() {
        let err = EngineError::IllegalTransition {
            from: SessionStatus::NotStarted,
            to: SessionStatus::Stopped,
        };
        assert_eq!(
            err.to_string(),
            "illegal status transition: not started -> stopped"
        );
    }

    #[test]
    fn error_unmatched_token_display() {
        assert_eq!(
            EngineError::UnmatchedToken(17).to_string(),
            "result for unknown token 17"
        );
    }

    #[test]
    fn error_semantic_failures_display() {
        assert_eq!(
            EngineError::BreakpointRejected("No source file named nope.c.".into()).to_string(),
            "breakpoint rejected: No source file named nope.c."
        );
        assert_eq!(
            EngineError::Evaluation("No symbol \"y\" in current context.".into()).to_string(),
            "evaluation failed: No symbol \"y\" in current context."
        );
        assert_eq!(
            EngineError::InvalidHandle("var3".into()).to_string(),
            "invalid variable handle: var3"
        );
    }
}
