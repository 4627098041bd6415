//! Command dispatcher.
//!
//! Assigns tokens to outgoing commands, writes them to the debugger and
//! keeps the continuation of each command until its result record arrives.
//! Results are matched by token lookup, never by arrival order.

use std::collections::HashMap;

use mifront_mi::Token;

use crate::error::EngineError;

/// Where command lines are written.
pub trait CommandSink {
    /// Write one command line (without the trailing newline).
    fn write_line(&mut self, line: &str) -> Result<(), EngineError>;

    /// Whether writes can currently succeed.
    fn is_open(&self) -> bool;

    /// Stop accepting writes and shut the other end down.
    fn close(&mut self) {}
}

/// A command waiting for its result.
#[derive(Debug)]
pub struct Pending<K> {
    pub token: Token,
    /// Command text without the token, for diagnostics.
    pub command: String,
    pub continuation: K,
}

/// A command that could not be written. The continuation is handed back so
/// the caller can still resolve it.
#[derive(Debug)]
pub struct SendFailure<K> {
    pub error: EngineError,
    pub continuation: K,
}

/// Pending-command table keyed by token.
#[derive(Debug)]
pub struct Dispatcher<K> {
    next_token: Token,
    pending: HashMap<Token, Pending<K>>,
}

impl<K> Dispatcher<K> {
    /// Create a dispatcher whose first token is 1.
    pub fn new() -> Self {
        Self {
            next_token: 1,
            pending: HashMap::new(),
        }
    }

    /// Write `text` prefixed with a fresh token and remember `continuation`.
    ///
    /// Nothing is recorded if the sink is closed or the write fails.
    pub fn send<S: CommandSink + ?Sized>(
        &mut self,
        sink: &mut S,
        text: &str,
        continuation: K,
    ) -> Result<Token, SendFailure<K>> {
        if !sink.is_open() {
            return Err(SendFailure {
                error: EngineError::PipeClosed,
                continuation,
            });
        }
        let token = self.next_token;
        if let Err(error) = sink.write_line(&format!("{token}{text}")) {
            return Err(SendFailure {
                error,
                continuation,
            });
        }
        self.next_token += 1;
        tracing::trace!("-> {}{}", token, text);
        self.pending.insert(
            token,
            Pending {
                token,
                command: text.to_string(),
                continuation,
            },
        );
        Ok(token)
    }

    /// Take the pending entry for `token`. Each token resolves at most once.
    pub fn complete(&mut self, token: Token) -> Option<Pending<K>> {
        self.pending.remove(&token)
    }

    /// Take every pending entry, oldest first.
    pub fn drain(&mut self) -> Vec<Pending<K>> {
        let mut all: Vec<_> = self.pending.drain().map(|(_, p)| p).collect();
        all.sort_by_key(|p| p.token);
        all
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, token: Token) -> bool {
        self.pending.contains_key(&token)
    }

    /// Token the next successful send will use.
    pub fn next_token(&self) -> Token {
        self.next_token
    }
}

impl<K> Default for Dispatcher<K> {
    fn default() -> Self {
        Self::new()
    }
}
