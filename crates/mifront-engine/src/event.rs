//! Change notifications published to the presentation layer.

use mifront_mi::StreamKind;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::breakpoints::{Breakpoint, BreakpointId};
use crate::state::{SessionStatus, StackFrame, Thread, ThreadId};

/// One observable change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Change {
    /// A breakpoint was created or updated (`Some`) or removed (`None`).
    Breakpoint {
        id: BreakpointId,
        state: Option<Breakpoint>,
    },
    /// A thread was created or changed state (`Some`) or exited (`None`).
    Thread { id: ThreadId, state: Option<Thread> },
    /// The current thread's stack was rebuilt. Empty when invalidated.
    Stack { frames: Vec<StackFrame> },
    /// A variable object changed value (`Some`) or became invalid (`None`).
    Variable {
        handle: String,
        value: Option<String>,
    },
    Status { status: SessionStatus },
    /// Unstructured text, verbatim.
    Stream { kind: StreamKind, text: String },
    /// A protocol violation or an error nobody was waiting for.
    Diagnostic { message: String },
    CurrentThread { id: Option<ThreadId> },
    CurrentFrame { level: u32 },
}

/// Every change caused by one processed line or request, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChangeBatch {
    changes: Vec<Change>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }
}

impl IntoIterator for ChangeBatch {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Receives change batches.
pub trait Observer {
    fn publish(&mut self, batch: ChangeBatch);
}

impl Observer for mpsc::UnboundedSender<ChangeBatch> {
    fn publish(&mut self, batch: ChangeBatch) {
        if self.send(batch).is_err() {
            tracing::debug!("change receiver dropped; batch discarded");
        }
    }
}

impl Observer for Vec<ChangeBatch> {
    fn publish(&mut self, batch: ChangeBatch) {
        self.push(batch);
    }
}
