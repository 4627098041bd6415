//! MI output record types.

use serde::{Deserialize, Serialize};

use crate::value::Results;

/// Correlation token prefixed to commands and echoed on their result.
pub type Token = u64;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One parsed line of debugger output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// `[token]^class,results` answers a command.
    Result(ResultRecord),
    /// `[token]*class`, `+class` or `=class`: unsolicited state change.
    Async(AsyncRecord),
    /// `~"text"`, `@"text"`, `&"text"` or unprefixed inferior output.
    Stream(StreamRecord),
}

/// The answer to a previously issued command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    /// Token of the command this answers, if the command carried one.
    pub token: Option<Token>,
    /// Outcome class.
    pub class: ResultClass,
    /// Payload.
    pub results: Results,
}

impl ResultRecord {
    /// The `msg` of an `^error` record.
    pub fn error_message(&self) -> Option<&str> {
        match self.class {
            ResultClass::Error => Some(self.results.get_str("msg").unwrap_or("unknown error")),
            _ => None,
        }
    }
}

/// An asynchronous notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncRecord {
    /// Token, present only when the notification was caused by a tokenized command.
    pub token: Option<Token>,
    /// Which of the three async channels carried the record.
    pub kind: AsyncKind,
    /// Notification class.
    pub class: AsyncClass,
    /// Payload.
    pub results: Results,
}

/// Unstructured text output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// Which stream the text belongs to.
    pub kind: StreamKind,
    /// Decoded text, verbatim.
    pub text: String,
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

/// Result record classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultClass {
    /// `^done`
    Done,
    /// `^running` (equivalent to done for execution commands)
    Running,
    /// `^connected`
    Connected,
    /// `^error`
    Error,
    /// `^exit`
    Exit,
}

impl ResultClass {
    /// Parse the class name that follows `^`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "done" => Some(ResultClass::Done),
            "running" => Some(ResultClass::Running),
            "connected" => Some(ResultClass::Connected),
            "error" => Some(ResultClass::Error),
            "exit" => Some(ResultClass::Exit),
            _ => None,
        }
    }

    /// Whether the command succeeded.
    pub fn is_success(self) -> bool {
        !matches!(self, ResultClass::Error)
    }
}

/// The three async output channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AsyncKind {
    /// `*`: execution state changes.
    Exec,
    /// `+`: progress of slow operations.
    Status,
    /// `=`: supplementary information.
    Notify,
}

impl AsyncKind {
    /// Map a record marker to its channel.
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'*' => Some(AsyncKind::Exec),
            b'+' => Some(AsyncKind::Status),
            b'=' => Some(AsyncKind::Notify),
            _ => None,
        }
    }
}

/// Async notification classes the engine understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AsyncClass {
    Stopped,
    Running,
    ThreadCreated,
    ThreadExited,
    ThreadSelected,
    ThreadGroupAdded,
    ThreadGroupRemoved,
    ThreadGroupStarted,
    ThreadGroupExited,
    BreakpointCreated,
    BreakpointModified,
    BreakpointDeleted,
    LibraryLoaded,
    LibraryUnloaded,
    CmdParamChanged,
    MemoryChanged,
    /// Anything else, kept by name.
    Other(String),
}

impl AsyncClass {
    /// Parse the class name that follows `*`, `+` or `=`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "stopped" => AsyncClass::Stopped,
            "running" => AsyncClass::Running,
            "thread-created" => AsyncClass::ThreadCreated,
            "thread-exited" => AsyncClass::ThreadExited,
            "thread-selected" => AsyncClass::ThreadSelected,
            "thread-group-added" => AsyncClass::ThreadGroupAdded,
            "thread-group-removed" => AsyncClass::ThreadGroupRemoved,
            "thread-group-started" => AsyncClass::ThreadGroupStarted,
            "thread-group-exited" => AsyncClass::ThreadGroupExited,
            "breakpoint-created" => AsyncClass::BreakpointCreated,
            "breakpoint-modified" => AsyncClass::BreakpointModified,
            "breakpoint-deleted" => AsyncClass::BreakpointDeleted,
            "library-loaded" => AsyncClass::LibraryLoaded,
            "library-unloaded" => AsyncClass::LibraryUnloaded,
            "cmd-param-changed" => AsyncClass::CmdParamChanged,
            "memory-changed" => AsyncClass::MemoryChanged,
            other => AsyncClass::Other(other.to_string()),
        }
    }
}

/// Stream record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    /// `~`: output meant for the debugger console.
    Console,
    /// `@`: output of the program being debugged.
    Target,
    /// `&`: the debugger's internal log.
    Log,
}

impl StreamKind {
    /// Map a record marker to its stream.
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'~' => Some(StreamKind::Console),
            b'@' => Some(StreamKind::Target),
            b'&' => Some(StreamKind::Log),
            _ => None,
        }
    }
}
