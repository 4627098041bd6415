//! mifront-engine: GDB/MI session engine.
//!
//! This crate drives a debugger subprocess: it supervises the process,
//! correlates commands with their results by token, and keeps the session
//! model (status, threads, frames, breakpoints, variable objects) in step
//! with the debugger's output. Observers receive one batch of changes per
//! processed line.

pub mod breakpoints;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod process;
pub mod session;
pub mod state;
pub mod target;
pub mod varobj;

// Re-export key types for convenience.
pub use breakpoints::{Breakpoint, BreakpointId, BreakpointKind, BreakpointManager, WatchAccess};
pub use dispatcher::{CommandSink, Dispatcher};
pub use engine::{Engine, InitialBreakpoint, LaunchSetup, Reply};
pub use error::EngineError;
pub use event::{Change, ChangeBatch, Observer};
pub use process::{ExitInfo, Origin, ProcessEvent, ProcessSupervisor};
pub use session::{Session, SessionOptions, Snapshot};
pub use state::{
    Local, SessionState, SessionStatus, StackFrame, Thread, ThreadGroup, ThreadId, ThreadState,
};
pub use target::{LaunchTarget, MemoryBlock, SourceFile};
pub use varobj::{VarFrame, VarUpdate, VariableObject, VariableObjectTracker};
