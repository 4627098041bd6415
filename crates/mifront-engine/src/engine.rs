//! The synchronous protocol engine.
//!
//! [`Engine`] turns one line of debugger output into zero or more state
//! changes and at most one continuation invocation, then publishes the
//! changes of that line as a single [`ChangeBatch`]. It never blocks: writes
//! go through a [`CommandSink`] and results come back through
//! [`Engine::handle_line`].

use std::fmt;

use mifront_mi::{
    quote, AsyncClass, Parser, Record, ResultClass, ResultRecord, Results, StreamKind, Value,
};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::breakpoints::{self, Breakpoint, BreakpointId, BreakpointManager, WatchAccess};
use crate::dispatcher::{CommandSink, Dispatcher, Pending, SendFailure};
use crate::error::EngineError;
use crate::event::{Change, ChangeBatch, Observer};
use crate::process::{ExitInfo, Origin};
use crate::state::{
    Local, SessionState, SessionStatus, StackFrame, StopIdentity, Thread, ThreadId, ThreadState,
};
use crate::target::{self, LaunchTarget, MemoryBlock, SourceFile};
use crate::varobj::{self, VarFrame, VariableObject, VariableObjectTracker};

/// Where the outcome of a request is delivered.
pub type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

const ACTIVE: &[SessionStatus] = &[
    SessionStatus::NotStarted,
    SessionStatus::Running,
    SessionStatus::Stopped,
];
const STOPPED: &[SessionStatus] = &[SessionStatus::Stopped];

/// A breakpoint re-established on every launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialBreakpoint {
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    pub enabled: bool,
}

/// Commands sent between spawning the debugger and loading the program.
#[derive(Debug, Clone, Default)]
pub struct LaunchSetup {
    /// Send `-gdb-set mi-async on`.
    pub async_mode: bool,
    /// Extra commands, sent verbatim.
    pub init_commands: Vec<String>,
    pub breakpoints: Vec<InitialBreakpoint>,
    /// Terminal the program's own I/O goes to (local programs only).
    pub inferior_tty: Option<String>,
}

// ---------------------------------------------------------------------------
// Continuations
// ---------------------------------------------------------------------------

enum Continuation {
    Setup,
    /// Symbol load ahead of the connect step.
    LoadProgram,
    /// Last launch step; resolves the launch reply.
    Connect {
        reply: Option<Reply<()>>,
        stops: bool,
    },
    Exec(Option<Reply<()>>),
    InsertBreakpoint(Option<Reply<Breakpoint>>),
    DeleteBreakpoints {
        ids: Vec<BreakpointId>,
        reply: Option<Reply<()>>,
    },
    EnableBreakpoint {
        id: BreakpointId,
        enabled: bool,
        reply: Option<Reply<()>>,
    },
    Condition {
        id: BreakpointId,
        condition: Option<String>,
        reply: Option<Reply<()>>,
    },
    IgnoreCount {
        id: BreakpointId,
        count: u32,
        reply: Option<Reply<()>>,
    },
    Evaluate(Option<Reply<String>>),
    CreateVariable {
        expression: String,
        reply: Option<Reply<VariableObject>>,
    },
    ListChildren {
        handle: String,
        reply: Option<Reply<Vec<VariableObject>>>,
    },
    UpdateVariables,
    DeleteVariable,
    AssignVariable {
        handle: String,
        reply: Option<Reply<String>>,
    },
    ThreadInfo,
    StackFrames,
    SelectThread {
        id: ThreadId,
        reply: Option<Reply<()>>,
    },
    SelectFrame {
        level: u32,
        reply: Option<Reply<()>>,
    },
    ListLocals(Option<Reply<Vec<Local>>>),
    SourceFiles(Option<Reply<Vec<SourceFile>>>),
    ReadMemory(Option<Reply<Vec<MemoryBlock>>>),
    Raw(Option<Reply<ResultRecord>>),
    Exit,
}

impl Continuation {
    /// Deliver `error` to the requester. Hands it back if nobody is waiting.
    fn fail(self, error: EngineError) -> Option<EngineError> {
        fn send<T>(reply: Option<Reply<T>>, error: EngineError) -> Option<EngineError> {
            match reply {
                Some(tx) => {
                    let _ = tx.send(Err(error));
                    None
                }
                None => Some(error),
            }
        }

        match self {
            Continuation::Setup
            | Continuation::LoadProgram
            | Continuation::UpdateVariables
            | Continuation::DeleteVariable
            | Continuation::ThreadInfo
            | Continuation::StackFrames
            | Continuation::Exit => Some(error),
            Continuation::Connect { reply, .. } | Continuation::Exec(reply) => send(reply, error),
            Continuation::DeleteBreakpoints { reply, .. }
            | Continuation::EnableBreakpoint { reply, .. }
            | Continuation::Condition { reply, .. }
            | Continuation::IgnoreCount { reply, .. }
            | Continuation::SelectThread { reply, .. }
            | Continuation::SelectFrame { reply, .. } => send(reply, error),
            Continuation::InsertBreakpoint(reply) => send(reply, error),
            Continuation::Evaluate(reply) => send(reply, error),
            Continuation::CreateVariable { reply, .. } => send(reply, error),
            Continuation::ListChildren { reply, .. } => send(reply, error),
            Continuation::AssignVariable { reply, .. } => send(reply, error),
            Continuation::ListLocals(reply) => send(reply, error),
            Continuation::SourceFiles(reply) => send(reply, error),
            Continuation::ReadMemory(reply) => send(reply, error),
            Continuation::Raw(reply) => send(reply, error),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One debugging session's protocol state.
pub struct Engine<S, O> {
    sink: S,
    observer: O,
    parser: Parser,
    dispatcher: Dispatcher<Continuation>,
    state: SessionState,
    breakpoints: BreakpointManager,
    variables: VariableObjectTracker,
    batch: ChangeBatch,
    /// First failed launch step, reported by the connect step.
    launch_failure: Option<String>,
}

impl<S: CommandSink, O: Observer> Engine<S, O> {
    /// Create an engine writing to `sink` and publishing to `observer`.
    pub fn new(sink: S, observer: O, parser: Parser) -> Self {
        Self {
            sink,
            observer,
            parser,
            dispatcher: Dispatcher::new(),
            state: SessionState::new(),
            breakpoints: BreakpointManager::new(),
            variables: VariableObjectTracker::new(),
            batch: ChangeBatch::new(),
            launch_failure: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    pub fn variables(&self) -> &VariableObjectTracker {
        &self.variables
    }

    /// Commands still waiting for their result.
    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    // -- lifecycle ----------------------------------------------------------

    /// Configure the freshly spawned debugger and load `program`.
    pub fn launch(
        &mut self,
        program: &str,
        args: &[String],
        setup: &LaunchSetup,
        reply: Option<Reply<()>>,
    ) {
        self.start(&LaunchTarget::local(program, args), setup, reply);
    }

    /// Configure the freshly spawned debugger and establish `target`.
    ///
    /// `reply` resolves once the program is loaded or the target connected;
    /// any failure on the way is a [`EngineError::Launch`]. Attach, core
    /// and remote targets leave the session stopped. Initial breakpoints are
    /// inserted afterwards and report through change notifications only.
    pub fn start(&mut self, target: &LaunchTarget, setup: &LaunchSetup, reply: Option<Reply<()>>) {
        info!("starting {}", target);
        self.launch_failure = None;
        if setup.async_mode {
            self.issue("-gdb-set mi-async on", Continuation::Setup);
        }
        self.issue("-gdb-set pagination off", Continuation::Setup);
        self.issue("-gdb-set confirm off", Continuation::Setup);
        for command in &setup.init_commands {
            self.issue(command, Continuation::Setup);
        }

        let connect = Continuation::Connect {
            reply,
            stops: target.stops_on_connect(),
        };
        match target {
            LaunchTarget::Local { program, args } => {
                if let Some(tty) = &setup.inferior_tty {
                    self.issue(&format!("-inferior-tty-set {}", quote(tty)), Continuation::Setup);
                }
                self.issue(&load_command(program), connect);
                if !args.is_empty() {
                    self.issue(
                        &format!("-exec-arguments {}", join_arguments(args)),
                        Continuation::Setup,
                    );
                }
            }
            _ => {
                if let Some(program) = target.program() {
                    self.issue(&load_command(program), Continuation::LoadProgram);
                }
                if let Some(command) = target.connect_command() {
                    self.issue(&command, connect);
                }
                if let LaunchTarget::Remote {
                    download: true,
                    program: Some(_),
                    ..
                } = target
                {
                    self.issue("-target-download", Continuation::Setup);
                }
            }
        }

        for bp in &setup.breakpoints {
            let command =
                breakpoints::insert_command(&bp.file, bp.line, bp.condition.as_deref(), bp.enabled);
            self.issue(&command, Continuation::InsertBreakpoint(None));
        }
        self.flush();
    }

    /// Ask the debugger to exit and shut the pipe down.
    pub fn terminate(&mut self) {
        if self.sink.is_open() {
            self.issue("-gdb-exit", Continuation::Exit);
        }
        self.sink.close();
        self.flush();
    }

    // -- execution ----------------------------------------------------------

    /// Start the program from the beginning.
    pub fn run(&mut self, reply: Option<Reply<()>>) {
        self.exec(
            "run",
            "-exec-run",
            &[SessionStatus::NotStarted, SessionStatus::Stopped],
            reply,
        );
    }

    /// Resume a stopped program, or start one that has not run yet.
    pub fn continue_execution(&mut self, reply: Option<Reply<()>>) {
        if self.status() == SessionStatus::NotStarted {
            self.run(reply);
        } else {
            self.exec("continue", "-exec-continue", STOPPED, reply);
        }
    }

    pub fn step(&mut self, reply: Option<Reply<()>>) {
        self.exec("step", "-exec-step", STOPPED, reply);
    }

    pub fn next(&mut self, reply: Option<Reply<()>>) {
        self.exec("next", "-exec-next", STOPPED, reply);
    }

    /// Run until the selected frame returns.
    pub fn finish(&mut self, reply: Option<Reply<()>>) {
        self.exec("finish", "-exec-finish", STOPPED, reply);
    }

    /// Resume execution at `file:line`.
    pub fn jump(&mut self, file: &str, line: u32, reply: Option<Reply<()>>) {
        let command = format!("-exec-jump {}", quote(&format!("{file}:{line}")));
        self.exec("jump", &command, STOPPED, reply);
    }

    pub fn interrupt(&mut self, reply: Option<Reply<()>>) {
        self.exec(
            "interrupt",
            "-exec-interrupt",
            &[SessionStatus::Running],
            reply,
        );
    }

    fn exec(
        &mut self,
        op: &'static str,
        command: &str,
        allowed: &[SessionStatus],
        reply: Option<Reply<()>>,
    ) {
        match self.check_status(op, allowed) {
            Ok(()) => {
                self.issue(command, Continuation::Exec(reply));
            }
            Err(e) => self.deliver(reply, Err(e)),
        }
        self.flush();
    }

    // -- breakpoints --------------------------------------------------------

    pub fn set_breakpoint(
        &mut self,
        file: &str,
        line: u32,
        condition: Option<&str>,
        reply: Option<Reply<Breakpoint>>,
    ) {
        let command = breakpoints::insert_command(file, line, condition, true);
        self.request("set breakpoint", ACTIVE, &command, Continuation::InsertBreakpoint(reply));
    }

    pub fn set_function_breakpoint(
        &mut self,
        function: &str,
        condition: Option<&str>,
        reply: Option<Reply<Breakpoint>>,
    ) {
        let command = breakpoints::insert_function_command(function, condition);
        self.request("set breakpoint", ACTIVE, &command, Continuation::InsertBreakpoint(reply));
    }

    pub fn set_watchpoint(
        &mut self,
        expression: &str,
        access: WatchAccess,
        reply: Option<Reply<Breakpoint>>,
    ) {
        let command = breakpoints::watch_command(expression, access);
        self.request("set watchpoint", ACTIVE, &command, Continuation::InsertBreakpoint(reply));
    }

    /// Delete a breakpoint. The row stays until the debugger confirms.
    pub fn remove_breakpoint(&mut self, id: BreakpointId, reply: Option<Reply<()>>) {
        if !self.breakpoints.contains(id) {
            self.deliver(reply, Err(EngineError::UnknownBreakpoint(id)));
            self.flush();
            return;
        }
        let command = breakpoints::delete_command(&[id]);
        self.request(
            "remove breakpoint",
            ACTIVE,
            &command,
            Continuation::DeleteBreakpoints {
                ids: vec![id],
                reply,
            },
        );
    }

    pub fn remove_all_breakpoints(&mut self, reply: Option<Reply<()>>) {
        let ids = self.breakpoints.ids();
        if ids.is_empty() {
            self.deliver(reply, Ok(()));
            return;
        }
        let command = breakpoints::delete_command(&ids);
        self.request(
            "remove breakpoints",
            ACTIVE,
            &command,
            Continuation::DeleteBreakpoints { ids, reply },
        );
    }

    pub fn toggle_breakpoint(&mut self, id: BreakpointId, enabled: bool, reply: Option<Reply<()>>) {
        if !self.breakpoints.contains(id) {
            self.deliver(reply, Err(EngineError::UnknownBreakpoint(id)));
            self.flush();
            return;
        }
        let command = breakpoints::enable_command(id, enabled);
        self.request(
            "toggle breakpoint",
            ACTIVE,
            &command,
            Continuation::EnableBreakpoint { id, enabled, reply },
        );
    }

    pub fn set_condition(
        &mut self,
        id: BreakpointId,
        condition: Option<&str>,
        reply: Option<Reply<()>>,
    ) {
        if !self.breakpoints.contains(id) {
            self.deliver(reply, Err(EngineError::UnknownBreakpoint(id)));
            self.flush();
            return;
        }
        let command = breakpoints::condition_command(id, condition);
        self.request(
            "set condition",
            ACTIVE,
            &command,
            Continuation::Condition {
                id,
                condition: condition.map(str::to_string),
                reply,
            },
        );
    }

    pub fn set_ignore_count(&mut self, id: BreakpointId, count: u32, reply: Option<Reply<()>>) {
        if !self.breakpoints.contains(id) {
            self.deliver(reply, Err(EngineError::UnknownBreakpoint(id)));
            self.flush();
            return;
        }
        let command = breakpoints::ignore_command(id, count);
        self.request(
            "set ignore count",
            ACTIVE,
            &command,
            Continuation::IgnoreCount { id, count, reply },
        );
    }

    // -- data ---------------------------------------------------------------

    pub fn evaluate(&mut self, expression: &str, reply: Option<Reply<String>>) {
        let command = format!("-data-evaluate-expression {}", quote(expression));
        self.request("evaluate", ACTIVE, &command, Continuation::Evaluate(reply));
    }

    pub fn create_variable(
        &mut self,
        expression: &str,
        frame: VarFrame,
        reply: Option<Reply<VariableObject>>,
    ) {
        let handle = self.variables.next_handle();
        let command = varobj::create_command(&handle, expression, frame);
        self.request(
            "create variable",
            ACTIVE,
            &command,
            Continuation::CreateVariable {
                expression: expression.to_string(),
                reply,
            },
        );
    }

    /// Children of `handle`, from cache or fetched on first use.
    pub fn expand_variable(&mut self, handle: &str, reply: Option<Reply<Vec<VariableObject>>>) {
        let cached = self.variables.cached_children(handle);
        let expandable = self.variables.get(handle).is_some_and(|v| v.expandable);
        match cached {
            Err(e) => self.deliver(reply, Err(e)),
            Ok(Some(children)) => self.deliver(reply, Ok(children)),
            Ok(None) if !expandable => self.deliver(reply, Ok(Vec::new())),
            Ok(None) => {
                let command = varobj::list_children_command(handle);
                self.request(
                    "expand variable",
                    ACTIVE,
                    &command,
                    Continuation::ListChildren {
                        handle: handle.to_string(),
                        reply,
                    },
                );
                return;
            }
        }
        self.flush();
    }

    /// Invalidate `handle` and its descendants now, then delete it in the
    /// debugger.
    pub fn dispose_variable(&mut self, handle: &str, reply: Option<Reply<()>>) {
        match self.variables.dispose(handle) {
            Ok(removed) => {
                for handle in removed {
                    self.batch.push(Change::Variable {
                        handle,
                        value: None,
                    });
                }
                if self.sink.is_open() {
                    self.issue(&varobj::delete_command(handle), Continuation::DeleteVariable);
                }
                self.deliver(reply, Ok(()));
            }
            Err(e) => self.deliver(reply, Err(e)),
        }
        self.flush();
    }

    pub fn assign_variable(&mut self, handle: &str, value: &str, reply: Option<Reply<String>>) {
        if let Err(e) = self.variables.require(handle) {
            self.deliver(reply, Err(e));
            self.flush();
            return;
        }
        let command = varobj::assign_command(handle, value);
        self.request(
            "assign variable",
            ACTIVE,
            &command,
            Continuation::AssignVariable {
                handle: handle.to_string(),
                reply,
            },
        );
    }

    // -- threads and frames -------------------------------------------------

    pub fn select_thread(&mut self, id: ThreadId, reply: Option<Reply<()>>) {
        let command = format!("-thread-select {id}");
        self.request(
            "select thread",
            STOPPED,
            &command,
            Continuation::SelectThread { id, reply },
        );
    }

    pub fn select_frame(&mut self, level: u32, reply: Option<Reply<()>>) {
        let command = format!("-stack-select-frame {level}");
        self.request(
            "select frame",
            STOPPED,
            &command,
            Continuation::SelectFrame { level, reply },
        );
    }

    pub fn list_locals(&mut self, reply: Option<Reply<Vec<Local>>>) {
        self.request(
            "list locals",
            STOPPED,
            "-stack-list-variables --simple-values",
            Continuation::ListLocals(reply),
        );
    }

    // -- target -------------------------------------------------------------

    /// Source files the executable was built from.
    pub fn list_source_files(&mut self, reply: Option<Reply<Vec<SourceFile>>>) {
        self.request(
            "list source files",
            ACTIVE,
            "-file-list-exec-source-files",
            Continuation::SourceFiles(reply),
        );
    }

    /// Read `count` bytes starting at `address`.
    pub fn read_memory(&mut self, address: u64, count: usize, reply: Option<Reply<Vec<MemoryBlock>>>) {
        let command = target::read_memory_command(address, count);
        self.request("read memory", STOPPED, &command, Continuation::ReadMemory(reply));
    }

    /// Send an arbitrary command and hand back its result record.
    pub fn raw_command(&mut self, command: &str, reply: Option<Reply<ResultRecord>>) {
        let command = command.trim();
        if command.is_empty() {
            self.deliver(reply, Err(EngineError::CommandFailed("empty command".into())));
            self.flush();
            return;
        }
        self.request("send command", ACTIVE, command, Continuation::Raw(reply));
    }

    // -- input --------------------------------------------------------------

    /// Process one line of debugger output and publish its changes.
    pub fn handle_line(&mut self, origin: Origin, line: &str) {
        match origin {
            Origin::Stderr => self.batch.push(Change::Stream {
                kind: StreamKind::Log,
                text: line.to_string(),
            }),
            Origin::Stdout => match self.parser.parse_line(line) {
                Ok(None) => {}
                Ok(Some(Record::Result(record))) => self.on_result(record),
                Ok(Some(Record::Async(record))) => {
                    self.on_async(&record.class, &record.results)
                }
                Ok(Some(Record::Stream(record))) => self.batch.push(Change::Stream {
                    kind: record.kind,
                    text: record.text,
                }),
                Err(e) => {
                    self.diagnostic(EngineError::Protocol(e));
                    self.batch.push(Change::Stream {
                        kind: StreamKind::Log,
                        text: line.to_string(),
                    });
                }
            },
        }
        self.flush();
    }

    /// The debugger process is gone: fail everything pending and end the
    /// session.
    pub fn handle_exit(&mut self, exit: ExitInfo) {
        info!("debugger exited with {:?}", exit);
        for pending in self.dispatcher.drain() {
            if let Some(err) = pending.continuation.fail(EngineError::SessionTerminated) {
                debug!("{} abandoned: {}", pending.command, err);
            }
        }
        let status = if exit.success() {
            SessionStatus::Exited
        } else {
            SessionStatus::TerminatedAbnormally
        };
        self.set_status(status);
        self.sink.close();
        self.variables.clear();
        self.breakpoints.clear();
        self.state.clear();
        self.flush();
    }

    // -- internals ----------------------------------------------------------

    fn check_status(&self, op: &'static str, allowed: &[SessionStatus]) -> Result<(), EngineError> {
        let status = self.state.status();
        if status.is_terminal() || !self.sink.is_open() {
            return Err(EngineError::PipeClosed);
        }
        if allowed.contains(&status) {
            Ok(())
        } else {
            Err(EngineError::InvalidState { op, status })
        }
    }

    /// Status check, send, publish.
    fn request(
        &mut self,
        op: &'static str,
        allowed: &[SessionStatus],
        command: &str,
        continuation: Continuation,
    ) {
        match self.check_status(op, allowed) {
            Ok(()) => {
                self.issue(command, continuation);
            }
            Err(e) => self.fail(continuation, e),
        }
        self.flush();
    }

    fn issue(&mut self, command: &str, continuation: Continuation) -> bool {
        match self.dispatcher.send(&mut self.sink, command, continuation) {
            Ok(_) => true,
            Err(SendFailure {
                error,
                continuation,
            }) => {
                self.fail(continuation, error);
                false
            }
        }
    }

    fn fail(&mut self, continuation: Continuation, error: EngineError) {
        if let Some(error) = continuation.fail(error) {
            self.diagnostic(error);
        }
    }

    fn deliver<T>(&mut self, reply: Option<Reply<T>>, result: Result<T, EngineError>) {
        match reply {
            Some(tx) => {
                if tx.send(result).is_err() {
                    debug!("requester went away before its reply");
                }
            }
            None => {
                if let Err(e) = result {
                    self.diagnostic(e);
                }
            }
        }
    }

    fn diagnostic(&mut self, message: impl fmt::Display) {
        let message = message.to_string();
        warn!("{}", message);
        self.batch.push(Change::Diagnostic { message });
    }

    fn flush(&mut self) {
        if !self.batch.is_empty() {
            let batch = std::mem::take(&mut self.batch);
            self.observer.publish(batch);
        }
    }

    fn set_status(&mut self, to: SessionStatus) -> bool {
        match self.state.transition(to) {
            Ok(true) => {
                if to == SessionStatus::Running || to.is_terminal() {
                    self.invalidate_stack();
                }
                self.batch.push(Change::Status { status: to });
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.diagnostic(e);
                false
            }
        }
    }

    fn invalidate_stack(&mut self) {
        if self.state.invalidate_frames() {
            self.batch.push(Change::Stack { frames: Vec::new() });
        }
    }

    fn push_threads(&mut self, ids: impl IntoIterator<Item = ThreadId>) {
        for id in ids {
            let state = self.state.thread(id).cloned();
            self.batch.push(Change::Thread { id, state });
        }
    }

    fn select_thread_locally(&mut self, id: Option<ThreadId>) {
        if self.state.set_current_thread(id) {
            self.batch.push(Change::CurrentThread { id });
        }
    }

    fn select_frame_locally(&mut self, level: u32) {
        if self.state.set_current_frame(level) {
            self.batch.push(Change::CurrentFrame { level });
        }
    }

    fn push_breakpoint(&mut self, id: BreakpointId) {
        let state = self.breakpoints.get(id).cloned();
        self.batch.push(Change::Breakpoint { id, state });
    }

    /// End of the debuggee: terminal status and debugger shutdown.
    fn end_session(&mut self, status: SessionStatus) {
        self.set_status(status);
        if self.sink.is_open() {
            self.issue("-gdb-exit", Continuation::Exit);
        }
        self.sink.close();
    }

    // -- result records -----------------------------------------------------

    fn on_result(&mut self, record: ResultRecord) {
        let Some(token) = record.token else {
            if record.class != ResultClass::Exit {
                self.diagnostic(EngineError::MalformedResponse(format!(
                    "result record without token: {:?}",
                    record.class
                )));
            }
            return;
        };
        match self.dispatcher.complete(token) {
            Some(pending) => self.resume(pending, record),
            None => self.diagnostic(EngineError::UnmatchedToken(token)),
        }
    }

    fn resume(&mut self, pending: Pending<Continuation>, record: ResultRecord) {
        let Pending {
            command,
            continuation,
            ..
        } = pending;
        trace!("{} completed with {:?}", command, record.class);
        let failure = record.error_message().map(str::to_string);
        let results = &record.results;

        match continuation {
            Continuation::Setup | Continuation::DeleteVariable | Continuation::Exit => {
                if let Some(msg) = failure {
                    self.diagnostic(EngineError::CommandFailed(format!("{command}: {msg}")));
                }
            }
            Continuation::LoadProgram => {
                if let Some(msg) = failure {
                    warn!("{}: {}", command, msg);
                    self.launch_failure.get_or_insert(msg);
                }
            }
            Continuation::Connect { reply, stops } => {
                let result = match self.launch_failure.take().or(failure) {
                    Some(msg) => Err(EngineError::Launch(msg)),
                    None => {
                        if stops && self.set_status(SessionStatus::Stopped) {
                            self.refresh_stopped();
                        }
                        Ok(())
                    }
                };
                self.deliver(reply, result);
            }
            Continuation::Exec(reply) => {
                let result = match failure {
                    Some(msg) => Err(EngineError::CommandFailed(msg)),
                    None => {
                        if record.class == ResultClass::Running {
                            self.set_status(SessionStatus::Running);
                        }
                        Ok(())
                    }
                };
                self.deliver(reply, result);
            }
            Continuation::InsertBreakpoint(reply) => {
                let result = match failure {
                    Some(msg) => Err(EngineError::BreakpointRejected(msg)),
                    None => match BreakpointManager::parse_inserted(results) {
                        Some(bp) => {
                            let row = self.breakpoints.upsert(bp).clone();
                            self.push_breakpoint(row.id);
                            Ok(row)
                        }
                        None => Err(EngineError::MalformedResponse(format!(
                            "{command}: no breakpoint in result"
                        ))),
                    },
                };
                self.deliver(reply, result);
            }
            Continuation::DeleteBreakpoints { ids, reply } => {
                let result = match failure {
                    Some(msg) => Err(EngineError::CommandFailed(msg)),
                    None => {
                        for id in ids {
                            if self.breakpoints.remove(id).is_some() {
                                self.batch.push(Change::Breakpoint { id, state: None });
                            }
                        }
                        Ok(())
                    }
                };
                self.deliver(reply, result);
            }
            Continuation::EnableBreakpoint { id, enabled, reply } => {
                let result = match failure {
                    Some(msg) => Err(EngineError::CommandFailed(msg)),
                    None => {
                        if self.breakpoints.set_enabled(id, enabled).is_some() {
                            self.push_breakpoint(id);
                        }
                        Ok(())
                    }
                };
                self.deliver(reply, result);
            }
            Continuation::Condition {
                id,
                condition,
                reply,
            } => {
                let result = match failure {
                    Some(msg) => Err(EngineError::CommandFailed(msg)),
                    None => {
                        if self.breakpoints.set_condition(id, condition).is_some() {
                            self.push_breakpoint(id);
                        }
                        Ok(())
                    }
                };
                self.deliver(reply, result);
            }
            Continuation::IgnoreCount { id, count, reply } => {
                let result = match failure {
                    Some(msg) => Err(EngineError::CommandFailed(msg)),
                    None => {
                        if self.breakpoints.set_ignore_count(id, count).is_some() {
                            self.push_breakpoint(id);
                        }
                        Ok(())
                    }
                };
                self.deliver(reply, result);
            }
            Continuation::Evaluate(reply) => {
                let result = match failure {
                    Some(msg) => Err(EngineError::Evaluation(msg)),
                    None => results
                        .get_str("value")
                        .map(str::to_string)
                        .ok_or_else(|| EngineError::MalformedResponse(format!("{command}: no value"))),
                };
                self.deliver(reply, result);
            }
            Continuation::CreateVariable { expression, reply } => {
                let result = match failure {
                    Some(msg) => Err(EngineError::Evaluation(msg)),
                    None => self
                        .variables
                        .insert_root(results, &expression)
                        .cloned(),
                };
                if let Ok(obj) = &result {
                    self.batch.push(Change::Variable {
                        handle: obj.handle.clone(),
                        value: obj.value.clone(),
                    });
                }
                self.deliver(reply, result);
            }
            Continuation::ListChildren { handle, reply } => {
                let result = match failure {
                    Some(msg) => Err(EngineError::Evaluation(msg)),
                    None => self.variables.set_children(&handle, results),
                };
                self.deliver(reply, result);
            }
            Continuation::UpdateVariables => match failure {
                Some(msg) => {
                    self.diagnostic(EngineError::CommandFailed(format!("{command}: {msg}")))
                }
                None => {
                    let update = self.variables.apply_update(results);
                    for change in update.changes {
                        self.batch.push(Change::Variable {
                            handle: change.handle,
                            value: change.value,
                        });
                    }
                    for handle in update.invalidated {
                        if self.sink.is_open() {
                            self.issue(&varobj::delete_command(&handle), Continuation::DeleteVariable);
                        }
                    }
                }
            },
            Continuation::AssignVariable { handle, reply } => {
                let result = match failure {
                    Some(msg) => Err(EngineError::Evaluation(msg)),
                    None => {
                        let value = results.get_str("value").unwrap_or_default().to_string();
                        self.variables.set_value(&handle, &value).map(|()| {
                            self.batch.push(Change::Variable {
                                handle: handle.clone(),
                                value: Some(value.clone()),
                            });
                            value
                        })
                    }
                };
                self.deliver(reply, result);
            }
            Continuation::ThreadInfo => match failure {
                Some(msg) => {
                    self.diagnostic(EngineError::CommandFailed(format!("{command}: {msg}")))
                }
                None => self.apply_thread_info(results),
            },
            Continuation::StackFrames => match failure {
                Some(msg) => {
                    self.diagnostic(EngineError::CommandFailed(format!("{command}: {msg}")))
                }
                None => {
                    let frames = StackFrame::list_from_mi(results);
                    if self.state.set_frames(frames.clone()) {
                        self.batch.push(Change::Stack { frames });
                    }
                }
            },
            Continuation::SelectThread { id, reply } => {
                let result = match failure {
                    Some(msg) => Err(EngineError::CommandFailed(msg)),
                    None => {
                        self.select_thread_locally(Some(id));
                        self.select_frame_locally(0);
                        self.refresh_stack();
                        Ok(())
                    }
                };
                self.deliver(reply, result);
            }
            Continuation::SelectFrame { level, reply } => {
                let result = match failure {
                    Some(msg) => Err(EngineError::CommandFailed(msg)),
                    None => {
                        self.select_frame_locally(level);
                        self.refresh_stack();
                        Ok(())
                    }
                };
                self.deliver(reply, result);
            }
            Continuation::ListLocals(reply) => {
                let result = match failure {
                    Some(msg) => Err(EngineError::CommandFailed(msg)),
                    None => Ok(Local::list_from_mi(results)),
                };
                self.deliver(reply, result);
            }
            Continuation::SourceFiles(reply) => {
                let result = match failure {
                    Some(msg) => Err(EngineError::CommandFailed(msg)),
                    None => Ok(SourceFile::list_from_mi(results)),
                };
                self.deliver(reply, result);
            }
            Continuation::ReadMemory(reply) => {
                let result = match failure {
                    Some(msg) => Err(EngineError::Evaluation(msg)),
                    None => MemoryBlock::list_from_mi(results).ok_or_else(|| {
                        EngineError::MalformedResponse(format!("{command}: unreadable memory list"))
                    }),
                };
                self.deliver(reply, result);
            }
            Continuation::Raw(reply) => {
                let result = match failure {
                    Some(msg) => Err(EngineError::CommandFailed(msg)),
                    None => Ok(record.clone()),
                };
                self.deliver(reply, result);
            }
        }
    }

    fn apply_thread_info(&mut self, results: &Results) {
        let listed: Vec<Thread> = results
            .get("threads")
            .map(|list| {
                list.items()
                    .into_iter()
                    .filter_map(Thread::from_mi)
                    .collect()
            })
            .unwrap_or_default();
        let changed = self.state.replace_threads(listed);
        self.push_threads(changed);
        if let Some(current) = results.get_parsed::<ThreadId>("current-thread-id") {
            self.select_thread_locally(Some(current));
        }
    }

    fn refresh_stack(&mut self) {
        self.invalidate_stack();
        self.issue("-stack-list-frames", Continuation::StackFrames);
    }

    // -- async records ------------------------------------------------------

    fn on_async(&mut self, class: &AsyncClass, results: &Results) {
        if self.state.status().is_terminal() {
            debug!("ignoring {:?} after session end", class);
            return;
        }
        match class {
            AsyncClass::Running => self.on_running(results),
            AsyncClass::Stopped => self.on_stopped(results),
            AsyncClass::ThreadCreated => {
                let Some(id) = results.get_parsed::<ThreadId>("id") else {
                    return;
                };
                let group = results.get_str("group-id").map(str::to_string);
                if self.state.add_thread(Thread::new(id, group)) {
                    self.push_threads([id]);
                }
            }
            AsyncClass::ThreadExited => {
                let Some(id) = results.get_parsed::<ThreadId>("id") else {
                    return;
                };
                let was_current = self.state.current_thread() == Some(id);
                if self.state.remove_thread(id) {
                    self.batch.push(Change::Thread { id, state: None });
                    if was_current {
                        self.batch.push(Change::CurrentThread { id: None });
                    }
                }
            }
            AsyncClass::ThreadSelected => {
                if let Some(id) = results.get_parsed::<ThreadId>("id") {
                    self.select_thread_locally(Some(id));
                }
                if let Some(level) = results
                    .get("frame")
                    .and_then(|f| f.get_parsed::<u32>("level"))
                {
                    self.select_frame_locally(level);
                }
            }
            AsyncClass::ThreadGroupAdded => {
                if let Some(id) = results.get_str("id") {
                    self.state.group_mut(id);
                }
            }
            AsyncClass::ThreadGroupStarted => {
                if let Some(id) = results.get_str("id") {
                    let pid = results.get_parsed("pid");
                    let group = self.state.group_mut(id);
                    group.pid = pid;
                    group.started = true;
                    group.exit_code = None;
                }
            }
            AsyncClass::ThreadGroupExited => {
                if let Some(id) = results.get_str("id") {
                    // GDB prints the exit code in octal.
                    let code = results
                        .get_str("exit-code")
                        .and_then(|c| i32::from_str_radix(c, 8).ok());
                    let group = self.state.group_mut(id);
                    group.exit_code = code;
                    group.started = false;
                }
            }
            AsyncClass::ThreadGroupRemoved => {
                if let Some(id) = results.get_str("id") {
                    self.state.remove_group(id);
                }
            }
            AsyncClass::BreakpointCreated | AsyncClass::BreakpointModified => {
                match results.get("bkpt").and_then(Breakpoint::from_mi) {
                    Some(bp) => {
                        let id = self.breakpoints.upsert(bp).id;
                        self.push_breakpoint(id);
                    }
                    None => self.diagnostic(EngineError::MalformedResponse(format!(
                        "{class:?} without a breakpoint"
                    ))),
                }
            }
            AsyncClass::BreakpointDeleted => {
                if let Some(id) = results.get_parsed::<BreakpointId>("id") {
                    if self.breakpoints.remove(id).is_some() {
                        self.batch.push(Change::Breakpoint { id, state: None });
                    }
                }
            }
            other => trace!("unhandled async record {:?}", other),
        }
    }

    fn on_running(&mut self, results: &Results) {
        let threads = results.get("thread-id").and_then(thread_selection);
        let changed = self
            .state
            .set_thread_states(threads.as_deref(), ThreadState::Running, None);
        self.push_threads(changed);
        self.set_status(SessionStatus::Running);
    }

    fn on_stopped(&mut self, results: &Results) {
        let reason = results.get_str("reason");
        if let Some(reason) = reason.filter(|r| r.starts_with("exited")) {
            info!("program {}", reason);
            let status = if reason == "exited-signalled" {
                SessionStatus::TerminatedAbnormally
            } else {
                SessionStatus::Exited
            };
            self.end_session(status);
            return;
        }

        let thread = results.get_parsed::<ThreadId>("thread-id");
        let hit = stop_breakpoint(results);
        let fresh = self.state.register_stop(StopIdentity {
            epoch: self.state.run_epoch(),
            breakpoint: hit,
            thread,
        });
        if !fresh {
            return;
        }

        self.set_status(SessionStatus::Stopped);
        self.state.set_stop_reason(reason);
        self.invalidate_stack();

        let stopped = match results.get("stopped-threads") {
            Some(value) => thread_selection(value),
            None => thread.map(|t| vec![t]),
        };
        let mut changed = self
            .state
            .set_thread_states(stopped.as_deref(), ThreadState::Stopped, reason);
        if let Some(id) = thread {
            let frame = results.get("frame").and_then(StackFrame::from_mi);
            if self.state.set_thread_frame(id, frame) && !changed.contains(&id) {
                changed.push(id);
            }
        }
        self.push_threads(changed);
        if thread.is_some() {
            self.select_thread_locally(thread);
        }
        self.select_frame_locally(0);

        if let Some(id) = hit {
            if self.breakpoints.record_hit(id).is_some() {
                self.push_breakpoint(id);
            }
        }
        self.refresh_stopped();
    }

    /// Re-read threads, the stack and variable objects after a stop.
    fn refresh_stopped(&mut self) {
        self.issue("-thread-info", Continuation::ThreadInfo);
        self.issue("-stack-list-frames", Continuation::StackFrames);
        if !self.variables.is_empty() {
            self.issue(varobj::update_command(), Continuation::UpdateVariables);
        }
    }
}

/// Breakpoint or watchpoint a stop reports: `bkptno`, or the `number` of
/// the `wpt`, `hw-rwpt` or `hw-awpt` tuple of a watchpoint trigger.
fn stop_breakpoint(results: &Results) -> Option<BreakpointId> {
    results.get_parsed("bkptno").or_else(|| {
        ["wpt", "hw-rwpt", "hw-awpt"]
            .iter()
            .find_map(|key| results.get(key)?.get_parsed("number"))
    })
}

fn load_command(program: &str) -> String {
    format!("-file-exec-and-symbols {}", quote(program))
}

/// `thread-id` / `stopped-threads` value; `None` means every thread.
fn thread_selection(value: &Value) -> Option<Vec<ThreadId>> {
    match value {
        Value::Const(s) if s == "all" => None,
        Value::Const(s) => Some(s.trim().parse().ok().into_iter().collect()),
        other => Some(
            other
                .items()
                .into_iter()
                .filter_map(|v| v.as_str()?.trim().parse().ok())
                .collect(),
        ),
    }
}

fn join_arguments(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
                quote(arg)
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
