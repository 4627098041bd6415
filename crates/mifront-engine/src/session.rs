//! Async session handle.
//!
//! [`Session::start`] spawns the debugger and a task that owns the
//! [`Engine`]. The task multiplexes debugger output with requests from the
//! handle, so every state mutation happens on that one task and in the order
//! the lines arrived.

use std::time::Duration;

use mifront_mi::{Parser, ResultRecord, DEFAULT_MAX_DEPTH};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::breakpoints::{Breakpoint, BreakpointId, WatchAccess};
use crate::engine::{Engine, LaunchSetup, Reply};
use crate::error::EngineError;
use crate::event::ChangeBatch;
use crate::process::{ExitInfo, ProcessEvent, ProcessSupervisor};
use crate::state::{Local, SessionStatus, StackFrame, Thread, ThreadGroup, ThreadId};
use crate::target::{LaunchTarget, MemoryBlock, SourceFile};
use crate::varobj::{VarFrame, VariableObject};

type SessionEngine = Engine<ProcessSupervisor, mpsc::UnboundedSender<ChangeBatch>>;

/// How to start the debugger.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Debugger binary.
    pub debugger: String,
    pub debugger_args: Vec<String>,
    pub setup: LaunchSetup,
    /// Wait per termination step before escalating.
    pub terminate_grace: Duration,
    pub max_depth: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debugger: "gdb".to_string(),
            debugger_args: vec![
                "--interpreter=mi2".to_string(),
                "--quiet".to_string(),
                "--nx".to_string(),
            ],
            setup: LaunchSetup {
                async_mode: true,
                ..LaunchSetup::default()
            },
            terminate_grace: Duration::from_millis(1500),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Point-in-time copy of the session model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub status: SessionStatus,
    pub breakpoints: Vec<Breakpoint>,
    pub threads: Vec<Thread>,
    pub inferiors: Vec<ThreadGroup>,
    pub current_thread: Option<ThreadId>,
    pub current_frame: u32,
    pub frames: Vec<StackFrame>,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExecKind {
    Run,
    Continue,
    Step,
    Next,
    Finish,
    Interrupt,
    Jump { file: String, line: u32 },
}

enum Request {
    Exec(ExecKind, Reply<()>),
    SetBreakpoint {
        file: String,
        line: u32,
        condition: Option<String>,
        reply: Reply<Breakpoint>,
    },
    SetFunctionBreakpoint {
        function: String,
        condition: Option<String>,
        reply: Reply<Breakpoint>,
    },
    SetWatchpoint {
        expression: String,
        access: WatchAccess,
        reply: Reply<Breakpoint>,
    },
    RemoveBreakpoint(BreakpointId, Reply<()>),
    RemoveAllBreakpoints(Reply<()>),
    ToggleBreakpoint(BreakpointId, bool, Reply<()>),
    SetCondition(BreakpointId, Option<String>, Reply<()>),
    SetIgnoreCount(BreakpointId, u32, Reply<()>),
    Evaluate(String, Reply<String>),
    CreateVariable(String, VarFrame, Reply<VariableObject>),
    ExpandVariable(String, Reply<Vec<VariableObject>>),
    DisposeVariable(String, Reply<()>),
    AssignVariable(String, String, Reply<String>),
    SelectThread(ThreadId, Reply<()>),
    SelectFrame(u32, Reply<()>),
    ListLocals(Reply<Vec<Local>>),
    ListSourceFiles(Reply<Vec<SourceFile>>),
    ReadMemory(u64, usize, Reply<Vec<MemoryBlock>>),
    Raw(String, Reply<ResultRecord>),
    Snapshot(oneshot::Sender<Snapshot>),
    Terminate(oneshot::Sender<ExitInfo>),
}

/// Handle to a running debugging session.
///
/// Cloning yields another handle to the same session. When the last handle
/// is dropped the debugger is told to exit.
#[derive(Debug, Clone)]
pub struct Session {
    requests: mpsc::UnboundedSender<Request>,
    pid: Option<u32>,
}

impl Session {
    /// Spawn the debugger, configure it and load `program`.
    pub async fn launch(
        options: SessionOptions,
        program: &str,
        args: &[String],
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChangeBatch>), EngineError> {
        Self::start(options, &LaunchTarget::local(program, args)).await
    }

    /// Spawn the debugger, configure it and establish `target`.
    ///
    /// Returns once the program is loaded or the target connected, together
    /// with the receiver of every change batch the session publishes.
    pub async fn start(
        options: SessionOptions,
        target: &LaunchTarget,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChangeBatch>), EngineError> {
        let (supervisor, events) = ProcessSupervisor::start(
            &options.debugger,
            &options.debugger_args,
            options.terminate_grace,
        )?;
        let pid = supervisor.pid();
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let mut engine = Engine::new(
            supervisor,
            changes_tx,
            Parser::with_max_depth(options.max_depth),
        );

        let (loaded_tx, loaded_rx) = oneshot::channel();
        engine.start(target, &options.setup, Some(loaded_tx));

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        tokio::spawn(session_task(engine, events, requests_rx));
        let session = Self {
            requests: requests_tx,
            pid,
        };

        match loaded_rx.await {
            Ok(Ok(())) => {
                info!("session ready for {}", target);
                Ok((session, changes_rx))
            }
            Ok(Err(EngineError::SessionTerminated)) | Err(_) => Err(EngineError::Launch(
                format!("{} exited during startup", options.debugger),
            )),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Debugger process id.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(request(tx))
            .map_err(|_| EngineError::SessionTerminated)?;
        rx.await.map_err(|_| EngineError::SessionTerminated)?
    }

    // -- execution ----------------------------------------------------------

    pub async fn run(&self) -> Result<(), EngineError> {
        self.call(|r| Request::Exec(ExecKind::Run, r)).await
    }

    /// Resume, or start the program if it has not run yet.
    pub async fn continue_execution(&self) -> Result<(), EngineError> {
        self.call(|r| Request::Exec(ExecKind::Continue, r)).await
    }

    pub async fn step(&self) -> Result<(), EngineError> {
        self.call(|r| Request::Exec(ExecKind::Step, r)).await
    }

    pub async fn next(&self) -> Result<(), EngineError> {
        self.call(|r| Request::Exec(ExecKind::Next, r)).await
    }

    pub async fn finish(&self) -> Result<(), EngineError> {
        self.call(|r| Request::Exec(ExecKind::Finish, r)).await
    }

    pub async fn interrupt(&self) -> Result<(), EngineError> {
        self.call(|r| Request::Exec(ExecKind::Interrupt, r)).await
    }

    /// Resume at `file:line`.
    pub async fn jump(&self, file: &str, line: u32) -> Result<(), EngineError> {
        let kind = ExecKind::Jump {
            file: file.to_string(),
            line,
        };
        self.call(|r| Request::Exec(kind, r)).await
    }

    // -- breakpoints --------------------------------------------------------

    pub async fn set_breakpoint(
        &self,
        file: &str,
        line: u32,
        condition: Option<&str>,
    ) -> Result<Breakpoint, EngineError> {
        self.call(|reply| Request::SetBreakpoint {
            file: file.to_string(),
            line,
            condition: condition.map(str::to_string),
            reply,
        })
        .await
    }

    pub async fn set_function_breakpoint(
        &self,
        function: &str,
        condition: Option<&str>,
    ) -> Result<Breakpoint, EngineError> {
        self.call(|reply| Request::SetFunctionBreakpoint {
            function: function.to_string(),
            condition: condition.map(str::to_string),
            reply,
        })
        .await
    }

    pub async fn set_watchpoint(
        &self,
        expression: &str,
        access: WatchAccess,
    ) -> Result<Breakpoint, EngineError> {
        self.call(|reply| Request::SetWatchpoint {
            expression: expression.to_string(),
            access,
            reply,
        })
        .await
    }

    pub async fn remove_breakpoint(&self, id: BreakpointId) -> Result<(), EngineError> {
        self.call(|r| Request::RemoveBreakpoint(id, r)).await
    }

    pub async fn remove_all_breakpoints(&self) -> Result<(), EngineError> {
        self.call(Request::RemoveAllBreakpoints).await
    }

    pub async fn toggle_breakpoint(&self, id: BreakpointId, enabled: bool) -> Result<(), EngineError> {
        self.call(|r| Request::ToggleBreakpoint(id, enabled, r)).await
    }

    pub async fn set_condition(
        &self,
        id: BreakpointId,
        condition: Option<&str>,
    ) -> Result<(), EngineError> {
        let condition = condition.map(str::to_string);
        self.call(|r| Request::SetCondition(id, condition, r)).await
    }

    pub async fn set_ignore_count(&self, id: BreakpointId, count: u32) -> Result<(), EngineError> {
        self.call(|r| Request::SetIgnoreCount(id, count, r)).await
    }

    // -- data ---------------------------------------------------------------

    pub async fn evaluate(&self, expression: &str) -> Result<String, EngineError> {
        let expression = expression.to_string();
        self.call(|r| Request::Evaluate(expression, r)).await
    }

    pub async fn create_variable(
        &self,
        expression: &str,
        frame: VarFrame,
    ) -> Result<VariableObject, EngineError> {
        let expression = expression.to_string();
        self.call(|r| Request::CreateVariable(expression, frame, r))
            .await
    }

    pub async fn expand_variable(&self, handle: &str) -> Result<Vec<VariableObject>, EngineError> {
        let handle = handle.to_string();
        self.call(|r| Request::ExpandVariable(handle, r)).await
    }

    pub async fn dispose_variable(&self, handle: &str) -> Result<(), EngineError> {
        let handle = handle.to_string();
        self.call(|r| Request::DisposeVariable(handle, r)).await
    }

    pub async fn assign_variable(&self, handle: &str, value: &str) -> Result<String, EngineError> {
        let (handle, value) = (handle.to_string(), value.to_string());
        self.call(|r| Request::AssignVariable(handle, value, r))
            .await
    }

    // -- threads and frames -------------------------------------------------

    pub async fn select_thread(&self, id: ThreadId) -> Result<(), EngineError> {
        self.call(|r| Request::SelectThread(id, r)).await
    }

    pub async fn select_frame(&self, level: u32) -> Result<(), EngineError> {
        self.call(|r| Request::SelectFrame(level, r)).await
    }

    pub async fn list_locals(&self) -> Result<Vec<Local>, EngineError> {
        self.call(Request::ListLocals).await
    }

    // -- target -------------------------------------------------------------

    pub async fn list_source_files(&self) -> Result<Vec<SourceFile>, EngineError> {
        self.call(Request::ListSourceFiles).await
    }

    pub async fn read_memory(
        &self,
        address: u64,
        count: usize,
    ) -> Result<Vec<MemoryBlock>, EngineError> {
        self.call(|r| Request::ReadMemory(address, count, r)).await
    }

    /// Send a raw MI command (without token) and return its result record.
    pub async fn raw_command(&self, command: &str) -> Result<ResultRecord, EngineError> {
        let command = command.to_string();
        self.call(|r| Request::Raw(command, r)).await
    }

    // -- lifecycle ----------------------------------------------------------

    pub async fn snapshot(&self) -> Result<Snapshot, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Snapshot(tx))
            .map_err(|_| EngineError::SessionTerminated)?;
        rx.await.map_err(|_| EngineError::SessionTerminated)
    }

    /// Ask the debugger to exit and wait until it has.
    pub async fn terminate(&self) -> Result<ExitInfo, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Terminate(tx))
            .map_err(|_| EngineError::SessionTerminated)?;
        rx.await.map_err(|_| EngineError::SessionTerminated)
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

async fn session_task(
    mut engine: SessionEngine,
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    let mut exit: Option<ExitInfo> = None;
    let mut exit_waiters: Vec<oneshot::Sender<ExitInfo>> = Vec::new();
    let mut requests_open = true;

    loop {
        tokio::select! {
            biased;

            event = events.recv(), if exit.is_none() => {
                let info = match event {
                    Some(ProcessEvent::Line { origin, text }) => {
                        engine.handle_line(origin, &text);
                        continue;
                    }
                    Some(ProcessEvent::Exited(info)) => info,
                    None => ExitInfo::default(),
                };
                engine.handle_exit(info);
                exit = Some(info);
                for waiter in exit_waiters.drain(..) {
                    let _ = waiter.send(info);
                }
            }

            request = requests.recv(), if requests_open => match request {
                Some(Request::Terminate(waiter)) => match exit {
                    Some(info) => {
                        let _ = waiter.send(info);
                    }
                    None => {
                        exit_waiters.push(waiter);
                        engine.terminate();
                    }
                },
                Some(request) => dispatch(&mut engine, request),
                None => {
                    debug!("all session handles dropped");
                    requests_open = false;
                    if exit.is_none() {
                        engine.terminate();
                    }
                }
            },

            else => break,
        }
    }
    debug!("session task finished");
}

fn dispatch(engine: &mut SessionEngine, request: Request) {
    match request {
        Request::Exec(kind, reply) => {
            let reply = Some(reply);
            match kind {
                ExecKind::Run => engine.run(reply),
                ExecKind::Continue => engine.continue_execution(reply),
                ExecKind::Step => engine.step(reply),
                ExecKind::Next => engine.next(reply),
                ExecKind::Finish => engine.finish(reply),
                ExecKind::Interrupt => engine.interrupt(reply),
                ExecKind::Jump { file, line } => engine.jump(&file, line, reply),
            }
        }
        Request::SetBreakpoint {
            file,
            line,
            condition,
            reply,
        } => engine.set_breakpoint(&file, line, condition.as_deref(), Some(reply)),
        Request::SetFunctionBreakpoint {
            function,
            condition,
            reply,
        } => engine.set_function_breakpoint(&function, condition.as_deref(), Some(reply)),
        Request::SetWatchpoint {
            expression,
            access,
            reply,
        } => engine.set_watchpoint(&expression, access, Some(reply)),
        Request::RemoveBreakpoint(id, reply) => engine.remove_breakpoint(id, Some(reply)),
        Request::RemoveAllBreakpoints(reply) => engine.remove_all_breakpoints(Some(reply)),
        Request::ToggleBreakpoint(id, enabled, reply) => {
            engine.toggle_breakpoint(id, enabled, Some(reply))
        }
        Request::SetCondition(id, condition, reply) => {
            engine.set_condition(id, condition.as_deref(), Some(reply))
        }
        Request::SetIgnoreCount(id, count, reply) => {
            engine.set_ignore_count(id, count, Some(reply))
        }
        Request::Evaluate(expression, reply) => engine.evaluate(&expression, Some(reply)),
        Request::CreateVariable(expression, frame, reply) => {
            engine.create_variable(&expression, frame, Some(reply))
        }
        Request::ExpandVariable(handle, reply) => engine.expand_variable(&handle, Some(reply)),
        Request::DisposeVariable(handle, reply) => engine.dispose_variable(&handle, Some(reply)),
        Request::AssignVariable(handle, value, reply) => {
            engine.assign_variable(&handle, &value, Some(reply))
        }
        Request::SelectThread(id, reply) => engine.select_thread(id, Some(reply)),
        Request::SelectFrame(level, reply) => engine.select_frame(level, Some(reply)),
        Request::ListLocals(reply) => engine.list_locals(Some(reply)),
        Request::ListSourceFiles(reply) => engine.list_source_files(Some(reply)),
        Request::ReadMemory(address, count, reply) => {
            engine.read_memory(address, count, Some(reply))
        }
        Request::Raw(command, reply) => engine.raw_command(&command, Some(reply)),
        Request::Snapshot(reply) => {
            let _ = reply.send(snapshot(engine));
        }
        // The task loop answers terminate requests itself.
        Request::Terminate(_) => engine.terminate(),
    }
}

fn snapshot(engine: &SessionEngine) -> Snapshot {
    let state = engine.state();
    Snapshot {
        status: state.status(),
        breakpoints: engine.breakpoints().iter().cloned().collect(),
        threads: state.threads().cloned().collect(),
        inferiors: state.groups().cloned().collect(),
        current_thread: state.current_thread(),
        current_frame: state.current_frame(),
        frames: state.frames().to_vec(),
        pending: engine.pending_count(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn options(script: &str) -> SessionOptions {
        SessionOptions {
            debugger: "/bin/sh".to_string(),
            debugger_args: vec!["-c".to_string(), script.to_string()],
            terminate_grace: Duration::from_millis(200),
            ..SessionOptions::default()
        }
    }

    #[test]
    fn default_options_use_mi2() {
        let opts = SessionOptions::default();
        assert_eq!(opts.debugger, "gdb");
        assert!(opts.debugger_args.contains(&"--interpreter=mi2".to_string()));
        assert!(opts.setup.async_mode);
        assert_eq!(opts.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[tokio::test]
    async fn launch_missing_debugger_fails() {
        let opts = SessionOptions {
            debugger: "/nonexistent/mifront-gdb".to_string(),
            ..SessionOptions::default()
        };
        let err = Session::launch(opts, "/tmp/prog", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Launch(_)));
    }

    #[tokio::test]
    async fn debugger_dying_during_startup_is_launch_error() {
        let err = Session::launch(options("exit 3"), "/tmp/prog", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Launch(msg) if msg.contains("startup")));
    }

    #[tokio::test]
    async fn load_error_reported() {
        // Answer every command; fail the program load.
        let script = r#"while IFS= read -r line; do
  token=${line%%-*}
  case "$line" in
    *-file-exec-and-symbols*) printf '%s^error,msg="No such file."\n' "$token" ;;
    *) printf '%s^done\n' "$token" ;;
  esac
done"#;
        let err = Session::launch(options(script), "/nope", &[])
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::Launch("No such file.".into()));
    }

    #[tokio::test]
    async fn attach_starts_stopped_and_lists_inferiors() {
        let script = r#"while IFS= read -r line; do
  token=${line%%-*}
  case "$line" in
    *-target-attach*)
      printf '=thread-group-started,id="i1",pid="4242"\n'
      printf '%s^done\n' "$token" ;;
    *-file-list-exec-source-files*)
      printf '%s^done,files=[{file="main.c",fullname="/src/main.c"}]\n' "$token" ;;
    *) printf '%s^done\n' "$token" ;;
  esac
done"#;
        let target = LaunchTarget::Attach {
            program: None,
            pid: 4242,
        };
        let (session, _changes) = Session::start(options(script), &target).await.unwrap();
        let snap = session.snapshot().await.unwrap();
        assert_eq!(snap.status, SessionStatus::Stopped);
        assert_eq!(snap.inferiors.len(), 1);
        assert_eq!(snap.inferiors[0].id, "i1");
        assert_eq!(snap.inferiors[0].pid, Some(4242));

        let files = session.list_source_files().await.unwrap();
        assert_eq!(files[0].fullname.as_deref(), Some("/src/main.c"));
    }

    #[tokio::test]
    async fn terminate_waits_for_exit() {
        let script = r#"while IFS= read -r line; do
  token=${line%%-*}
  case "$line" in
    *-gdb-exit*) printf '%s^exit\n' "$token"; exit 0 ;;
    *) printf '%s^done\n' "$token" ;;
  esac
done"#;
        let (session, _changes) = Session::launch(options(script), "/tmp/prog", &[])
            .await
            .unwrap();
        let snap = session.snapshot().await.unwrap();
        assert_eq!(snap.status, SessionStatus::NotStarted);

        let exit = session.terminate().await.unwrap();
        assert!(exit.success());
        assert_eq!(
            session.evaluate("1").await,
            Err(EngineError::PipeClosed)
        );
        // A second terminate returns the recorded exit.
        assert_eq!(session.terminate().await.unwrap(), exit);
    }
}
