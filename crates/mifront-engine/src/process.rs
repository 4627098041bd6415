//! Debugger subprocess supervision.
//!
//! The supervisor spawns the debugger with piped stdio and runs four tasks:
//! a writer draining the command channel into stdin, one reader per output
//! stream framing bytes into lines, and a reaper that waits for exit (or
//! escalates a termination request) and then reports exactly one
//! [`ProcessEvent::Exited`] after both readers have drained.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mifront_mi::LineBuffer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::CommandSink;
use crate::error::EngineError;

/// Upper bound on waiting for the output readers after the child was reaped.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Stdout,
    Stderr,
}

/// How the subprocess ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal (unix only).
    pub signal: Option<i32>,
}

impl ExitInfo {
    fn from_status(status: &ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }

    /// Exit code 0 and no signal.
    pub fn success(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

/// Output of the supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Line { origin: Origin, text: String },
    Exited(ExitInfo),
}

/// Owns one debugger subprocess.
#[derive(Debug)]
pub struct ProcessSupervisor {
    pid: Option<u32>,
    writer: Option<mpsc::UnboundedSender<String>>,
    alive: Arc<AtomicBool>,
    terminate: Option<oneshot::Sender<()>>,
}

impl ProcessSupervisor {
    /// Spawn `program` with `args`.
    ///
    /// Must be called from within a tokio runtime. `grace` is how long each
    /// termination step waits before escalating.
    pub fn start(
        program: &str,
        args: &[String],
        grace: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>), EngineError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Launch(format!("{program}: {e}")))?;

        let pid = child.id();
        info!("started {} (pid {:?})", program, pid);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Launch("could not capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Launch("could not capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Launch("could not capture stderr".into()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        // Writer task: commands to stdin. Dropping the sender closes stdin.
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
        let writer_alive = alive.clone();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = writer_rx.recv().await {
                let mut bytes = line.into_bytes();
                bytes.push(b'\n');
                if stdin.write_all(&bytes).await.is_err() || stdin.flush().await.is_err() {
                    warn!("debugger stdin closed");
                    writer_alive.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        let stdout_task = spawn_reader(stdout, Origin::Stdout, events_tx.clone());
        let stderr_task = spawn_reader(stderr, Origin::Stderr, events_tx.clone());

        // Reaper task.
        let (terminate_tx, terminate_rx) = oneshot::channel();
        let reaper_alive = alive.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = terminate_rx => escalate(&mut child, grace).await,
            };
            reaper_alive.store(false, Ordering::SeqCst);

            let info = match status {
                Ok(status) => ExitInfo::from_status(&status),
                Err(e) => {
                    warn!("failed to reap debugger: {}", e);
                    ExitInfo::default()
                }
            };
            info!("debugger exited: {:?}", info);

            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
            })
            .await;
            if drained.is_err() {
                warn!("debugger output did not drain within {:?}", DRAIN_TIMEOUT);
            }
            let _ = events_tx.send(ProcessEvent::Exited(info));
        });

        Ok((
            Self {
                pid,
                writer: Some(writer_tx),
                alive,
                terminate: Some(terminate_tx),
            },
            events_rx,
        ))
    }

    /// OS process id, if the platform reported one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the subprocess is running and accepting input.
    pub fn is_alive(&self) -> bool {
        self.writer.is_some() && self.alive.load(Ordering::SeqCst)
    }

    /// Send one line to the debugger's stdin.
    pub fn write_line(&self, line: &str) -> Result<(), EngineError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::PipeClosed);
        }
        let writer = self.writer.as_ref().ok_or(EngineError::PipeClosed)?;
        writer
            .send(line.to_string())
            .map_err(|_| EngineError::PipeClosed)
    }

    /// Close stdin and escalate to SIGTERM and SIGKILL if the process does
    /// not exit within the grace period. Returns immediately; completion is
    /// reported as [`ProcessEvent::Exited`].
    pub fn terminate(&mut self) {
        if self.writer.take().is_some() {
            debug!("terminating debugger (pid {:?})", self.pid);
        }
        if let Some(tx) = self.terminate.take() {
            let _ = tx.send(());
        }
    }
}

impl CommandSink for ProcessSupervisor {
    fn write_line(&mut self, line: &str) -> Result<(), EngineError> {
        ProcessSupervisor::write_line(self, line)
    }

    fn is_open(&self) -> bool {
        self.is_alive()
    }

    fn close(&mut self) {
        self.terminate();
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn spawn_reader<R>(
    mut reader: R,
    origin: Origin,
    events: mpsc::UnboundedSender<ProcessEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut framing = LineBuffer::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    for text in framing.push(&chunk[..n]) {
                        trace!("<- [{:?}] {}", origin, text);
                        let _ = events.send(ProcessEvent::Line { origin, text });
                    }
                }
                Err(e) => {
                    warn!("reading debugger {:?}: {}", origin, e);
                    break;
                }
            }
        }
        if let Some(text) = framing.finish() {
            let _ = events.send(ProcessEvent::Line { origin, text });
        }
    })
}

/// Stdin is already closed when this runs.
async fn escalate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status;
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        debug!("sending SIGTERM to {}", pid);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("SIGTERM to {} failed: {}", pid, e);
        }
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status;
        }
    }

    warn!("debugger ignored termination; killing");
    child.kill().await?;
    child.wait().await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_millis(200);

    async fn collect(mut rx: mpsc::UnboundedReceiver<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = matches!(event, ProcessEvent::Exited(_));
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn missing_binary_is_launch_error() {
        let err = ProcessSupervisor::start("/nonexistent/mifront-debugger", &[], GRACE).unwrap_err();
        assert!(matches!(err, EngineError::Launch(_)));
    }

    #[tokio::test]
    async fn lines_then_single_exit() {
        let (sup, rx) =
            ProcessSupervisor::start("/bin/sh", &sh("printf 'a\\nb\\n'; printf 'oops\\n' >&2; printf tail"), GRACE)
                .unwrap();
        assert!(sup.pid().is_some());
        let events = collect(rx).await;

        let stdout: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ProcessEvent::Line {
                    origin: Origin::Stdout,
                    text,
                } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stdout, vec!["a", "b", "tail"]);
        assert!(events.contains(&ProcessEvent::Line {
            origin: Origin::Stderr,
            text: "oops".into()
        }));
        assert_eq!(
            events.last(),
            Some(&ProcessEvent::Exited(ExitInfo {
                code: Some(0),
                signal: None
            }))
        );
        let exits = events
            .iter()
            .filter(|e| matches!(e, ProcessEvent::Exited(_)))
            .count();
        assert_eq!(exits, 1);
    }

    #[tokio::test]
    async fn echo_roundtrip_through_stdin() {
        let (mut sup, rx) = ProcessSupervisor::start("/bin/cat", &[], GRACE).unwrap();
        sup.write_line("1-gdb-version").unwrap();
        sup.terminate();
        let events = collect(rx).await;
        assert_eq!(
            events[0],
            ProcessEvent::Line {
                origin: Origin::Stdout,
                text: "1-gdb-version".into()
            }
        );
        assert!(matches!(events.last(), Some(ProcessEvent::Exited(info)) if info.success()));
    }

    #[tokio::test]
    async fn write_after_terminate_fails() {
        let (mut sup, rx) = ProcessSupervisor::start("/bin/cat", &[], GRACE).unwrap();
        sup.terminate();
        assert!(!sup.is_alive());
        assert_eq!(sup.write_line("-exec-run"), Err(EngineError::PipeClosed));
        collect(rx).await;
    }

    #[tokio::test]
    async fn write_after_exit_fails() {
        let (sup, rx) = ProcessSupervisor::start("/bin/sh", &sh("exit 3"), GRACE).unwrap();
        let events = collect(rx).await;
        assert_eq!(
            events.last(),
            Some(&ProcessEvent::Exited(ExitInfo {
                code: Some(3),
                signal: None
            }))
        );
        assert!(!sup.is_alive());
        assert_eq!(sup.write_line("-exec-run"), Err(EngineError::PipeClosed));
    }

    #[tokio::test]
    async fn terminate_escalates_past_ignored_stdin() {
        // Ignores EOF on stdin and SIGTERM; only SIGKILL ends it.
        let (mut sup, rx) = ProcessSupervisor::start(
            "/bin/sh",
            &sh("trap '' TERM; while true; do sleep 0.05; done"),
            Duration::from_millis(100),
        )
        .unwrap();
        sup.terminate();
        let events = collect(rx).await;
        match events.last() {
            Some(ProcessEvent::Exited(info)) => assert!(!info.success()),
            other => panic!("expected exit, got {other:?}"),
        }
    }
}
