//! Full session against a scripted stand-in for the debugger.

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use mifront_engine::{
    Change, ChangeBatch, EngineError, InitialBreakpoint, Session, SessionOptions, SessionStatus,
    StackFrame,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// Answers the commands the engine sends with canned MI output.
const FAKE_GDB: &str = r#"#!/bin/sh
printf '=thread-group-added,id="i1"\n(gdb)\n'
while IFS= read -r line; do
  token=${line%%-*}
  case "$line" in
    *-break-insert*)
      printf '%s^done,bkpt={number="1",type="breakpoint",disp="keep",enabled="y",addr="0x0000000000001139",func="main",file="main.c",fullname="/src/main.c",line="10",thread-groups=["i1"],times="0"}\n(gdb)\n' "$token"
      ;;
    *-exec-run*)
      printf '=thread-group-started,id="i1",pid="4242"\n=thread-created,id="1",group-id="i1"\n'
      printf '%s^running\n*running,thread-id="all"\n(gdb)\n' "$token"
      printf '~"\\nBreakpoint 1, main () at main.c:10\\n"\n'
      printf '*stopped,reason="breakpoint-hit",disp="keep",bkptno="1",frame={addr="0x0000555555555139",func="main",args=[],file="main.c",fullname="/src/main.c",line="10"},thread-id="1",stopped-threads="all",core="0"\n(gdb)\n'
      ;;
    *-thread-info*)
      printf '%s^done,threads=[{id="1",target-id="process 4242",name="prog",frame={level="0",func="main",file="main.c",line="10"},state="stopped",core="0"}],current-thread-id="1"\n(gdb)\n' "$token"
      ;;
    *-stack-list-frames*)
      printf '%s^done,stack=[frame={level="0",addr="0x0000555555555139",func="main",file="main.c",fullname="/src/main.c",line="10"}]\n(gdb)\n' "$token"
      ;;
    *-data-evaluate-expression*)
      printf '%s^done,value="42"\n(gdb)\n' "$token"
      ;;
    *-exec-continue*)
      printf '%s^running\n*running,thread-id="all"\n(gdb)\n' "$token"
      printf '=thread-exited,id="1",group-id="i1"\n=thread-group-exited,id="i1",exit-code="0"\n'
      printf '*stopped,reason="exited-normally"\n(gdb)\n'
      ;;
    *-gdb-exit*)
      printf '%s^exit\n' "$token"
      exit 0
      ;;
    *)
      printf '%s^done\n(gdb)\n' "$token"
      ;;
  esac
done
"#;

const WAIT: Duration = Duration::from_secs(10);

fn options(script: &Path) -> SessionOptions {
    SessionOptions {
        debugger: "/bin/sh".to_string(),
        debugger_args: vec![script.to_string_lossy().into_owned()],
        terminate_grace: Duration::from_millis(300),
        ..SessionOptions::default()
    }
}

fn write_script(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("fake-gdb.sh");
    std::fs::write(&path, FAKE_GDB).unwrap();
    path
}

/// Receive batches until `pick` finds something.
async fn wait_for<T>(
    changes: &mut UnboundedReceiver<ChangeBatch>,
    mut pick: impl FnMut(&Change) -> Option<T>,
) -> T {
    timeout(WAIT, async {
        loop {
            let batch = changes.recv().await.expect("change stream ended");
            let found = batch.iter().find_map(&mut pick);
            if let Some(found) = found {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for change")
}

fn non_empty_stack(change: &Change) -> Option<Vec<StackFrame>> {
    match change {
        Change::Stack { frames } if !frames.is_empty() => Some(frames.clone()),
        _ => None,
    }
}

#[tokio::test]
async fn breakpoint_hit_updates_stack_and_count() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let (session, mut changes) = Session::launch(options(&script), "/tmp/prog", &[])
        .await
        .unwrap();

    let bp = session.set_breakpoint("main.c", 10, None).await.unwrap();
    assert_eq!(bp.id, 1);
    assert_eq!(bp.line, Some(10));
    assert_eq!(bp.hit_count, 0);

    session.continue_execution().await.unwrap();
    let frames = wait_for(&mut changes, non_empty_stack).await;
    assert_eq!(frames[0].line, Some(10));
    assert_eq!(frames[0].function.as_deref(), Some("main"));

    let snap = session.snapshot().await.unwrap();
    assert_eq!(snap.status, SessionStatus::Stopped);
    assert_eq!(snap.breakpoints.len(), 1);
    assert_eq!(snap.breakpoints[0].hit_count, 1);
    assert_eq!(snap.current_thread, Some(1));
    assert_eq!(snap.inferiors.len(), 1);
    assert_eq!(snap.inferiors[0].pid, Some(4242));

    assert_eq!(session.evaluate("answer").await.unwrap(), "42");

    let exit = session.terminate().await.unwrap();
    assert!(exit.success());
}

#[tokio::test]
async fn initial_breakpoints_are_inserted_on_launch() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let mut opts = options(&script);
    opts.setup.breakpoints.push(InitialBreakpoint {
        file: "main.c".into(),
        line: 10,
        condition: None,
        enabled: true,
    });
    let (session, mut changes) = Session::launch(opts, "/tmp/prog", &[]).await.unwrap();

    let id = wait_for(&mut changes, |c| match c {
        Change::Breakpoint {
            id,
            state: Some(_),
        } => Some(*id),
        _ => None,
    })
    .await;
    assert_eq!(id, 1);

    session.terminate().await.unwrap();
}

#[tokio::test]
async fn debuggee_exit_ends_session() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path());
    let (session, mut changes) = Session::launch(options(&script), "/tmp/prog", &[])
        .await
        .unwrap();

    session.set_breakpoint("main.c", 10, None).await.unwrap();
    session.run().await.unwrap();
    wait_for(&mut changes, non_empty_stack).await;

    session.continue_execution().await.unwrap();
    wait_for(&mut changes, |c| {
        matches!(
            c,
            Change::Status {
                status: SessionStatus::Exited
            }
        )
        .then_some(())
    })
    .await;

    assert_eq!(session.evaluate("x").await, Err(EngineError::PipeClosed));
    let exit = timeout(WAIT, session.terminate()).await.unwrap().unwrap();
    assert!(exit.success());
}
