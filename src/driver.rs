//! Headless front-end: stdin commands in, JSON lines out.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use mifront_config::Config;
use mifront_engine::{
    ChangeBatch, EngineError, ExitInfo, InitialBreakpoint, LaunchSetup, LaunchTarget, Session,
    SessionOptions,
};

use crate::commands::{parse_command, DriverCommand};

/// Translate the loaded configuration into session options.
pub(crate) fn session_options(config: &Config) -> SessionOptions {
    let breakpoints = config
        .breakpoints
        .iter()
        .map(|bp| InitialBreakpoint {
            file: bp.file.clone(),
            line: bp.line,
            condition: bp.condition.clone(),
            enabled: bp.enabled,
        })
        .collect();
    SessionOptions {
        debugger: config.debugger.path.clone(),
        debugger_args: config.debugger.args.clone(),
        setup: LaunchSetup {
            async_mode: config.debugger.async_mode,
            init_commands: config.debugger.init_commands.clone(),
            breakpoints,
            inferior_tty: config.debugger.inferior_tty.clone(),
        },
        terminate_grace: Duration::from_millis(config.debugger.terminate_grace_ms),
        max_depth: config.parser.max_depth,
    }
}

/// Start `target` and serve stdin until `quit` or end of input.
pub(crate) async fn run_session(options: SessionOptions, target: &LaunchTarget) -> Result<ExitInfo> {
    let (session, mut changes) = Session::start(options, target)
        .await
        .with_context(|| format!("failed to start {}", target))?;
    info!("debugger pid {:?}", session.pid());

    let printer = tokio::spawn(async move {
        while let Some(batch) = changes.recv().await {
            emit_batch(&batch);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let cmd = match parse_command(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(msg) => {
                emit(&json!({ "error": msg }));
                continue;
            }
        };
        if cmd == DriverCommand::Quit {
            break;
        }
        debug!("command {:?}", cmd);
        match execute(&session, cmd).await {
            Ok(reply) => emit(&json!({ "reply": reply })),
            Err(e) => emit(&json!({ "error": e.to_string() })),
        }
    }

    let exit = session.terminate().await.context("debugger did not exit")?;
    drop(session);
    if printer.await.is_err() {
        warn!("change printer panicked");
    }
    Ok(exit)
}

async fn execute(session: &Session, cmd: DriverCommand) -> Result<Value, EngineError> {
    let value = match cmd {
        DriverCommand::Run => {
            session.run().await?;
            Value::Null
        }
        DriverCommand::Continue => {
            session.continue_execution().await?;
            Value::Null
        }
        DriverCommand::Step => {
            session.step().await?;
            Value::Null
        }
        DriverCommand::Next => {
            session.next().await?;
            Value::Null
        }
        DriverCommand::Finish => {
            session.finish().await?;
            Value::Null
        }
        DriverCommand::Interrupt => {
            session.interrupt().await?;
            Value::Null
        }
        DriverCommand::Jump { file, line } => {
            session.jump(&file, line).await?;
            Value::Null
        }
        DriverCommand::BreakLine {
            file,
            line,
            condition,
        } => to_json(
            &session
                .set_breakpoint(&file, line, condition.as_deref())
                .await?,
        ),
        DriverCommand::BreakFunction {
            function,
            condition,
        } => to_json(
            &session
                .set_function_breakpoint(&function, condition.as_deref())
                .await?,
        ),
        DriverCommand::Watch { expression, access } => {
            to_json(&session.set_watchpoint(&expression, access).await?)
        }
        DriverCommand::Delete(Some(id)) => {
            session.remove_breakpoint(id).await?;
            Value::Null
        }
        DriverCommand::Delete(None) => {
            session.remove_all_breakpoints().await?;
            Value::Null
        }
        DriverCommand::Enable(id, enabled) => {
            session.toggle_breakpoint(id, enabled).await?;
            Value::Null
        }
        DriverCommand::Condition(id, condition) => {
            session.set_condition(id, condition.as_deref()).await?;
            Value::Null
        }
        DriverCommand::Ignore(id, count) => {
            session.set_ignore_count(id, count).await?;
            Value::Null
        }
        DriverCommand::Print(expression) => json!(session.evaluate(&expression).await?),
        DriverCommand::Display(expression, frame) => {
            to_json(&session.create_variable(&expression, frame).await?)
        }
        DriverCommand::Expand(handle) => to_json(&session.expand_variable(&handle).await?),
        DriverCommand::Undisplay(handle) => {
            session.dispose_variable(&handle).await?;
            Value::Null
        }
        DriverCommand::Assign { handle, value } => {
            json!(session.assign_variable(&handle, &value).await?)
        }
        DriverCommand::Thread(id) => {
            session.select_thread(id).await?;
            Value::Null
        }
        DriverCommand::Frame(level) => {
            session.select_frame(level).await?;
            Value::Null
        }
        DriverCommand::Locals => to_json(&session.list_locals().await?),
        DriverCommand::Files => to_json(&session.list_source_files().await?),
        DriverCommand::Examine { address, count } => {
            to_json(&session.read_memory(address, count).await?)
        }
        DriverCommand::Info => to_json(&session.snapshot().await?),
        DriverCommand::Raw(command) => session.raw_command(&command).await?.results.to_json(),
        DriverCommand::Quit => Value::Null,
    };
    Ok(value)
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!("reply not serializable: {}", e);
        Value::Null
    })
}

fn emit_batch(batch: &ChangeBatch) {
    emit(&to_json(batch));
}

fn emit(value: &Value) {
    println!("{}", value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mifront_config::BreakpointEntry;

    #[test]
    fn options_follow_config() {
        let mut config = Config::default();
        config.debugger.path = "/opt/gdb/bin/gdb".into();
        config.debugger.async_mode = false;
        config.debugger.terminate_grace_ms = 250;
        config.parser.max_depth = 32;
        config.debugger.inferior_tty = Some("/dev/pts/3".into());
        config.breakpoints.push(BreakpointEntry {
            file: "main.c".into(),
            line: 7,
            condition: Some("n > 1".into()),
            enabled: false,
        });

        let opts = session_options(&config);
        assert_eq!(opts.debugger, "/opt/gdb/bin/gdb");
        assert_eq!(opts.debugger_args, config.debugger.args);
        assert!(!opts.setup.async_mode);
        assert_eq!(opts.terminate_grace, Duration::from_millis(250));
        assert_eq!(opts.max_depth, 32);
        assert_eq!(opts.setup.inferior_tty.as_deref(), Some("/dev/pts/3"));
        assert_eq!(
            opts.setup.breakpoints,
            vec![InitialBreakpoint {
                file: "main.c".into(),
                line: 7,
                condition: Some("n > 1".into()),
                enabled: false,
            }]
        );
    }

    #[test]
    fn default_config_matches_default_options() {
        let opts = session_options(&Config::default());
        let defaults = SessionOptions::default();
        assert_eq!(opts.debugger, defaults.debugger);
        assert_eq!(opts.debugger_args, defaults.debugger_args);
        assert_eq!(opts.terminate_grace, defaults.terminate_grace);
        assert_eq!(opts.max_depth, defaults.max_depth);
        assert_eq!(opts.setup.async_mode, defaults.setup.async_mode);
    }
}
