//! Line commands read from stdin.

use mifront_engine::{BreakpointId, ThreadId, VarFrame, WatchAccess};

/// One parsed stdin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DriverCommand {
    Run,
    Continue,
    Step,
    Next,
    Finish,
    Interrupt,
    Jump {
        file: String,
        line: u32,
    },
    BreakLine {
        file: String,
        line: u32,
        condition: Option<String>,
    },
    BreakFunction {
        function: String,
        condition: Option<String>,
    },
    Watch {
        expression: String,
        access: WatchAccess,
    },
    /// `None` deletes every breakpoint.
    Delete(Option<BreakpointId>),
    Enable(BreakpointId, bool),
    Condition(BreakpointId, Option<String>),
    Ignore(BreakpointId, u32),
    Print(String),
    Display(String, VarFrame),
    Expand(String),
    Undisplay(String),
    Assign {
        handle: String,
        value: String,
    },
    Thread(ThreadId),
    Frame(u32),
    Locals,
    Files,
    /// `x ADDRESS COUNT`: read target memory.
    Examine {
        address: u64,
        count: usize,
    },
    Info,
    Raw(String),
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub(crate) fn parse_command(line: &str) -> Result<Option<DriverCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line.starts_with('-') {
        return Ok(Some(DriverCommand::Raw(line.to_string())));
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };

    let cmd = match word {
        "run" | "r" => DriverCommand::Run,
        "continue" | "c" => DriverCommand::Continue,
        "step" | "s" => DriverCommand::Step,
        "next" | "n" => DriverCommand::Next,
        "finish" => DriverCommand::Finish,
        "interrupt" => DriverCommand::Interrupt,
        "jump" => parse_jump(rest)?,
        "break" | "b" => parse_break(rest)?,
        "watch" => watch(rest, WatchAccess::Write)?,
        "rwatch" => watch(rest, WatchAccess::Read)?,
        "awatch" => watch(rest, WatchAccess::Access)?,
        "delete" | "d" => {
            if rest.is_empty() {
                DriverCommand::Delete(None)
            } else {
                DriverCommand::Delete(Some(number(rest, "breakpoint id")?))
            }
        }
        "enable" => DriverCommand::Enable(number(rest, "breakpoint id")?, true),
        "disable" => DriverCommand::Enable(number(rest, "breakpoint id")?, false),
        "condition" => {
            let (id, cond) = split_first(rest);
            let cond = (!cond.is_empty()).then(|| cond.to_string());
            DriverCommand::Condition(number(id, "breakpoint id")?, cond)
        }
        "ignore" => {
            let (id, count) = split_first(rest);
            DriverCommand::Ignore(number(id, "breakpoint id")?, number(count, "count")?)
        }
        "print" | "p" => DriverCommand::Print(required(rest, "expression")?),
        "display" => DriverCommand::Display(required(rest, "expression")?, VarFrame::Current),
        "expand" => DriverCommand::Expand(required(rest, "handle")?),
        "undisplay" => DriverCommand::Undisplay(required(rest, "handle")?),
        "assign" => {
            let (handle, value) = split_first(rest);
            DriverCommand::Assign {
                handle: required(handle, "handle")?,
                value: required(value, "value")?,
            }
        }
        "thread" => DriverCommand::Thread(number(rest, "thread id")?),
        "frame" | "f" => DriverCommand::Frame(number(rest, "frame level")?),
        "locals" => DriverCommand::Locals,
        "files" => DriverCommand::Files,
        "x" => {
            let (address, count) = split_first(rest);
            DriverCommand::Examine {
                address: parse_address(address)?,
                count: number(count, "count")?,
            }
        }
        "info" => DriverCommand::Info,
        "quit" | "q" => DriverCommand::Quit,
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(Some(cmd))
}

/// `break FILE:LINE [if COND]` or `break FUNCTION [if COND]`.
fn parse_break(rest: &str) -> Result<DriverCommand, String> {
    let (location, condition) = match rest.split_once(" if ") {
        Some((loc, cond)) => (loc.trim(), Some(cond.trim().to_string())),
        None => (rest, None),
    };
    if location.is_empty() {
        return Err("break: missing location".to_string());
    }
    match location.rsplit_once(':') {
        Some((file, line)) if !file.is_empty() => Ok(DriverCommand::BreakLine {
            file: file.to_string(),
            line: number(line, "line")?,
            condition,
        }),
        _ => Ok(DriverCommand::BreakFunction {
            function: location.to_string(),
            condition,
        }),
    }
}

/// `jump FILE:LINE`.
fn parse_jump(rest: &str) -> Result<DriverCommand, String> {
    match rest.rsplit_once(':') {
        Some((file, line)) if !file.is_empty() => Ok(DriverCommand::Jump {
            file: file.to_string(),
            line: number(line, "line")?,
        }),
        _ => Err("jump: expected FILE:LINE".to_string()),
    }
}

/// Hex with a `0x` prefix, decimal otherwise.
fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid address: {s:?}"))
}

fn watch(rest: &str, access: WatchAccess) -> Result<DriverCommand, String> {
    Ok(DriverCommand::Watch {
        expression: required(rest, "expression")?,
        access,
    })
}

fn split_first(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((a, b)) => (a, b.trim()),
        None => (s, ""),
    }
}

fn required(s: &str, what: &str) -> Result<String, String> {
    if s.is_empty() {
        Err(format!("missing {what}"))
    } else {
        Ok(s.to_string())
    }
}

fn number<T: std::str::FromStr>(s: &str, what: &str) -> Result<T, String> {
    s.trim()
        .parse()
        .map_err(|_| format!("invalid {what}: {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> DriverCommand {
        parse_command(line).unwrap().unwrap()
    }

    #[test]
    fn blank_lines_ignored() {
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn execution_aliases() {
        assert_eq!(parse("c"), DriverCommand::Continue);
        assert_eq!(parse("continue"), DriverCommand::Continue);
        assert_eq!(parse("s"), DriverCommand::Step);
        assert_eq!(parse("n"), DriverCommand::Next);
        assert_eq!(parse("finish"), DriverCommand::Finish);
        assert_eq!(parse("run"), DriverCommand::Run);
    }

    #[test]
    fn break_file_line_with_condition() {
        assert_eq!(
            parse("break main.c:10 if argc > 1"),
            DriverCommand::BreakLine {
                file: "main.c".into(),
                line: 10,
                condition: Some("argc > 1".into()),
            }
        );
    }

    #[test]
    fn break_function() {
        assert_eq!(
            parse("b compute"),
            DriverCommand::BreakFunction {
                function: "compute".into(),
                condition: None,
            }
        );
    }

    #[test]
    fn break_bad_line_rejected() {
        assert!(parse_command("break main.c:ten").is_err());
        assert!(parse_command("break").is_err());
    }

    #[test]
    fn delete_forms() {
        assert_eq!(parse("delete 3"), DriverCommand::Delete(Some(3)));
        assert_eq!(parse("delete"), DriverCommand::Delete(None));
        assert!(parse_command("delete x").is_err());
    }

    #[test]
    fn condition_and_ignore() {
        assert_eq!(
            parse("condition 2 i == 5"),
            DriverCommand::Condition(2, Some("i == 5".into()))
        );
        assert_eq!(parse("condition 2"), DriverCommand::Condition(2, None));
        assert_eq!(parse("ignore 2 4"), DriverCommand::Ignore(2, 4));
    }

    #[test]
    fn print_keeps_whole_expression() {
        assert_eq!(parse("print a + b"), DriverCommand::Print("a + b".into()));
        assert!(parse_command("print").is_err());
    }

    #[test]
    fn watch_variants() {
        assert_eq!(
            parse("rwatch buf[0]"),
            DriverCommand::Watch {
                expression: "buf[0]".into(),
                access: WatchAccess::Read,
            }
        );
    }

    #[test]
    fn raw_mi_passthrough() {
        assert_eq!(
            parse("-data-list-register-names"),
            DriverCommand::Raw("-data-list-register-names".into())
        );
    }

    #[test]
    fn assign_splits_handle_and_value() {
        assert_eq!(
            parse("assign var1 42"),
            DriverCommand::Assign {
                handle: "var1".into(),
                value: "42".into(),
            }
        );
    }

    #[test]
    fn jump_needs_file_and_line() {
        assert_eq!(
            parse("jump main.c:42"),
            DriverCommand::Jump {
                file: "main.c".into(),
                line: 42,
            }
        );
        assert!(parse_command("jump 42").is_err());
        assert!(parse_command("jump main.c:x").is_err());
    }

    #[test]
    fn examine_memory() {
        assert_eq!(
            parse("x 0x601040 16"),
            DriverCommand::Examine {
                address: 0x601040,
                count: 16,
            }
        );
        assert_eq!(
            parse("x 4096 2"),
            DriverCommand::Examine {
                address: 4096,
                count: 2,
            }
        );
        assert!(parse_command("x 0xzz 4").is_err());
        assert!(parse_command("x 0x10").is_err());
        assert_eq!(parse("files"), DriverCommand::Files);
    }

    #[test]
    fn unknown_command_rejected() {
        assert_eq!(
            parse_command("frobnicate").unwrap_err(),
            "unknown command: frobnicate"
        );
    }
}
