use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Most verbose; includes every MI line in and out.
    Trace,
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    Warn,
    Error,
}

/// How the debugger subprocess is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebuggerConfig {
    /// Debugger binary, looked up on `PATH` when not absolute.
    #[serde(default = "default_debugger_path")]
    pub path: String,
    /// Arguments passed to the debugger. Must select the MI interpreter.
    #[serde(default = "default_debugger_args")]
    pub args: Vec<String>,
    /// Raw MI commands sent after startup, before the program is loaded.
    #[serde(default)]
    pub init_commands: Vec<String>,
    /// Send `-gdb-set mi-async on`.
    #[serde(default = "default_true")]
    pub async_mode: bool,
    /// Wait per termination step (stdin close, SIGTERM) before escalating.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
    /// Terminal for the debugged program's own I/O, e.g. `/dev/pts/3`.
    #[serde(default)]
    pub inferior_tty: Option<String>,
}

fn default_debugger_path() -> String {
    "gdb".to_string()
}

fn default_debugger_args() -> Vec<String> {
    vec![
        "--interpreter=mi2".to_string(),
        "--quiet".to_string(),
        "--nx".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_terminate_grace_ms() -> u64 {
    1500
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            path: default_debugger_path(),
            args: default_debugger_args(),
            init_commands: Vec::new(),
            async_mode: true,
            terminate_grace_ms: default_terminate_grace_ms(),
            inferior_tty: None,
        }
    }
}

/// MI parser limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Deepest tuple/list nesting accepted in a record (4 to 1024).
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    mifront_mi::DEFAULT_MAX_DEPTH
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Optional path to a log file.
    pub file: Option<PathBuf>,
}

/// A breakpoint inserted every time a program is launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointEntry {
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Top-level mifront configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debugger: DebuggerConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Initial breakpoint set, written as `[[breakpoint]]` tables.
    #[serde(default, rename = "breakpoint")]
    pub breakpoints: Vec<BreakpointEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.debugger.path, "gdb");
        assert_eq!(
            cfg.debugger.args,
            vec!["--interpreter=mi2", "--quiet", "--nx"]
        );
        assert!(cfg.debugger.init_commands.is_empty());
        assert!(cfg.debugger.async_mode);
        assert_eq!(cfg.debugger.terminate_grace_ms, 1500);
        assert!(cfg.debugger.inferior_tty.is_none());
        assert_eq!(cfg.parser.max_depth, 64);
        assert_eq!(cfg.log.level, LogLevel::Info);
        assert!(cfg.log.file.is_none());
        assert!(cfg.breakpoints.is_empty());
    }

    #[test]
    fn serde_roundtrip_preserves_values() {
        let cfg = Config {
            debugger: DebuggerConfig {
                path: "/usr/local/bin/gdb".into(),
                args: vec!["--interpreter=mi2".into()],
                init_commands: vec!["-enable-pretty-printing".into()],
                async_mode: false,
                terminate_grace_ms: 250,
                inferior_tty: Some("/dev/pts/4".into()),
            },
            parser: ParserConfig { max_depth: 128 },
            log: LogConfig {
                level: LogLevel::Trace,
                file: Some(PathBuf::from("/tmp/mifront.log")),
            },
            breakpoints: vec![BreakpointEntry {
                file: "main.c".into(),
                line: 10,
                condition: Some("x > 3".into()),
                enabled: false,
            }],
        };

        let toml_str = toml::to_string(&cfg).expect("serialize");
        let deserialized: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(cfg, deserialized);
    }

    #[test]
    fn parse_breakpoint_tables() {
        let input = r#"
[debugger]
path = "gdb-multiarch"

[[breakpoint]]
file = "main.c"
line = 10

[[breakpoint]]
file = "util.c"
line = 42
condition = "n == 0"
enabled = false
"#;
        let cfg: Config = toml::from_str(input).expect("parse toml");
        assert_eq!(cfg.debugger.path, "gdb-multiarch");
        // Unspecified fields keep defaults via serde(default)
        assert!(cfg.debugger.async_mode);
        assert_eq!(cfg.breakpoints.len(), 2);
        assert!(cfg.breakpoints[0].enabled);
        assert_eq!(cfg.breakpoints[1].condition.as_deref(), Some("n == 0"));
        assert!(!cfg.breakpoints[1].enabled);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: Config = toml::from_str("").expect("parse empty toml");
        assert_eq!(cfg, Config::default());
    }
}
