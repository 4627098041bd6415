mod commands;
mod driver;

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use mifront_config::logging::{
    default_log_file_path, ensure_log_dir, log_level_to_filter, rotate_log_files,
    DEFAULT_MAX_LOG_FILES, DEFAULT_MAX_LOG_SIZE,
};
use mifront_config::{load_config, Config, LogConfig, Paths};
use mifront_engine::LaunchTarget;

const USAGE: &str = "usage: mifront [--config-dir DIR] PROGRAM [ARGS...]
       mifront [--config-dir DIR] --attach PID [PROGRAM]
       mifront [--config-dir DIR] --core FILE PROGRAM
       mifront [--config-dir DIR] --remote HOST:PORT [--download] [PROGRAM]";

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    config_dir: Option<PathBuf>,
    target: LaunchTarget,
}

/// What the command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Invocation {
    Debug(CliArgs),
    Help,
    Version,
}

/// Target-selecting flag seen before the program.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Local,
    Attach(u32),
    Core(String),
    Remote { host: String, port: u16 },
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut config_dir = None;
    let mut mode = Mode::Local;
    let mut download = false;
    let mut positional = Vec::new();
    let mut rest = args.iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Invocation::Help),
            "-V" | "--version" => return Ok(Invocation::Version),
            "--config-dir" => {
                let dir = rest.next().ok_or("--config-dir needs a directory")?;
                config_dir = Some(PathBuf::from(dir));
            }
            "--attach" => {
                let pid = rest.next().ok_or("--attach needs a process id")?;
                let pid = pid.parse().map_err(|_| format!("invalid process id: {pid}"))?;
                mode = Mode::Attach(pid);
            }
            "--core" => {
                let core = rest.next().ok_or("--core needs a file")?;
                mode = Mode::Core(core.clone());
            }
            "--remote" => {
                let address = rest.next().ok_or("--remote needs HOST:PORT")?;
                let (host, port) = address
                    .rsplit_once(':')
                    .filter(|(host, _)| !host.is_empty())
                    .ok_or_else(|| format!("invalid remote address: {address}"))?;
                let port = port
                    .parse()
                    .map_err(|_| format!("invalid remote port: {port}"))?;
                mode = Mode::Remote {
                    host: host.to_string(),
                    port,
                };
            }
            "--download" => download = true,
            "--" => {
                positional.extend(rest.cloned());
                break;
            }
            flag if flag.starts_with('-') => return Err(format!("unknown option: {flag}")),
            _ => {
                positional.push(arg.clone());
                positional.extend(rest.cloned());
                break;
            }
        }
    }

    if download && !matches!(mode, Mode::Remote { .. }) {
        return Err("--download only applies to --remote".to_string());
    }
    let mut positional = positional.into_iter();
    let program = positional.next();
    let program_args: Vec<String> = positional.collect();
    if !program_args.is_empty() && mode != Mode::Local {
        return Err("program arguments only apply to a local program".to_string());
    }

    let target = match mode {
        Mode::Local => LaunchTarget::Local {
            program: program.ok_or("missing PROGRAM")?,
            args: program_args,
        },
        Mode::Attach(pid) => LaunchTarget::Attach { program, pid },
        Mode::Core(core) => LaunchTarget::CoreDump {
            program: program.ok_or("--core needs PROGRAM")?,
            core,
        },
        Mode::Remote { host, port } => LaunchTarget::Remote {
            program,
            host,
            port,
            download,
        },
    };
    Ok(Invocation::Debug(CliArgs { config_dir, target }))
}

/// Install the file logger. Stdout is reserved for change batches.
fn init_logging(log: &LogConfig) -> PathBuf {
    let log_path = log.file.clone().unwrap_or_else(default_log_file_path);
    ensure_log_dir(&log_path).ok();
    rotate_log_files(&log_path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES).ok();

    let filter_str = log_level_to_filter(log.level);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(filter_str))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_env_filter(env_filter);
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => builder.with_writer(std::sync::Mutex::new(file)).init(),
        Err(_) => builder.with_writer(std::io::sink).init(),
    }
    log_path
}

fn load(config_dir: Option<&Path>) -> Result<(Config, Option<String>)> {
    let config_dir = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => Paths::new()
            .context("failed to locate home directory")?
            .config_dir(),
    };
    let project_dir = env::current_dir().ok();
    Ok(match load_config(&config_dir, project_dir.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e.to_string())),
    })
}

fn run(cli: CliArgs) -> Result<i32> {
    let (config, config_error) = load(cli.config_dir.as_deref())?;
    let log_path = init_logging(&config.log);
    info!("mifront starting, logging to {}", log_path.display());
    if let Some(e) = config_error {
        warn!("config load failed, using defaults: {}", e);
        eprintln!("mifront: config ignored: {}", e);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let options = driver::session_options(&config);
    let exit = runtime.block_on(driver::run_session(options, &cli.target))?;
    runtime.shutdown_timeout(Duration::from_secs(2));

    info!("debugger exited: {:?}", exit);
    Ok(if exit.success() { 0 } else { 1 })
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(Invocation::Debug(cli)) => cli,
        Ok(Invocation::Help) => {
            println!("{USAGE}");
            return;
        }
        Ok(Invocation::Version) => {
            println!("mifront {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Err(msg) => {
            eprintln!("mifront: {msg}\n{USAGE}");
            std::process::exit(2);
        }
    };

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("mifront: {:#}", e);
            std::process::exit(1);
        }
    }
}
