//! mifront-config: configuration loading for mifront.
//!
//! Settings come from `Config::default()`, overlaid by the global
//! `~/.config/mifront/config.toml` and then by the nearest project
//! `.mifront/config.toml`.

pub mod config;
pub mod error;
pub mod load;
pub mod logging;
pub mod merge;
pub mod paths;
pub mod validate;

pub use config::{BreakpointEntry, Config, DebuggerConfig, LogConfig, LogLevel, ParserConfig};
pub use error::ConfigError;
pub use load::{load_config, load_from_str, PROJECT_DIR_NAME};
pub use paths::Paths;
