//! Layering of config files.
//!
//! A later layer overrides an earlier one key by key. Tables merge
//! recursively. Every other value, arrays included, is replaced whole: a
//! project's `[[breakpoint]]` list or `init_commands` supersedes the global
//! one instead of extending it.

use toml::{Table, Value};

use crate::config::Config;
use crate::error::ConfigError;

/// Apply the TOML text `overlay_toml` on top of `base`.
///
/// Keys missing from the overlay keep their `base` values.
pub fn merge_configs(base: &Config, overlay_toml: &str) -> Result<Config, ConfigError> {
    let overlay: Table = toml::from_str(overlay_toml).map_err(parse_error)?;
    let Value::Table(mut layered) = Value::try_from(base).map_err(parse_error)? else {
        return Err(ConfigError::Parse("config did not serialize to a table".into()));
    };

    let mut overridden = Vec::new();
    overlay_table(&mut layered, overlay, "", &mut overridden);
    if !overridden.is_empty() {
        tracing::debug!("config overrides: {}", overridden.join(", "));
    }

    Value::Table(layered).try_into().map_err(parse_error)
}

fn parse_error(e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Parse(e.to_string())
}

/// Write `overlay` into `base`, collecting the dotted path of each replaced
/// or added leaf.
fn overlay_table(base: &mut Table, overlay: Table, prefix: &str, overridden: &mut Vec<String>) {
    for (key, value) in overlay {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Table(nested) if matches!(base.get(&key), Some(Value::Table(_))) => {
                if let Some(Value::Table(inner)) = base.get_mut(&key) {
                    overlay_table(inner, nested, &path, overridden);
                }
            }
            value => {
                overridden.push(path);
                base.insert(key, value);
            }
        }
    }
}
