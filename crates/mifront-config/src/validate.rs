use crate::config::Config;
use crate::error::ConfigError;

const MAX_DEPTH_RANGE: std::ops::RangeInclusive<usize> = 4..=1024;
const GRACE_RANGE_MS: std::ops::RangeInclusive<u64> = 10..=60_000;

/// Validate a [`Config`], returning all detected violations.
///
/// Returns `Ok(())` when the config is valid, or `Err` with a
/// vector of every validation error found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.debugger.path.trim().is_empty() {
        errors.push(invalid("debugger.path", "must not be empty".to_string()));
    }

    if !GRACE_RANGE_MS.contains(&config.debugger.terminate_grace_ms) {
        errors.push(invalid(
            "debugger.terminate_grace_ms",
            format!(
                "must be 10\u{2013}60000, got {}",
                config.debugger.terminate_grace_ms
            ),
        ));
    }

    if !MAX_DEPTH_RANGE.contains(&config.parser.max_depth) {
        errors.push(invalid(
            "parser.max_depth",
            format!("must be 4\u{2013}1024, got {}", config.parser.max_depth),
        ));
    }

    for (i, bp) in config.breakpoints.iter().enumerate() {
        if bp.file.trim().is_empty() {
            errors.push(invalid(
                &format!("breakpoint[{i}].file"),
                "must not be empty".to_string(),
            ));
        }
        if bp.line == 0 {
            errors.push(invalid(
                &format!("breakpoint[{i}].line"),
                "must be \u{2265} 1".to_string(),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        message,
    }
}
