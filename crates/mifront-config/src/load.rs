use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::ConfigError;
use crate::merge::merge_configs;
use crate::validate::validate;

/// Per-project directory holding an overlay `config.toml`.
pub const PROJECT_DIR_NAME: &str = ".mifront";

/// Content written into a newly-created default config file.
const DEFAULT_CONFIG_CONTENT: &str = r#"# mifront configuration
# Uncomment and edit settings below to override defaults.

# [debugger]
# path = "gdb"
# args = ["--interpreter=mi2", "--quiet", "--nx"]
# init_commands = []
# async_mode = true
# terminate_grace_ms = 1500
# inferior_tty = "/dev/pts/3"

# [parser]
# max_depth = 64

# [log]
# level = "info"
# file = "/tmp/mifront.log"

# [[breakpoint]]
# file = "main.c"
# line = 10
# condition = "argc > 1"
"#;

/// Load and merge configuration.
///
/// 1. Reads the global config from `config_dir/config.toml`.
///    If the file does not exist it is created with commented-out
///    defaults.
/// 2. Optionally reads a project config from
///    `project_dir/.mifront/config.toml` (walks upward).
/// 3. Merges: `Config::default() <- global <- project`.
/// 4. Validates the merged result.
///
/// # Errors
///
/// Returns [`ConfigError`] on I/O failure, parse failure, or
/// validation failure.
pub fn load_config(config_dir: &Path, project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let global_path = config_dir.join("config.toml");

    // Ensure config dir exists
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)?;
    }

    // Create default config if missing
    if !global_path.exists() {
        std::fs::write(&global_path, DEFAULT_CONFIG_CONTENT)
            .map_err(|e| ConfigError::CreateDefault(e.to_string()))?;
        tracing::info!("Created default config at {}", global_path.display(),);
    }

    // Start with defaults
    let mut config = Config::default();

    // Merge global config
    let global_content = std::fs::read_to_string(&global_path)?;
    if has_non_comment_content(&global_content) {
        config = merge_configs(&config, &global_content)?;
    }

    // Merge project config
    if let Some(proj) = project_dir {
        if let Some(project_path) = find_project_config(proj) {
            let project_content = std::fs::read_to_string(&project_path)?;
            config = merge_configs(&config, &project_content)?;
        }
    }

    validate(&config).map_err(first_error)?;
    Ok(config)
}

/// Walk from `start` upward looking for `.mifront/config.toml`.
fn find_project_config(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(PROJECT_DIR_NAME).join("config.toml");
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Returns `true` when the content has at least one
/// non-empty, non-comment line.
fn has_non_comment_content(content: &str) -> bool {
    content.lines().any(|l| {
        let trimmed = l.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    })
}

/// Parse a TOML string directly into a validated [`Config`].
///
/// Useful for tests or one-off parsing without file I/O.
///
/// # Errors
///
/// Returns [`ConfigError`] on parse or validation failure.
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config).map_err(first_error)?;
    Ok(config)
}

/// Report the first violation; every violation is logged.
fn first_error(errors: Vec<ConfigError>) -> ConfigError {
    for err in &errors {
        tracing::warn!("config: {}", err);
    }
    errors
        .into_iter()
        .next()
        .unwrap_or_else(|| ConfigError::Validation {
            field: "unknown".to_string(),
            message: "validation failed".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_config_creates_default_when_missing() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");

        let config = load_config(&cfg_dir, None).unwrap();
        assert_eq!(config, Config::default());

        let created = cfg_dir.join("config.toml");
        assert!(created.exists());
    }

    #[test]
    fn load_config_reads_existing_global() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            "[debugger]\npath = \"gdb-multiarch\"\n",
        )
        .unwrap();

        let config = load_config(&cfg_dir, None).unwrap();
        assert_eq!(config.debugger.path, "gdb-multiarch");
        // Unmodified fields keep defaults
        assert!(config.debugger.async_mode);
    }

    #[test]
    fn load_config_merges_project_over_global() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            "[debugger]\nterminate_grace_ms = 500\n\n[[breakpoint]]\nfile = \"a.c\"\nline = 1\n",
        )
        .unwrap();

        let proj_dir = tmp.path().join("project");
        let overlay_dir = proj_dir.join(PROJECT_DIR_NAME);
        std::fs::create_dir_all(&overlay_dir).unwrap();
        std::fs::write(
            overlay_dir.join("config.toml"),
            "[[breakpoint]]\nfile = \"main.c\"\nline = 10\n",
        )
        .unwrap();

        let config = load_config(&cfg_dir, Some(&proj_dir)).unwrap();
        assert_eq!(config.debugger.terminate_grace_ms, 500);
        // Arrays are replaced, not appended.
        assert_eq!(config.breakpoints.len(), 1);
        assert_eq!(config.breakpoints[0].file, "main.c");
    }

    #[test]
    fn load_config_rejects_invalid_global() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(cfg_dir.join("config.toml"), "[parser]\nmax_depth = 2\n").unwrap();

        let err = load_config(&cfg_dir, None).unwrap_err();
        assert!(format!("{err}").contains("parser.max_depth"));
    }

    #[test]
    fn load_from_str_parses_valid_toml() {
        let config = load_from_str("[parser]\nmax_depth = 32\n").unwrap();
        assert_eq!(config.parser.max_depth, 32);
    }

    #[test]
    fn load_from_str_rejects_invalid_toml() {
        let result = load_from_str("{{bad}}");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_from_str_rejects_invalid_values() {
        let result = load_from_str("[debugger]\npath = \"\"\n");
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn find_project_config_walks_up() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let overlay = root.join(PROJECT_DIR_NAME);
        std::fs::create_dir_all(&overlay).unwrap();
        std::fs::write(overlay.join("config.toml"), "[log]\nlevel = \"debug\"\n").unwrap();

        let deep = root.join("src").join("module");
        std::fs::create_dir_all(&deep).unwrap();

        let found = find_project_config(&deep).unwrap();
        assert!(found.ends_with(".mifront/config.toml"));
    }

    #[test]
    fn default_config_content_is_comment_only() {
        assert!(!has_non_comment_content(DEFAULT_CONFIG_CONTENT));
    }

    #[test]
    fn default_config_content_uncommented_parses() {
        let uncommented: String = DEFAULT_CONFIG_CONTENT
            .lines()
            .filter_map(|l| l.strip_prefix("# "))
            .filter(|l| !l.starts_with("mifront") && !l.starts_with("Uncomment"))
            .map(|l| format!("{l}\n"))
            .collect();
        let config = load_from_str(&uncommented).unwrap();
        assert_eq!(config.breakpoints.len(), 1);
        assert_eq!(config.debugger, Config::default().debugger);
    }

    #[test]
    fn has_non_comment_content_detects_values() {
        assert!(!has_non_comment_content(""));
        assert!(!has_non_comment_content("# comment\n"));
        assert!(has_non_comment_content("# comment\n[parser]\n"));
    }
}
