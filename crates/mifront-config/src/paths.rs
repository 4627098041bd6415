//! Standard locations for configuration and logs.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const APP_NAME: &str = "mifront";

/// Per-user directories, all derived from the home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    home: PathBuf,
}

impl Paths {
    /// Resolve the home directory via `dirs`, falling back to `$HOME`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHome`] if neither is available.
    pub fn new() -> Result<Self, ConfigError> {
        let home = dirs::home_dir()
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .ok_or(ConfigError::NoHome)?;
        Ok(Self { home })
    }

    /// Paths rooted at an explicit home directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home
    }

    /// `~/.config/mifront`
    pub fn config_dir(&self) -> PathBuf {
        self.home.join(".config").join(APP_NAME)
    }

    /// `~/.local/share/mifront`
    pub fn data_dir(&self) -> PathBuf {
        self.home.join(".local").join("share").join(APP_NAME)
    }

    /// `<data_dir>/logs`
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirs_derive_from_home() {
        let paths = Paths::with_home("/home/u");
        assert_eq!(paths.home_dir(), Path::new("/home/u"));
        assert_eq!(paths.config_dir(), PathBuf::from("/home/u/.config/mifront"));
        assert_eq!(
            paths.data_dir(),
            PathBuf::from("/home/u/.local/share/mifront")
        );
        assert_eq!(
            paths.log_dir(),
            PathBuf::from("/home/u/.local/share/mifront/logs")
        );
    }

    #[test]
    fn log_dir_is_under_data_dir() {
        let paths = Paths::with_home("/h");
        assert!(paths.log_dir().starts_with(paths.data_dir()));
    }
}
