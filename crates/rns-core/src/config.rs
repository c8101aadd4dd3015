//! Configuration types.
//!
//! The engine reads `config.toml` from the rns config directory. Every field
//! has a default, so a missing file is the same as an empty one.
//!
//! ```toml
//! install_dir = "/home/me/.local/share/nvim/site/pack/managed/start"
//! post_install = ["packloadall", "silent! helptags ALL"]
//!
//! [git]
//! program = "git"
//! clone_depth = 1
//! timeout_secs = 120
//!
//! [log]
//! filter = "info,rns_engine=debug"
//! file = "/tmp/rns.log"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Runtime configuration of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory plugins are cloned into. Derived from the data dir if unset.
    pub install_dir: Option<PathBuf>,

    /// Source fetching
    pub git: GitConfig,

    /// Host commands run after an install or update batch fetched anything.
    pub post_install: Vec<String>,

    /// Logging
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            install_dir: None,
            git: GitConfig::default(),
            post_install: vec!["packloadall".to_string(), "silent! helptags ALL".to_string()],
            log: LogConfig::default(),
        }
    }
}

/// Git invocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub program: String,
    /// `--depth` for clones; `None` clones full history.
    pub clone_depth: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
            clone_depth: Some(1),
            timeout_secs: 120,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RNS_LOG` is unset.
    pub filter: String,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: None,
        }
    }
}

impl EngineConfig {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path().ok_or(ConfigError::NoConfigDir)?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Resolved install directory.
    pub fn install_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.install_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_install_dir().ok_or(ConfigError::NoDataDir),
        }
    }
}

/// Get the config directory path.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rns"))
}

/// Get the path to config.toml.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("config.toml"))
}

/// Editor package directory managed plugins are cloned into.
pub fn default_install_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("nvim/site/pack/managed/start"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.git.program, "git");
        assert_eq!(config.git.clone_depth, Some(1));
        assert_eq!(config.post_install.len(), 2);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
install_dir = "/opt/plugins"

[git]
timeout_secs = 5
"#
        )
        .unwrap();

        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.install_dir().unwrap(), PathBuf::from("/opt/plugins"));
        assert_eq!(config.git.timeout_secs, 5);
        assert_eq!(config.git.program, "git");
        assert!(config.log.file.is_none());
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "install_dir = [").unwrap();

        let result = EngineConfig::load_from(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineConfig::load_from(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
