//! Source collaborator.
//!
//! Materializes plugin sources on disk. The default implementation shells
//! out to git; the engine only ever sees success or a `FetchError`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use rns_core::{ConfigError, EngineConfig, FetchError, Plugin};
use wait_timeout::ChildExt;

/// Fetches and updates plugin sources.
///
/// Implementations must not touch engine state.
#[cfg_attr(test, mockall::automock)]
pub trait SourceFetcher: Send {
    /// Make the plugin's source available. Succeeds without work when it
    /// already is.
    fn fetch(&self, plugin: &Plugin) -> Result<(), FetchError>;

    /// Bring an installed source up to date.
    fn update(&self, plugin: &Plugin) -> Result<(), FetchError>;
}

/// Git-backed fetcher cloning into `<install_dir>/<plugin name>`.
#[derive(Debug, Clone)]
pub struct GitSourceFetcher {
    program: String,
    install_dir: PathBuf,
    clone_depth: Option<u32>,
    timeout: Duration,
}

impl GitSourceFetcher {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "git".to_string(),
            install_dir: install_dir.into(),
            clone_depth: Some(1),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            program: config.git.program.clone(),
            install_dir: config.install_dir()?,
            clone_depth: config.git.clone_depth,
            timeout: Duration::from_secs(config.git.timeout_secs),
        })
    }

    /// Use a different git executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory a plugin is installed into.
    pub fn plugin_dir(&self, name: &str) -> PathBuf {
        self.install_dir.join(name)
    }

    fn run(&self, args: &[String]) -> Result<(), FetchError> {
        let command = format!("{} {}", self.program, args.join(" "));
        tracing::debug!("Running: {}", command);

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FetchError::Spawn {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FetchError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
            Err(e) => return Err(FetchError::Io(e.to_string())),
        };

        if status.success() {
            return Ok(());
        }

        let mut stderr = String::new();
        if let Some(mut handle) = child.stderr.take() {
            let _ = handle.read_to_string(&mut stderr);
        }
        Err(FetchError::Exit {
            command,
            status: status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        })
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl SourceFetcher for GitSourceFetcher {
    fn fetch(&self, plugin: &Plugin) -> Result<(), FetchError> {
        let target = self.plugin_dir(&plugin.name);
        if target.exists() {
            tracing::debug!("'{}' already present at {:?}", plugin.name, target);
            return Ok(());
        }

        std::fs::create_dir_all(&self.install_dir).map_err(|e| FetchError::Io(e.to_string()))?;

        let mut args = vec!["clone".to_string(), "--quiet".to_string()];
        if let Some(depth) = self.clone_depth {
            args.push("--depth".to_string());
            args.push(depth.to_string());
        }
        args.push(plugin.source.clone());
        args.push(path_arg(&target));

        let result = self.run(&args);
        if result.is_err() && target.exists() {
            // Leave no partial checkout behind; the next install starts clean.
            let _ = std::fs::remove_dir_all(&target);
        }
        result
    }

    fn update(&self, plugin: &Plugin) -> Result<(), FetchError> {
        let target = self.plugin_dir(&plugin.name);
        if !target.exists() {
            return Err(FetchError::NotInstalled(target));
        }

        let args = vec![
            "-C".to_string(),
            path_arg(&target),
            "pull".to_string(),
            "--ff-only".to_string(),
            "--quiet".to_string(),
        ];
        self.run(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_GIT: &str = "/nonexistent/bin/git-for-rns-tests";

    #[test]
    fn test_fetch_skips_existing_checkout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("telescope")).unwrap();

        let fetcher = GitSourceFetcher::new(dir.path()).with_program(MISSING_GIT);
        let plugin = Plugin::new("telescope", "https://example.com/telescope.git");

        // Would fail to spawn if git were invoked
        assert!(fetcher.fetch(&plugin).is_ok());
    }

    #[test]
    fn test_fetch_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = GitSourceFetcher::new(dir.path().join("start")).with_program(MISSING_GIT);
        let plugin = Plugin::new("telescope", "https://example.com/telescope.git");

        let err = fetcher.fetch(&plugin).unwrap_err();
        assert!(matches!(err, FetchError::Spawn { ref program, .. } if program == MISSING_GIT));
        assert!(!fetcher.plugin_dir("telescope").exists());
    }

    #[test]
    fn test_update_requires_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = GitSourceFetcher::new(dir.path()).with_program(MISSING_GIT);
        let plugin = Plugin::new("lsp", "https://example.com/lsp.git");

        assert_eq!(
            fetcher.update(&plugin),
            Err(FetchError::NotInstalled(dir.path().join("lsp")))
        );
    }

    #[test]
    fn test_from_config() {
        let mut config = EngineConfig::default();
        config.install_dir = Some(PathBuf::from("/opt/pack/start"));
        config.git.timeout_secs = 3;

        let fetcher = GitSourceFetcher::from_config(&config).unwrap();
        assert_eq!(fetcher.plugin_dir("lsp"), PathBuf::from("/opt/pack/start/lsp"));
        assert_eq!(fetcher.timeout, Duration::from_secs(3));
    }
}
