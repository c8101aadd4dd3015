//! Error types for the rns engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::keymap::Mode;
use crate::plugin::PluginState;

/// Stable classification of every engine error.
///
/// The discriminant is the status code handed back across the C boundary,
/// so variants must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum ErrorKind {
    DuplicateName = 1,
    NotFound = 2,
    UnknownPlugin = 3,
    ScopeAlreadyOpen = 4,
    NoOpenScope = 5,
    UnknownServer = 6,
    KeymapConflict = 7,
    AugroupAmbiguity = 8,
    InvalidTransition = 9,
    ExternalFetchFailure = 10,
    PrimitiveApplyFailure = 11,
    InvalidArgument = 12,
    NotInitialized = 13,
}

impl ErrorKind {
    /// Status code returned to ABI callers.
    pub fn ordinal(self) -> i32 {
        self as i32
    }

    /// Warning-severity kinds never block a batch.
    pub fn is_warning(self) -> bool {
        matches!(self, ErrorKind::AugroupAmbiguity)
    }
}

/// Engine errors - surfaced to the embedding host.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Plugin name already registered with another source.
    #[error("Plugin '{name}' already registered with source '{existing}'")]
    DuplicateName { name: String, existing: String },

    /// Registry lookup miss.
    #[error("Plugin '{0}' not found")]
    NotFound(String),

    /// Config scope or mapping refers to an unregistered plugin.
    #[error("Plugin '{0}' is not registered")]
    UnknownPlugin(String),

    /// A scope for this plugin is already on the stack.
    #[error("A config scope for '{0}' is already open")]
    ScopeAlreadyOpen(String),

    /// Builder call made outside `begin`/`end`.
    #[error("No config scope is open")]
    NoOpenScope,

    /// Server option set before the server was added.
    #[error("Server '{server}' was not added in the scope for '{plugin}'")]
    UnknownServer { plugin: String, server: String },

    /// Two plugins map the same key sequence.
    #[error("Keymap conflict on ({mode}, {key}) between {}", .owners.join(", "))]
    KeymapConflict {
        mode: Mode,
        key: String,
        owners: Vec<String>,
    },

    /// Non-clearing augroup declared by several sources.
    #[error("Augroup '{group}' declared without clear by {}", .sources.join(", "))]
    AugroupAmbiguity { group: String, sources: Vec<String> },

    /// Lifecycle move outside Registered -> Installed -> ConfigLoaded.
    #[error("Plugin '{plugin}' cannot move from {from} to {to}")]
    InvalidTransition {
        plugin: String,
        from: PluginState,
        to: PluginState,
    },

    /// Source collaborator failed.
    #[error("Fetching '{plugin}' failed: {source}")]
    ExternalFetchFailure {
        plugin: String,
        #[source]
        source: FetchError,
    },

    /// Host primitive rejected an operation.
    #[error("Applying {operation} failed: {source}")]
    PrimitiveApplyFailure {
        operation: String,
        #[source]
        source: HostError,
    },

    /// Malformed input at the boundary (null pointer, bad UTF-8, bad JSON).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// ABI entry point called before the engine was set up.
    #[error("Engine not initialized")]
    NotInitialized,
}

impl EngineError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::DuplicateName { .. } => ErrorKind::DuplicateName,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::UnknownPlugin(_) => ErrorKind::UnknownPlugin,
            EngineError::ScopeAlreadyOpen(_) => ErrorKind::ScopeAlreadyOpen,
            EngineError::NoOpenScope => ErrorKind::NoOpenScope,
            EngineError::UnknownServer { .. } => ErrorKind::UnknownServer,
            EngineError::KeymapConflict { .. } => ErrorKind::KeymapConflict,
            EngineError::AugroupAmbiguity { .. } => ErrorKind::AugroupAmbiguity,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::ExternalFetchFailure { .. } => ErrorKind::ExternalFetchFailure,
            EngineError::PrimitiveApplyFailure { .. } => ErrorKind::PrimitiveApplyFailure,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::NotInitialized => ErrorKind::NotInitialized,
        }
    }

    /// Status code for the ABI.
    pub fn status(&self) -> i32 {
        self.kind().ordinal()
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by a host primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The host executed the command and reported a nonzero status.
    #[error("host rejected '{command}' with status {status}")]
    Rejected { command: String, status: i32 },

    /// The host raised an error while running the command.
    #[error("host failed to run '{command}': {message}")]
    Raised { command: String, message: String },

    /// The command could not be handed to the host at all.
    #[error("command not representable: {0}")]
    Unrepresentable(String),

    /// No host is attached.
    #[error("host unavailable")]
    Unavailable,
}

/// Failure reported by the source collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("'{command}' exited with status {status}: {stderr}")]
    Exit {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("'{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("source not installed at {0}")]
    NotInstalled(PathBuf),

    #[error("IO error: {0}")]
    Io(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config directory found.
    #[error("Config directory not found")]
    NoConfigDir,

    /// No data directory to derive the install path from.
    #[error("Data directory not found")]
    NoDataDir,

    /// IO error.
    #[error("IO error reading {path:?}: {message}")]
    Io { path: PathBuf, message: String },

    /// Parse error.
    #[error("Parse error in {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_stable() {
        assert_eq!(ErrorKind::DuplicateName.ordinal(), 1);
        assert_eq!(ErrorKind::KeymapConflict.ordinal(), 7);
        assert_eq!(ErrorKind::PrimitiveApplyFailure.ordinal(), 11);
        assert_eq!(ErrorKind::NotInitialized.ordinal(), 13);
    }

    #[test]
    fn test_keymap_conflict_display() {
        let err = EngineError::KeymapConflict {
            mode: Mode::Normal,
            key: "gd".to_string(),
            owners: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Keymap conflict on (normal, gd) between a, b");
        assert_eq!(err.status(), 7);
    }

    #[test]
    fn test_only_ambiguity_is_warning() {
        assert!(ErrorKind::AugroupAmbiguity.is_warning());
        assert!(!ErrorKind::KeymapConflict.is_warning());
    }
}
