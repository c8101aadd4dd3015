//! Core types for the rns configuration engine.
//!
//! This crate contains the data model shared by the engine and the ABI layer:
//! - Plugin records and lifecycle states
//! - Keymap, server, augroup and autocmd declarations
//! - Sealed configuration snapshots
//! - Resolved operations and their apply stages
//! - Configuration types
//! - Error types

mod config;
mod error;
mod keymap;
mod operation;
mod plugin;
mod snapshot;
mod value;

pub use config::{
    config_dir, config_path, default_install_dir, EngineConfig, GitConfig, LogConfig,
};
pub use error::{ConfigError, EngineError, EngineResult, ErrorKind, FetchError, HostError};
pub use keymap::{KeymapId, KeymapOptions, KeymapOwner, KeymapSpec, Mode};
pub use operation::{Operation, OperationId, Origin, PlannedOperation, Stage, UserCommandOptions};
pub use plugin::{Plugin, PluginState};
pub use snapshot::{AugroupSpec, AutocmdSpec, ServerConfig, Snapshot};
pub use value::OptionValue;
