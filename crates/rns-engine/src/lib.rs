//! Configuration engine for rns.
//!
//! This crate turns plugin registrations and configuration declarations into
//! ordered host primitive calls:
//! - Plugin registry with lifecycle state and sealed snapshots
//! - Scoped config builder (`begin`/`end` frames)
//! - Global (ownerless) declarations from the flat API
//! - Conflict resolver producing a staged operation list
//! - Partial-failure apply pipeline
//! - Install/update/load lifecycle
//! - Lua bindings for hosts that embed mlua
//!
//! ## Data Flow
//!
//! ```text
//! register_plugin ──► PluginRegistry ◄── end() seals ── ConfigBuilder ◄── begin()/add_*()
//!                          │
//! flat calls ──► GlobalDeclarations
//!                          │
//!                          ▼
//!                      resolve() ──► ResolvedPlan ──► apply_operations() ──► HostAdapter
//!                                                            ▲
//!               LifecycleManager (install/update/load) ──────┘
//! ```

pub mod builder;
pub mod declarations;
pub mod engine;
pub mod host;
pub mod lifecycle;
pub mod lua;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use builder::{ConfigBuilder, Sealed};
pub use declarations::{Declaration, GlobalDeclarations};
pub use engine::ConfigEngine;
pub use host::{dispatch, HostAdapter};
pub use lifecycle::{LifecycleFailure, LifecycleManager, LifecycleReport, LoadReport, PluginLoad};
pub use lua::{create_rns_table, register_rns_api, EngineHandle};
pub use pipeline::{apply_operations, ApplyReport, FailedOperation};
pub use registry::PluginRegistry;
pub use resolver::{resolve, ResolveWarning, ResolvedPlan};
pub use source::{GitSourceFetcher, SourceFetcher};

// Re-export rns_core types for convenience
pub use rns_core::{
    EngineError, EngineResult, ErrorKind, KeymapOptions, KeymapSpec, Mode, Operation, OptionValue,
    Origin, Plugin, PluginState, Snapshot,
};
