//! Plugin records and lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered plugin.
///
/// ```text
/// Registered ──install──► Installed ──load configs──► ConfigLoaded
///      │                      │                            │
///      └──────────────────────┴────────────► Failed ◄──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Registered,
    Installed,
    ConfigLoaded,
    Failed,
}

impl PluginState {
    /// Whether `next` directly follows `self` in the lifecycle.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        matches!(
            (self, next),
            (_, PluginState::Failed)
                | (PluginState::Registered, PluginState::Installed)
                | (PluginState::Installed, PluginState::ConfigLoaded)
        )
    }

    /// Installed plugins have a materialized source on disk.
    pub fn is_installed(self) -> bool {
        matches!(self, PluginState::Installed | PluginState::ConfigLoaded)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginState::Registered => "registered",
            PluginState::Installed => "installed",
            PluginState::ConfigLoaded => "config_loaded",
            PluginState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    /// Unique name; also the install directory name.
    pub name: String,

    /// URL or local path the source is fetched from.
    pub source: String,

    pub state: PluginState,

    /// Raw configuration code from `configure_plugin`, run when configs load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_config: Option<String>,

    /// Reason for the last transition to `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    /// Revision of the current configuration (snapshot or raw code).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_revision: Option<u64>,

    /// Configuration revision applied by the last successful config load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_revision: Option<u64>,
}

impl Plugin {
    /// Whether the current configuration has not been applied yet.
    pub fn has_pending_config(&self) -> bool {
        self.config_revision.is_some() && self.config_revision != self.loaded_revision
    }

    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            state: PluginState::Registered,
            raw_config: None,
            failure: None,
            config_revision: None,
            loaded_revision: None,
        }
    }
}
