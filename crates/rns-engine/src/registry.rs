//! Plugin Registry
//!
//! Stores registered plugins, their lifecycle state and their current sealed
//! snapshot. Plugins are kept in registration order, which drives keymap
//! ordering when configuration is applied.

use std::collections::HashMap;

use rns_core::{EngineError, EngineResult, Plugin, PluginState, Snapshot};

/// Entry for a registered plugin.
#[derive(Debug)]
struct PluginEntry {
    plugin: Plugin,
    snapshot: Option<Snapshot>,
}

/// The plugin registry owns every plugin record and its current snapshot.
///
/// Records are never removed within a session.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    /// All registered plugins by name.
    plugins: HashMap<String, PluginEntry>,

    /// Plugin names in registration order.
    order: Vec<String>,

    /// Last config revision handed out.
    revision: u64,
}

impl PluginRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin.
    ///
    /// Re-registering with the same source is a no-op and returns `false`.
    /// A different source fails with `DuplicateName`.
    pub fn register(&mut self, name: &str, source: &str) -> EngineResult<bool> {
        if let Some(entry) = self.plugins.get(name) {
            if entry.plugin.source == source {
                tracing::debug!("Plugin '{}' already registered", name);
                return Ok(false);
            }
            return Err(EngineError::DuplicateName {
                name: name.to_string(),
                existing: entry.plugin.source.clone(),
            });
        }

        self.plugins.insert(
            name.to_string(),
            PluginEntry {
                plugin: Plugin::new(name, source),
                snapshot: None,
            },
        );
        self.order.push(name.to_string());

        tracing::info!("Registered plugin: {} ({})", name, source);
        Ok(true)
    }

    /// Get a plugin record by name.
    pub fn lookup(&self, name: &str) -> EngineResult<&Plugin> {
        self.plugins
            .get(name)
            .map(|entry| &entry.plugin)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    /// Check if a plugin is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Move a plugin to a new lifecycle state.
    ///
    /// Returns the previous state.
    pub fn transition(&mut self, name: &str, next: PluginState) -> EngineResult<PluginState> {
        let entry = self.entry_mut(name)?;
        let from = entry.plugin.state;
        if !from.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                plugin: name.to_string(),
                from,
                to: next,
            });
        }

        entry.plugin.state = next;
        if next != PluginState::Failed {
            entry.plugin.failure = None;
        }
        tracing::debug!("Plugin '{}': {} -> {}", name, from, next);
        Ok(from)
    }

    /// Move a plugin to `Failed`, recording why.
    pub fn fail(&mut self, name: &str, reason: impl Into<String>) -> EngineResult<()> {
        self.transition(name, PluginState::Failed)?;
        let entry = self.entry_mut(name)?;
        entry.plugin.failure = Some(reason.into());
        Ok(())
    }

    /// Store raw configuration code for a plugin.
    ///
    /// Bumps the plugin's config revision so an already loaded plugin is
    /// reapplied on the next config load.
    pub fn set_raw_config(&mut self, name: &str, code: &str) -> EngineResult<u64> {
        let revision = self.next_revision();
        let entry = self
            .plugins
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownPlugin(name.to_string()))?;
        entry.plugin.raw_config = Some(code.to_string());
        entry.plugin.config_revision = Some(revision);
        Ok(revision)
    }

    /// Hand out the next config revision.
    pub fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Replace a plugin's snapshot with a newly sealed one.
    pub fn commit_snapshot(&mut self, snapshot: Snapshot) -> EngineResult<()> {
        let entry = self
            .plugins
            .get_mut(&snapshot.plugin)
            .ok_or_else(|| EngineError::UnknownPlugin(snapshot.plugin.clone()))?;

        if let Some(previous) = &entry.snapshot {
            tracing::debug!(
                "Snapshot r{} supersedes r{} for '{}'",
                snapshot.revision,
                previous.revision,
                snapshot.plugin
            );
        }
        entry.plugin.config_revision = Some(snapshot.revision);
        entry.snapshot = Some(snapshot);
        Ok(())
    }

    /// Current snapshot of a plugin, if one was sealed.
    pub fn snapshot(&self, name: &str) -> Option<&Snapshot> {
        self.plugins.get(name).and_then(|entry| entry.snapshot.as_ref())
    }

    /// Record that a plugin's configuration at `revision` was applied.
    pub fn mark_loaded(&mut self, name: &str, revision: Option<u64>) -> EngineResult<()> {
        let entry = self.entry_mut(name)?;
        entry.plugin.loaded_revision = revision;
        Ok(())
    }

    /// Iterate over plugins and their snapshots in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&Plugin, Option<&Snapshot>)> {
        self.order.iter().filter_map(|name| {
            self.plugins
                .get(name)
                .map(|entry| (&entry.plugin, entry.snapshot.as_ref()))
        })
    }

    /// Plugin names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn entry_mut(&mut self, name: &str) -> EngineResult<&mut PluginEntry> {
        self.plugins
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }
}
