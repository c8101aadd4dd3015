//! Lifecycle Manager
//!
//! Drives plugins through install, update and config loading.
//!
//! ```text
//! install()      Registered ──fetch ok──► Installed
//!                    └────────fetch err─► Failed (reason kept)
//! update()       Installed | ConfigLoaded ──► re-fetch, state unchanged
//! load_configs() Installed + config ──all ops ok──► ConfigLoaded
//!                ConfigLoaded + newer config ──► re-applied
//! ```
//!
//! Failures are collected per plugin; one plugin never stops the batch.

use rns_core::{
    EngineError, EngineResult, ErrorKind, Operation, Origin, PlannedOperation, PluginState,
};
use serde::Serialize;

use crate::declarations::GlobalDeclarations;
use crate::host::HostAdapter;
use crate::pipeline::{apply_operations, ApplyReport};
use crate::registry::PluginRegistry;
use crate::resolver::{resolve, ResolveWarning};
use crate::source::SourceFetcher;

/// Per-plugin lifecycle failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleFailure {
    pub plugin: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl LifecycleFailure {
    fn from_error(plugin: &str, err: &EngineError) -> Self {
        Self {
            plugin: plugin.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of an install or update batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LifecycleReport {
    /// Plugins fetched or updated successfully.
    pub succeeded: Vec<String>,
    /// Plugins not eligible for this batch.
    pub skipped: Vec<String>,
    pub failed: Vec<LifecycleFailure>,
    /// Post-install commands, when any fetch succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_install: Option<ApplyReport>,
}

impl LifecycleReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
            && self
                .post_install
                .as_ref()
                .map(ApplyReport::is_success)
                .unwrap_or(true)
    }
}

/// Config load result for one plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginLoad {
    pub plugin: String,
    /// The plugin reached (or stayed in) `ConfigLoaded`.
    pub loaded: bool,
    pub report: ApplyReport,
}

/// Outcome of `load_configs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub plugins: Vec<PluginLoad>,
    pub warnings: Vec<ResolveWarning>,
    /// Held global keymaps applied after the plugin batches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub globals: Option<ApplyReport>,
}

impl LoadReport {
    pub fn is_success(&self) -> bool {
        self.plugins.iter().all(|p| p.loaded)
            && self.globals.as_ref().map_or(true, ApplyReport::is_success)
    }

    /// Every per-operation failure across plugins and held globals.
    pub fn failures(&self) -> impl Iterator<Item = &crate::pipeline::FailedOperation> {
        self.plugins
            .iter()
            .flat_map(|p| p.report.failed.iter())
            .chain(self.globals.iter().flat_map(|g| g.failed.iter()))
    }
}

/// Install, update and load plugins.
pub struct LifecycleManager {
    fetcher: Box<dyn SourceFetcher>,
    post_install: Vec<String>,
}

impl LifecycleManager {
    pub fn new(fetcher: Box<dyn SourceFetcher>, post_install: Vec<String>) -> Self {
        Self {
            fetcher,
            post_install,
        }
    }

    /// Fetch every `Registered` plugin.
    ///
    /// Installed plugins are left alone, so calling this twice is harmless.
    pub fn install(
        &self,
        registry: &mut PluginRegistry,
        host: &mut dyn HostAdapter,
    ) -> LifecycleReport {
        let mut report = LifecycleReport::default();

        for name in registry.names() {
            let plugin = match registry.lookup(&name) {
                Ok(plugin) if plugin.state == PluginState::Registered => plugin.clone(),
                _ => {
                    report.skipped.push(name);
                    continue;
                }
            };

            match self.fetcher.fetch(&plugin) {
                Ok(()) => match registry.transition(&name, PluginState::Installed) {
                    Ok(_) => {
                        tracing::info!("Installed plugin: {}", name);
                        report.succeeded.push(name);
                    }
                    Err(e) => report.failed.push(LifecycleFailure::from_error(&name, &e)),
                },
                Err(source) => {
                    let err = EngineError::ExternalFetchFailure {
                        plugin: name.clone(),
                        source,
                    };
                    tracing::warn!("{}", err);
                    if let Err(e) = registry.fail(&name, err.to_string()) {
                        tracing::warn!("Could not mark '{}' failed: {}", name, e);
                    }
                    report.failed.push(LifecycleFailure::from_error(&name, &err));
                }
            }
        }

        self.run_post_install(&mut report, host);
        report
    }

    /// Re-fetch installed plugins. A failed update leaves the plugin's state
    /// unchanged.
    pub fn update(
        &self,
        registry: &mut PluginRegistry,
        host: &mut dyn HostAdapter,
    ) -> LifecycleReport {
        let mut report = LifecycleReport::default();

        for name in registry.names() {
            let plugin = match registry.lookup(&name) {
                Ok(plugin) if plugin.state.is_installed() => plugin.clone(),
                _ => {
                    report.skipped.push(name);
                    continue;
                }
            };

            match self.fetcher.update(&plugin) {
                Ok(()) => {
                    tracing::info!("Updated plugin: {}", name);
                    report.succeeded.push(name);
                }
                Err(source) => {
                    let err = EngineError::ExternalFetchFailure {
                        plugin: name.clone(),
                        source,
                    };
                    tracing::warn!("{}", err);
                    report.failed.push(LifecycleFailure::from_error(&name, &err));
                }
            }
        }

        self.run_post_install(&mut report, host);
        report
    }

    /// Apply pending plugin configuration.
    ///
    /// The whole configuration is resolved first; a keymap conflict aborts
    /// before anything is applied.
    pub fn load_configs(
        &self,
        registry: &mut PluginRegistry,
        globals: &GlobalDeclarations,
        host: &mut dyn HostAdapter,
    ) -> EngineResult<LoadReport> {
        let plan = resolve(registry, globals)?;
        let mut plugins = Vec::new();

        for name in registry.names() {
            let (state, revision) = {
                let plugin = registry.lookup(&name)?;
                let eligible = match plugin.state {
                    PluginState::Installed => plugin.config_revision.is_some(),
                    PluginState::ConfigLoaded => plugin.has_pending_config(),
                    _ => false,
                };
                if !eligible {
                    continue;
                }
                (plugin.state, plugin.config_revision)
            };

            let report = apply_operations(host, &plan.partition(&name));
            let loaded = if report.is_success() {
                if state == PluginState::Installed {
                    registry.transition(&name, PluginState::ConfigLoaded)?;
                }
                registry.mark_loaded(&name, revision)?;
                tracing::info!(
                    "Loaded config for '{}' ({} operations)",
                    name,
                    report.applied.len()
                );
                true
            } else {
                tracing::warn!(
                    "Config for '{}' incomplete: {} of {} operations failed",
                    name,
                    report.failed.len(),
                    report.total()
                );
                false
            };

            plugins.push(PluginLoad {
                plugin: name,
                loaded,
                report,
            });
        }

        Ok(LoadReport {
            plugins,
            warnings: plan.warnings,
            globals: None,
        })
    }

    fn run_post_install(&self, report: &mut LifecycleReport, host: &mut dyn HostAdapter) {
        if report.succeeded.is_empty() || self.post_install.is_empty() {
            return;
        }

        let ops: Vec<_> = self
            .post_install
            .iter()
            .map(|cmd| {
                PlannedOperation::new(Origin::Lifecycle, Operation::ExecCommand(cmd.clone()))
            })
            .collect();
        report.post_install = Some(apply_operations(host, &ops));
    }
}
