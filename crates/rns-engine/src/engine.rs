//! Config engine facade.
//!
//! Owns the registry, builder stack, global declarations and lifecycle
//! manager, and wires them to a host adapter. Both the flat API and the
//! structured builder go through here.

use rns_core::{
    AugroupSpec, AutocmdSpec, ConfigError, EngineConfig, EngineError, EngineResult, KeymapOptions,
    KeymapOwner, KeymapSpec, Mode, Operation, OptionValue, Plugin, UserCommandOptions,
};
use serde_json::Value;

use crate::builder::ConfigBuilder;
use crate::declarations::GlobalDeclarations;
use crate::host::HostAdapter;
use crate::lifecycle::{LifecycleManager, LifecycleReport, LoadReport};
use crate::pipeline::{apply_operations, ApplyReport};
use crate::registry::PluginRegistry;
use crate::resolver::{resolve, resolve_globals, ResolveWarning, ResolvedPlan};
use crate::source::{GitSourceFetcher, SourceFetcher};

/// The configuration and plugin-management engine.
pub struct ConfigEngine {
    registry: PluginRegistry,
    builder: ConfigBuilder,
    globals: GlobalDeclarations,
    lifecycle: LifecycleManager,
    host: Box<dyn HostAdapter>,
}

impl ConfigEngine {
    pub fn new(
        host: Box<dyn HostAdapter>,
        fetcher: Box<dyn SourceFetcher>,
        post_install: Vec<String>,
    ) -> Self {
        Self {
            registry: PluginRegistry::new(),
            builder: ConfigBuilder::new(),
            globals: GlobalDeclarations::new(),
            lifecycle: LifecycleManager::new(fetcher, post_install),
            host,
        }
    }

    /// Engine with a git fetcher set up from `config`.
    pub fn from_config(
        host: Box<dyn HostAdapter>,
        config: &EngineConfig,
    ) -> Result<Self, ConfigError> {
        let fetcher = GitSourceFetcher::from_config(config)?;
        Ok(Self::new(host, Box::new(fetcher), config.post_install.clone()))
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Register a plugin. Returns `false` when it was already registered with
    /// the same source.
    pub fn register_plugin(&mut self, name: &str, source: &str) -> EngineResult<bool> {
        self.registry.register(name, source)
    }

    /// Attach raw configuration code, run when configs load.
    pub fn configure_plugin(&mut self, name: &str, code: &str) -> EngineResult<()> {
        self.registry.set_raw_config(name, code)?;
        tracing::debug!("Stored raw config for '{}'", name);
        Ok(())
    }

    pub fn plugin(&self, name: &str) -> EngineResult<&Plugin> {
        self.registry.lookup(name)
    }

    /// All plugins in registration order.
    pub fn plugins(&self) -> Vec<Plugin> {
        self.registry.iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    // ========================================================================
    // Structured builder
    // ========================================================================

    pub fn config_begin(&mut self, name: &str) -> EngineResult<()> {
        self.builder.begin(&self.registry, name)
    }

    pub fn add_server(&mut self, server: &str) -> EngineResult<()> {
        self.builder.add_server(server)
    }

    pub fn set_server_option(&mut self, server: &str, key: &str, value: &str) -> EngineResult<()> {
        self.builder.set_server_option(server, key, value)
    }

    /// Keymap owned by the current scope's plugin (non-recursive).
    pub fn add_keymap(&mut self, mode: Mode, lhs: &str, rhs: &str) -> EngineResult<()> {
        self.builder.add_keymap(mode, lhs, rhs, KeymapOptions::noremap())
    }

    pub fn add_keymap_with(
        &mut self,
        mode: Mode,
        lhs: &str,
        rhs: &str,
        opts: KeymapOptions,
    ) -> EngineResult<()> {
        self.builder.add_keymap(mode, lhs, rhs, opts)
    }

    /// Keymap owned by `plugin`, declared in the current scope.
    pub fn add_mapping(
        &mut self,
        plugin: &str,
        mode: Mode,
        lhs: &str,
        rhs: &str,
    ) -> EngineResult<()> {
        self.builder.add_mapping(&self.registry, plugin, mode, lhs, rhs)
    }

    pub fn add_augroup(&mut self, name: &str, clear: bool) -> EngineResult<()> {
        self.builder.add_augroup(name, clear)
    }

    pub fn add_autocmd(&mut self, autocmd: AutocmdSpec) -> EngineResult<()> {
        self.builder.add_autocmd(autocmd)
    }

    /// Close the innermost scope and commit its snapshot. Returns the new
    /// revision.
    pub fn config_end(&mut self) -> EngineResult<u64> {
        let sealed = self.builder.end()?;
        let revision = self.registry.next_revision();
        let plugin = sealed.plugin.clone();
        self.registry.commit_snapshot(sealed.into_snapshot(revision))?;
        tracing::info!("Committed config r{} for '{}'", revision, plugin);
        Ok(revision)
    }

    /// Drop open scopes down to and including `name` without committing
    /// them. Returns how many were dropped.
    pub fn config_abandon(&mut self, name: &str) -> usize {
        self.builder.abandon(name)
    }

    /// Plugin of the innermost open scope.
    pub fn current_scope(&self) -> Option<&str> {
        self.builder.current()
    }

    // ========================================================================
    // Flat declarations
    // ========================================================================

    /// Record a global declaration and apply everything pending.
    pub fn declare(&mut self, operation: Operation) -> ApplyReport {
        self.globals.declare(operation);
        self.flush()
    }

    /// Apply global declarations made since the last flush.
    ///
    /// Global keymaps shadowed by a plugin keymap are skipped and held. A
    /// held keymap is applied by the first flush that finds its identity
    /// unclaimed again.
    pub fn flush(&mut self) -> ApplyReport {
        let plan = resolve_globals(&self.registry, &self.globals);
        let globals = &self.globals;
        let pending = plan.globals(|seq| globals.is_pending(seq));
        let warnings = self.new_warnings(&plan);

        let mut report = apply_operations(self.host.as_mut(), &pending);
        report.warnings = warnings;
        self.globals.mark_flushed(self.globals.last_seq());
        if !plan.shadowed.is_empty() {
            tracing::debug!("Holding {} shadowed global keymaps", plan.shadowed.len());
        }
        self.globals.hold(plan.shadowed);
        report
    }

    /// Warnings raised by declarations made since the last flush.
    fn new_warnings(&self, plan: &ResolvedPlan) -> Vec<ResolveWarning> {
        let pending: Vec<&Operation> = self
            .globals
            .iter()
            .filter(|d| self.globals.is_new(d.seq))
            .map(|d| &d.operation)
            .collect();

        plan.warnings
            .iter()
            .filter(|w| {
                pending.iter().any(|op| match (w, op) {
                    (
                        ResolveWarning::KeymapShadowed {
                            mode, lhs, buffer, ..
                        },
                        Operation::SetKeymap(km),
                    ) => km.mode == *mode && km.lhs == *lhs && km.opts.buffer == *buffer,
                    (
                        ResolveWarning::AugroupAmbiguity { group, .. },
                        Operation::CreateAugroup(g),
                    ) => g.name == *group,
                    _ => false,
                })
            })
            .cloned()
            .collect()
    }

    pub fn set_option(&mut self, name: &str, value: impl Into<OptionValue>) -> ApplyReport {
        self.declare(Operation::SetOption {
            name: name.to_string(),
            value: value.into(),
        })
    }

    /// Set a list option to `old,new`, or `new` when `old` is empty.
    pub fn opt(&mut self, key: &str, old: &str, new: &str) -> ApplyReport {
        let value = if old.is_empty() {
            new.to_string()
        } else {
            format!("{},{}", old, new)
        };
        self.set_option(key, value)
    }

    pub fn set_global(&mut self, name: &str, value: &str) -> ApplyReport {
        self.declare(Operation::SetGlobal {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    /// Ownerless keymap. Loses to any plugin keymap on the same identity.
    pub fn set_keymap(
        &mut self,
        mode: Mode,
        lhs: &str,
        rhs: &str,
        opts: KeymapOptions,
    ) -> ApplyReport {
        self.declare(Operation::SetKeymap(KeymapSpec {
            mode,
            lhs: lhs.to_string(),
            rhs: rhs.to_string(),
            owner: KeymapOwner::Global,
            opts,
        }))
    }

    pub fn create_user_command(
        &mut self,
        name: &str,
        command: &str,
        opts: UserCommandOptions,
    ) -> ApplyReport {
        self.declare(Operation::CreateUserCommand {
            name: name.to_string(),
            command: command.to_string(),
            opts,
        })
    }

    pub fn create_augroup(&mut self, name: &str, clear: bool) -> ApplyReport {
        self.declare(Operation::CreateAugroup(AugroupSpec {
            name: name.to_string(),
            clear,
        }))
    }

    pub fn create_autocmd(&mut self, autocmd: AutocmdSpec) -> ApplyReport {
        self.declare(Operation::CreateAutocmd(autocmd))
    }

    pub fn exec_command(&mut self, command: &str) -> ApplyReport {
        self.declare(Operation::ExecCommand(command.to_string()))
    }

    pub fn exec_code(&mut self, code: &str) -> ApplyReport {
        self.declare(Operation::ExecCode(code.to_string()))
    }

    pub fn setup_server(&mut self, server: &str, config: Value) -> ApplyReport {
        self.declare(Operation::SetupServer {
            server: server.to_string(),
            config,
        })
    }

    /// Global server setup from a JSON config string.
    pub fn setup_lsp(&mut self, server: &str, config_json: &str) -> EngineResult<ApplyReport> {
        let config: Value = serde_json::from_str(config_json).map_err(|e| {
            EngineError::InvalidArgument(format!("invalid config for '{}': {}", server, e))
        })?;
        Ok(self.setup_server(server, config))
    }

    // ========================================================================
    // Resolution and lifecycle
    // ========================================================================

    /// Resolve the full configuration without applying it.
    pub fn resolve(&self) -> EngineResult<ResolvedPlan> {
        resolve(&self.registry, &self.globals)
    }

    pub fn install_plugins(&mut self) -> LifecycleReport {
        self.lifecycle.install(&mut self.registry, self.host.as_mut())
    }

    pub fn update_plugins(&mut self) -> LifecycleReport {
        self.lifecycle.update(&mut self.registry, self.host.as_mut())
    }

    /// Apply pending plugin configs, then any held global keymap that no
    /// live plugin claims anymore.
    pub fn load_plugin_configs(&mut self) -> EngineResult<LoadReport> {
        let mut report =
            self.lifecycle
                .load_configs(&mut self.registry, &self.globals, self.host.as_mut())?;

        let globals = self.flush();
        if globals.total() > 0 {
            report.globals = Some(globals);
        }
        Ok(report)
    }
}
