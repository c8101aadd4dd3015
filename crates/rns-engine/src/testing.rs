//! Test doubles that model host and source state.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rns_core::{
    AutocmdSpec, FetchError, HostError, KeymapId, KeymapSpec, OptionValue, Plugin,
    UserCommandOptions,
};
use serde_json::Value;

use crate::host::HostAdapter;
use crate::source::SourceFetcher;

/// Observable editor state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostState {
    pub options: BTreeMap<String, OptionValue>,
    pub globals: BTreeMap<String, String>,
    pub augroups: BTreeSet<String>,
    pub autocmds: Vec<AutocmdSpec>,
    pub keymaps: BTreeMap<KeymapId, String>,
    pub commands: BTreeMap<String, String>,
    pub servers: BTreeMap<String, Value>,
    /// Exec commands and code, in call order.
    pub executed: Vec<String>,
}

/// In-memory host. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every primitive call naming `target`.
    pub fn fail_on(&self, target: &str) {
        self.failing.lock().insert(target.to_string());
    }

    pub fn state(&self) -> HostState {
        self.state.lock().clone()
    }

    fn check(&self, target: &str) -> Result<(), HostError> {
        if self.failing.lock().contains(target) {
            return Err(HostError::Rejected {
                command: target.to_string(),
                status: 1,
            });
        }
        Ok(())
    }
}

impl HostAdapter for FakeHost {
    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), HostError> {
        self.check(name)?;
        self.state.lock().options.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn set_global(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        self.check(name)?;
        self.state.lock().globals.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn create_augroup(&mut self, name: &str, clear: bool) -> Result<(), HostError> {
        self.check(name)?;
        let mut state = self.state.lock();
        if clear {
            state.autocmds.retain(|au| au.group.as_deref() != Some(name));
        }
        state.augroups.insert(name.to_string());
        Ok(())
    }

    fn create_autocmd(&mut self, autocmd: &AutocmdSpec) -> Result<(), HostError> {
        self.check(&autocmd.event)?;
        let mut state = self.state.lock();
        if let Some(group) = &autocmd.group {
            if !state.augroups.contains(group) {
                return Err(HostError::Rejected {
                    command: format!("autocmd {}", group),
                    status: 1,
                });
            }
        }
        state.autocmds.push(autocmd.clone());
        Ok(())
    }

    fn set_keymap(&mut self, keymap: &KeymapSpec) -> Result<(), HostError> {
        self.check(&keymap.lhs)?;
        self.state.lock().keymaps.insert(keymap.id(), keymap.rhs.clone());
        Ok(())
    }

    fn create_user_command(
        &mut self,
        name: &str,
        command: &str,
        _opts: &UserCommandOptions,
    ) -> Result<(), HostError> {
        self.check(name)?;
        self.state.lock().commands.insert(name.to_string(), command.to_string());
        Ok(())
    }

    fn setup_server(&mut self, server: &str, config: &Value) -> Result<(), HostError> {
        self.check(server)?;
        self.state.lock().servers.insert(server.to_string(), config.clone());
        Ok(())
    }

    fn exec_command(&mut self, command: &str) -> Result<(), HostError> {
        self.check(command)?;
        self.state.lock().executed.push(command.to_string());
        Ok(())
    }

    fn exec_code(&mut self, code: &str) -> Result<(), HostError> {
        self.check(code)?;
        self.state.lock().executed.push(code.to_string());
        Ok(())
    }
}

/// In-memory source collaborator recording every call.
#[derive(Debug, Clone, Default)]
pub struct FakeFetcher {
    failing: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail both fetch and update for `plugin`.
    pub fn fail_on(&self, plugin: &str) {
        self.failing.lock().insert(plugin.to_string());
    }

    pub fn recover(&self, plugin: &str) {
        self.failing.lock().remove(plugin);
    }

    /// Calls as `"fetch <name>"` / `"update <name>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, verb: &str, plugin: &Plugin) -> Result<(), FetchError> {
        self.calls.lock().push(format!("{} {}", verb, plugin.name));
        if self.failing.lock().contains(&plugin.name) {
            return Err(FetchError::Exit {
                command: format!("git {} {}", verb, plugin.source),
                status: 128,
                stderr: "repository not found".to_string(),
            });
        }
        Ok(())
    }
}

impl SourceFetcher for FakeFetcher {
    fn fetch(&self, plugin: &Plugin) -> Result<(), FetchError> {
        self.record("fetch", plugin)
    }

    fn update(&self, plugin: &Plugin) -> Result<(), FetchError> {
        self.record("update", plugin)
    }
}
