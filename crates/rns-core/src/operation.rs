//! Resolved host operations and their apply stages.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keymap::KeymapSpec;
use crate::snapshot::{AugroupSpec, AutocmdSpec};
use crate::value::OptionValue;

/// Apply stage. Operations are applied in ascending stage order so that
/// later primitives can reference identifiers created by earlier ones
/// (autocmds follow the augroups they attach to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Options,
    Globals,
    Augroups,
    Autocmds,
    Keymaps,
    UserCommands,
    Servers,
    Exec,
}

/// Where an operation came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Origin {
    /// Flat declaration, identified by its sequence number.
    Global(u64),
    /// A plugin's sealed snapshot or raw configuration.
    Plugin(String),
    /// Post-install commands run by the lifecycle manager.
    Lifecycle,
}

impl Origin {
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Origin::Plugin(name) => Some(name),
            Origin::Global(_) | Origin::Lifecycle => None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Global(seq) => write!(f, "global#{}", seq),
            Origin::Plugin(name) => write!(f, "plugin:{}", name),
            Origin::Lifecycle => f.write_str("lifecycle"),
        }
    }
}

/// Options for user command creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct UserCommandOptions {
    /// `-nargs=` value, e.g. `"*"` or `"1"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nargs: Option<String>,
    pub bang: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

/// A single host primitive call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    SetOption { name: String, value: OptionValue },
    SetGlobal { name: String, value: String },
    CreateAugroup(AugroupSpec),
    CreateAutocmd(AutocmdSpec),
    SetKeymap(KeymapSpec),
    CreateUserCommand {
        name: String,
        command: String,
        opts: UserCommandOptions,
    },
    SetupServer { server: String, config: Value },
    ExecCommand(String),
    ExecCode(String),
}

impl Operation {
    pub fn stage(&self) -> Stage {
        match self {
            Operation::SetOption { .. } => Stage::Options,
            Operation::SetGlobal { .. } => Stage::Globals,
            Operation::CreateAugroup(_) => Stage::Augroups,
            Operation::CreateAutocmd(_) => Stage::Autocmds,
            Operation::SetKeymap(_) => Stage::Keymaps,
            Operation::CreateUserCommand { .. } => Stage::UserCommands,
            Operation::SetupServer { .. } => Stage::Servers,
            Operation::ExecCommand(_) | Operation::ExecCode(_) => Stage::Exec,
        }
    }

    /// Re-applying produces the same host state.
    ///
    /// Autocmd creation accumulates on the host, and exec requests are
    /// one-shot side effects.
    pub fn is_idempotent(&self) -> bool {
        !matches!(
            self,
            Operation::CreateAutocmd(_) | Operation::ExecCommand(_) | Operation::ExecCode(_)
        )
    }

    /// Short human-readable identity, used in reports and logs.
    pub fn key(&self) -> String {
        match self {
            Operation::SetOption { name, .. } => format!("option {}", name),
            Operation::SetGlobal { name, .. } => format!("global {}", name),
            Operation::CreateAugroup(group) => format!("augroup {}", group.name),
            Operation::CreateAutocmd(au) => match &au.group {
                Some(group) => format!("autocmd {} {} [{}]", au.event, au.pattern, group),
                None => format!("autocmd {} {}", au.event, au.pattern),
            },
            Operation::SetKeymap(km) => match km.opts.buffer {
                Some(buf) => format!("keymap {} {} <buffer={}>", km.mode.prefix(), km.lhs, buf),
                None => format!("keymap {} {}", km.mode.prefix(), km.lhs),
            },
            Operation::CreateUserCommand { name, .. } => format!("command {}", name),
            Operation::SetupServer { server, .. } => format!("server {}", server),
            Operation::ExecCommand(cmd) => format!("exec {}", truncate(cmd)),
            Operation::ExecCode(code) => format!("lua {}", truncate(code)),
        }
    }
}

fn truncate(s: &str) -> String {
    const MAX: usize = 40;
    let line = s.lines().next().unwrap_or("");
    if line.chars().count() > MAX || line.len() != s.len() {
        let head: String = line.chars().take(MAX).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}

/// Identity of an operation within a batch report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OperationId {
    /// Position in the batch.
    pub index: usize,
    pub stage: Stage,
    pub origin: Origin,
    pub key: String,
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} ({})", self.index, self.key, self.origin)
    }
}

/// An operation tagged with its origin, as emitted by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedOperation {
    pub origin: Origin,
    pub operation: Operation,
}

impl PlannedOperation {
    pub fn new(origin: Origin, operation: Operation) -> Self {
        Self { origin, operation }
    }

    pub fn stage(&self) -> Stage {
        self.operation.stage()
    }
}
