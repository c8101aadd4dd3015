//! Primitive host adapter.
//!
//! The engine never touches editor state directly. Every resolved operation
//! is forwarded to a `HostAdapter`, one primitive per call.

use rns_core::{AutocmdSpec, HostError, KeymapSpec, Operation, OptionValue, UserCommandOptions};
use serde_json::Value;

/// Host editor primitives.
///
/// Implementations marshal each call to the editor and report whether the
/// editor accepted it. They hold no engine logic.
#[cfg_attr(test, mockall::automock)]
pub trait HostAdapter: Send {
    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), HostError>;

    fn set_global(&mut self, name: &str, value: &str) -> Result<(), HostError>;

    /// Create or reset an autocmd group.
    fn create_augroup(&mut self, name: &str, clear: bool) -> Result<(), HostError>;

    fn create_autocmd(&mut self, autocmd: &AutocmdSpec) -> Result<(), HostError>;

    /// Bind a key sequence; buffer-local when `keymap.opts.buffer` is set.
    fn set_keymap(&mut self, keymap: &KeymapSpec) -> Result<(), HostError>;

    fn create_user_command(
        &mut self,
        name: &str,
        command: &str,
        opts: &UserCommandOptions,
    ) -> Result<(), HostError>;

    /// Set up a language server with a JSON config table.
    fn setup_server(&mut self, server: &str, config: &Value) -> Result<(), HostError>;

    fn exec_command(&mut self, command: &str) -> Result<(), HostError>;

    fn exec_code(&mut self, code: &str) -> Result<(), HostError>;
}

/// Forward one operation to the matching primitive.
pub fn dispatch(host: &mut dyn HostAdapter, operation: &Operation) -> Result<(), HostError> {
    match operation {
        Operation::SetOption { name, value } => host.set_option(name, value),
        Operation::SetGlobal { name, value } => host.set_global(name, value),
        Operation::CreateAugroup(group) => host.create_augroup(&group.name, group.clear),
        Operation::CreateAutocmd(autocmd) => host.create_autocmd(autocmd),
        Operation::SetKeymap(keymap) => host.set_keymap(keymap),
        Operation::CreateUserCommand {
            name,
            command,
            opts,
        } => host.create_user_command(name, command, opts),
        Operation::SetupServer { server, config } => host.setup_server(server, config),
        Operation::ExecCommand(command) => host.exec_command(command),
        Operation::ExecCode(code) => host.exec_code(code),
    }
}
