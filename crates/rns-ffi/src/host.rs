//! Ex-command host adapter.
//!
//! Renders every primitive into a single editor command line and hands it to
//! a `CommandSink`. Under the C ABI the sink calls back into the editor
//! through the executor registered with `rns_init`; loaded as a Lua module
//! it goes through `vim.cmd`.
//!
//! ```text
//! Operation ──render_*()──► "nnoremap <silent> gd <cmd>Def<CR>" ──► CommandSink
//! ```

use std::ffi::CString;
use std::os::raw::{c_char, c_int};

use mlua::{Function, Lua, Result as LuaResult, Table};
use rns_core::{AutocmdSpec, HostError, KeymapSpec, OptionValue, UserCommandOptions};
use rns_engine::HostAdapter;
use serde_json::Value;

/// Editor callback executing one command line. Returns 0 on success.
pub type CommandExecutor = extern "C" fn(command: *const c_char) -> c_int;

/// Destination for rendered command lines.
pub trait CommandSink: Send {
    fn run(&mut self, command: &str) -> Result<(), HostError>;
}

/// Sink calling the editor's registered executor.
pub struct CallbackSink {
    executor: CommandExecutor,
}

impl CallbackSink {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

impl CommandSink for CallbackSink {
    fn run(&mut self, command: &str) -> Result<(), HostError> {
        let c_command = CString::new(command)
            .map_err(|_| HostError::Unrepresentable(format!("NUL byte in '{}'", command)))?;

        tracing::debug!("exec: {}", command);
        let status = (self.executor)(c_command.as_ptr());
        if status != 0 {
            return Err(HostError::Rejected {
                command: command.to_string(),
                status,
            });
        }
        Ok(())
    }
}

/// Sink running command lines through a Lua function, normally `vim.cmd`.
pub struct LuaCommandSink {
    cmd: Function,
}

impl LuaCommandSink {
    pub fn new(cmd: Function) -> Self {
        Self { cmd }
    }

    /// Sink over the editor's `vim.cmd`.
    pub fn from_globals(lua: &Lua) -> LuaResult<Self> {
        let vim: Table = lua.globals().get("vim")?;
        Ok(Self::new(vim.get("cmd")?))
    }
}

impl CommandSink for LuaCommandSink {
    fn run(&mut self, command: &str) -> Result<(), HostError> {
        tracing::debug!("vim.cmd: {}", command);
        self.cmd
            .call::<()>(command)
            .map_err(|e| HostError::Raised {
                command: command.to_string(),
                message: e.to_string(),
            })
    }
}

/// Host adapter rendering primitives as editor commands.
pub struct ExCommandHost {
    sink: Box<dyn CommandSink>,
}

impl ExCommandHost {
    pub fn new(sink: Box<dyn CommandSink>) -> Self {
        Self { sink }
    }

    pub fn with_executor(executor: CommandExecutor) -> Self {
        Self::new(Box::new(CallbackSink::new(executor)))
    }
}

impl HostAdapter for ExCommandHost {
    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), HostError> {
        self.sink.run(&render_option(name, value))
    }

    fn set_global(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        self.sink.run(&render_global(name, value))
    }

    fn create_augroup(&mut self, name: &str, clear: bool) -> Result<(), HostError> {
        self.sink.run(&render_augroup(name, clear))
    }

    fn create_autocmd(&mut self, autocmd: &AutocmdSpec) -> Result<(), HostError> {
        self.sink.run(&render_autocmd(autocmd))
    }

    fn set_keymap(&mut self, keymap: &KeymapSpec) -> Result<(), HostError> {
        let command = render_keymap(keymap)?;
        self.sink.run(&command)
    }

    fn create_user_command(
        &mut self,
        name: &str,
        command: &str,
        opts: &UserCommandOptions,
    ) -> Result<(), HostError> {
        self.sink.run(&render_user_command(name, command, opts))
    }

    fn setup_server(&mut self, server: &str, config: &Value) -> Result<(), HostError> {
        self.sink.run(&render_server(server, config))
    }

    fn exec_command(&mut self, command: &str) -> Result<(), HostError> {
        self.sink.run(command)
    }

    fn exec_code(&mut self, code: &str) -> Result<(), HostError> {
        self.sink.run(&render_code(code))
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// `set name`, `set noname` or `set name=value`.
pub fn render_option(name: &str, value: &OptionValue) -> String {
    match value {
        OptionValue::Bool(true) => format!("set {}", name),
        OptionValue::Bool(false) => format!("set no{}", name),
        OptionValue::Int(n) => format!("set {}={}", name, n),
        OptionValue::Str(s) => format!("set {}={}", name, escape_set_value(s)),
    }
}

/// Backslash, space, bar and double quote are special in `:set` values.
fn escape_set_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ' ' | '|' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `let g:name="value"`.
pub fn render_global(name: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("let g:{}=\"{}\"", name, escaped)
}

/// `{mode}{nore}map [<buffer>] [<silent>] lhs rhs`.
///
/// A bar in the rhs would end the command, so it is written as `<Bar>`.
pub fn render_keymap(keymap: &KeymapSpec) -> Result<String, HostError> {
    if keymap.lhs.is_empty() || keymap.lhs.chars().any(char::is_whitespace) {
        return Err(HostError::Unrepresentable(format!(
            "keymap lhs '{}' must be non-empty without whitespace",
            keymap.lhs
        )));
    }
    // `nmap gd` with nothing after it lists mappings instead of binding one
    if keymap.rhs.trim().is_empty() {
        return Err(HostError::Unrepresentable(format!(
            "keymap '{}' has an empty rhs",
            keymap.lhs
        )));
    }

    let mut parts = vec![keymap.mode.map_command(keymap.opts.noremap)];
    match keymap.opts.buffer {
        Some(0) => parts.push("<buffer>".to_string()),
        Some(n) => parts.push(format!("<buffer={}>", n)),
        None => {}
    }
    if keymap.opts.silent {
        parts.push("<silent>".to_string());
    }
    parts.push(keymap.lhs.clone());
    parts.push(keymap.rhs.replace('|', "<Bar>"));
    Ok(parts.join(" "))
}

/// `command! [-nargs=N] [-bang] Name command`.
pub fn render_user_command(name: &str, command: &str, opts: &UserCommandOptions) -> String {
    let mut parts = vec!["command!".to_string()];
    if let Some(nargs) = &opts.nargs {
        parts.push(format!("-nargs={}", nargs));
    }
    if opts.bang {
        parts.push("-bang".to_string());
    }
    parts.push(name.to_string());
    parts.push(command.to_string());
    parts.join(" ")
}

pub fn render_augroup(name: &str, clear: bool) -> String {
    format!(
        "lua vim.api.nvim_create_augroup({}, {{ clear = {} }})",
        lua_quote(name),
        clear
    )
}

pub fn render_autocmd(autocmd: &AutocmdSpec) -> String {
    let mut fields = vec![
        format!("pattern = {}", lua_quote(&autocmd.pattern)),
        format!("command = {}", lua_quote(&autocmd.command)),
    ];
    if let Some(group) = &autocmd.group {
        fields.push(format!("group = {}", lua_quote(group)));
    }
    format!(
        "lua vim.api.nvim_create_autocmd({}, {{ {} }})",
        lua_quote(&autocmd.event),
        fields.join(", ")
    )
}

/// `lua require('lspconfig')['server'].setup(vim.json.decode('...'))`.
pub fn render_server(server: &str, config: &Value) -> String {
    format!(
        "lua require('lspconfig')[{}].setup(vim.json.decode({}))",
        lua_quote(server),
        lua_quote(&config.to_string())
    )
}

/// Single-line code runs as `lua code`; anything longer is loaded as a
/// chunk so it fits on one command line.
pub fn render_code(code: &str) -> String {
    if code.contains('\n') || code.contains('\r') {
        format!("lua assert(load({}))()", lua_quote(code))
    } else {
        format!("lua {}", code)
    }
}

/// Single-quoted Lua string literal.
pub fn lua_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\{:03}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
