//! Lua bindings for the config engine.
//!
//! This module implements the `rns` global namespace:
//! - `rns.register_plugin(name, source)` / `rns.configure_plugin(name, code)`
//! - `rns.plugin_config(name, fn)` - scoped structured config
//! - `rns.config_begin` / `rns.config_end` and the sub-builders
//! - Flat calls (`rns.opt`, `rns.map`, `rns.autocmd`, ...)
//! - `rns.install_plugins()` / `rns.update_plugins()` / `rns.load_configs()`
//!
//! Structural errors raise Lua errors. Batch outcomes are returned as
//! report tables.
//!
//! The table reaches the engine through an `EngineHandle`, which locks it
//! for one call at a time. No lock is held while Lua code runs, so a
//! `plugin_config` body can call back into `rns.*`.

use std::sync::Arc;

use mlua::{Function, Lua, Result as LuaResult, Table, Value};
use parking_lot::Mutex;
use rns_core::{EngineError, EngineResult};

use crate::engine::ConfigEngine;

mod parse;

pub use parse::*;

/// Raise engine errors as Lua errors.
pub trait LuaResultExt<T> {
    fn or_raise(self) -> LuaResult<T>;
}

impl<T> LuaResultExt<T> for EngineResult<T> {
    fn or_raise(self) -> LuaResult<T> {
        self.map_err(engine_error_to_lua)
    }
}

fn engine_error_to_lua(err: EngineError) -> mlua::Error {
    mlua::Error::RuntimeError(format!("rns: {} (code {})", err, err.status()))
}

/// Shared access to the engine behind an `rns` table.
pub trait EngineHandle: Clone + Send + Sync + 'static {
    /// Run `f` with the engine locked. Fails when there is no engine.
    fn with<R>(&self, f: impl FnOnce(&mut ConfigEngine) -> R) -> EngineResult<R>;

    /// `with`, raising failures as Lua errors.
    fn run<R>(&self, f: impl FnOnce(&mut ConfigEngine) -> R) -> LuaResult<R> {
        self.with(f).or_raise()
    }

    /// `run` for engine calls that can fail themselves.
    fn call<R>(&self, f: impl FnOnce(&mut ConfigEngine) -> EngineResult<R>) -> LuaResult<R> {
        self.with(f).and_then(|result| result).or_raise()
    }
}

impl EngineHandle for Arc<Mutex<ConfigEngine>> {
    fn with<R>(&self, f: impl FnOnce(&mut ConfigEngine) -> R) -> EngineResult<R> {
        Ok(f(&mut self.lock()))
    }
}

/// Register the `rns` API in a Lua state.
pub fn register_rns_api<H: EngineHandle>(lua: &Lua, engine: H) -> LuaResult<()> {
    let rns = create_rns_table(lua, engine)?;
    lua.globals().set("rns", rns)?;
    Ok(())
}

/// Build the `rns` table without installing it as a global.
pub fn create_rns_table<H: EngineHandle>(lua: &Lua, engine: H) -> LuaResult<Table> {
    let rns = lua.create_table()?;

    register_plugin_api(lua, &rns, &engine)?;
    register_builder_api(lua, &rns, &engine)?;
    register_flat_api(lua, &rns, &engine)?;

    // rns.load_config(path) - run a Lua config file
    {
        let load_fn = lua.create_function(|lua, path: String| {
            let code = std::fs::read_to_string(&path).map_err(|e| {
                mlua::Error::RuntimeError(format!("Failed to read config '{}': {}", path, e))
            })?;
            tracing::info!("Loading config: {}", path);
            lua.load(code.as_str()).set_name(format!("@{}", path)).exec()
        })?;
        rns.set("load_config", load_fn)?;
    }

    Ok(rns)
}

fn register_plugin_api<H: EngineHandle>(lua: &Lua, rns: &Table, engine: &H) -> LuaResult<()> {
    // rns.register_plugin(name, source) -> true if newly registered
    {
        let engine = engine.clone();
        let f = lua.create_function(move |_, (name, source): (String, String)| {
            engine.call(|e| e.register_plugin(&name, &source))
        })?;
        rns.set("register_plugin", f)?;
    }

    // rns.configure_plugin(name, code)
    {
        let engine = engine.clone();
        let f = lua.create_function(move |_, (name, code): (String, String)| {
            engine.call(|e| e.configure_plugin(&name, &code))
        })?;
        rns.set("configure_plugin", f)?;
    }

    // rns.install_plugins() -> report
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, ()| {
            let report = engine.run(ConfigEngine::install_plugins)?;
            report_to_lua(lua, &report)
        })?;
        rns.set("install_plugins", f)?;
    }

    // rns.update_plugins() -> report
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, ()| {
            let report = engine.run(ConfigEngine::update_plugins)?;
            report_to_lua(lua, &report)
        })?;
        rns.set("update_plugins", f)?;
    }

    // rns.load_configs() -> report; raises on keymap conflict
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, ()| {
            let report = engine.call(ConfigEngine::load_plugin_configs)?;
            report_to_lua(lua, &report)
        })?;
        rns.set("load_configs", f)?;
    }

    // rns.plugin_state(name) -> "registered" | "installed" | ...
    {
        let engine = engine.clone();
        let f = lua.create_function(move |_, name: String| {
            engine.call(|e| Ok(e.plugin(&name)?.state.to_string()))
        })?;
        rns.set("plugin_state", f)?;
    }

    Ok(())
}

fn register_builder_api<H: EngineHandle>(lua: &Lua, rns: &Table, engine: &H) -> LuaResult<()> {
    {
        let engine = engine.clone();
        let f = lua.create_function(move |_, name: String| {
            engine.call(|e| e.config_begin(&name))
        })?;
        rns.set("config_begin", f)?;
    }

    // rns.config_end() -> revision
    {
        let engine = engine.clone();
        let f = lua.create_function(move |_, ()| engine.call(ConfigEngine::config_end))?;
        rns.set("config_end", f)?;
    }

    // rns.plugin_config(name, function() ... end)
    //
    // The scope is closed whether or not the function succeeds; a failed
    // body is discarded instead of committed.
    {
        let engine = engine.clone();
        let f = lua.create_function(move |_, (name, body): (String, Function)| {
            engine.call(|e| e.config_begin(&name))?;

            let result = body.call::<()>(());

            engine
                .run(|engine| match result {
                    Ok(()) if engine.current_scope() == Some(name.as_str()) => {
                        engine.config_end().or_raise()
                    }
                    Ok(()) => {
                        engine.config_abandon(&name);
                        Err(mlua::Error::RuntimeError(format!(
                            "plugin_config('{}') left a nested scope open",
                            name
                        )))
                    }
                    Err(e) => {
                        engine.config_abandon(&name);
                        Err(e)
                    }
                })
                .and_then(|closed| closed)
        })?;
        rns.set("plugin_config", f)?;
    }

    {
        let engine = engine.clone();
        let f = lua.create_function(move |_, server: String| {
            engine.call(|e| e.add_server(&server))
        })?;
        rns.set("add_server", f)?;
    }

    // rns.set_server_option(server, key, value)
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, (server, key, value): (String, String, Value)| {
            let text = server_option_text(lua, value)?;
            engine.call(|e| e.set_server_option(&server, &key, &text))
        })?;
        rns.set("set_server_option", f)?;
    }

    // rns.set_mapping(plugin, mode, lhs, rhs)
    {
        let engine = engine.clone();
        let f = lua.create_function(
            move |_, (plugin, mode, lhs, rhs): (String, String, String, String)| {
                let mode = parse_mode(&mode)?;
                engine.call(|e| e.add_mapping(&plugin, mode, &lhs, &rhs))
            },
        )?;
        rns.set("set_mapping", f)?;
    }

    // rns.add_keymap(mode, lhs, rhs, opts?)
    {
        let engine = engine.clone();
        let f = lua.create_function(
            move |_, (mode, lhs, rhs, opts): (String, String, String, Option<Table>)| {
                let mode = parse_mode(&mode)?;
                let opts = parse_keymap_options(opts)?;
                engine.call(|e| e.add_keymap_with(mode, &lhs, &rhs, opts))
            },
        )?;
        rns.set("add_keymap", f)?;
    }

    // rns.add_augroup(name, clear?) / rns.add_autocmd({ ... })
    {
        let engine = engine.clone();
        let f = lua.create_function(move |_, (name, clear): (String, Option<bool>)| {
            engine.call(|e| e.add_augroup(&name, clear.unwrap_or(true)))
        })?;
        rns.set("add_augroup", f)?;
    }
    {
        let engine = engine.clone();
        let f = lua.create_function(move |_, table: Table| {
            let autocmd = parse_autocmd(table)?;
            engine.call(|e| e.add_autocmd(autocmd))
        })?;
        rns.set("add_autocmd", f)?;
    }

    Ok(())
}

fn register_flat_api<H: EngineHandle>(lua: &Lua, rns: &Table, engine: &H) -> LuaResult<()> {
    // rns.opt(key, old, new)
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, (key, old, new): (String, String, String)| {
            let report = engine.run(|e| e.opt(&key, &old, &new))?;
            report_to_lua(lua, &report)
        })?;
        rns.set("opt", f)?;
    }

    // rns.set_option(name, value)
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, (name, value): (String, Value)| {
            let value = option_value(value)?;
            let report = engine.run(|e| e.set_option(&name, value))?;
            report_to_lua(lua, &report)
        })?;
        rns.set("set_option", f)?;
    }

    // rns.g(name, value)
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, (name, value): (String, Value)| {
            let value = option_value(value)?.to_string();
            let report = engine.run(|e| e.set_global(&name, &value))?;
            report_to_lua(lua, &report)
        })?;
        rns.set("g", f)?;
    }

    // rns.map(mode, lhs, rhs, opts?)
    //
    // Examples:
    //   rns.map("n", "<leader>w", ":w<CR>")
    //   rns.map("i", "jk", "<Esc>", { silent = true })
    //   rns.map("n", "K", "<cmd>Doc<CR>", { buffer = 0 })
    {
        let engine = engine.clone();
        let f = lua.create_function(
            move |lua, (mode, lhs, rhs, opts): (String, String, String, Option<Table>)| {
                let mode = parse_mode(&mode)?;
                let opts = parse_keymap_options(opts)?;
                let report = engine.run(|e| e.set_keymap(mode, &lhs, &rhs, opts))?;
                report_to_lua(lua, &report)
            },
        )?;
        rns.set("map", f)?;
    }

    // rns.command(name, command, opts?)
    {
        let engine = engine.clone();
        let f = lua.create_function(
            move |lua, (name, command, opts): (String, String, Option<Table>)| {
                let opts = parse_command_options(opts)?;
                let report = engine.run(|e| e.create_user_command(&name, &command, opts))?;
                report_to_lua(lua, &report)
            },
        )?;
        rns.set("command", f)?;
    }

    // rns.augroup(name, clear?) - clear defaults to true
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, (name, clear): (String, Option<bool>)| {
            let report = engine.run(|e| e.create_augroup(&name, clear.unwrap_or(true)))?;
            report_to_lua(lua, &report)
        })?;
        rns.set("augroup", f)?;
    }

    // rns.autocmd({ event, pattern, command, group }) or
    // rns.autocmd(event, pattern, command)
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, args: mlua::MultiValue| {
            let mut args = args.into_iter();
            let autocmd = match args.next() {
                Some(Value::Table(table)) => parse_autocmd(table)?,
                Some(first) => {
                    let event: String = lua.unpack(first)?;
                    let pattern: String = lua.unpack(args.next().unwrap_or(Value::Nil))?;
                    let command: String = lua.unpack(args.next().unwrap_or(Value::Nil))?;
                    rns_core::AutocmdSpec {
                        event,
                        pattern,
                        command,
                        group: None,
                    }
                }
                None => {
                    return Err(mlua::Error::RuntimeError(
                        "autocmd requires arguments".to_string(),
                    ))
                }
            };
            let report = engine.run(|e| e.create_autocmd(autocmd))?;
            report_to_lua(lua, &report)
        })?;
        rns.set("autocmd", f)?;
    }

    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, command: String| {
            let report = engine.run(|e| e.exec_command(&command))?;
            report_to_lua(lua, &report)
        })?;
        rns.set("exec", f)?;
    }
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, code: String| {
            let report = engine.run(|e| e.exec_code(&code))?;
            report_to_lua(lua, &report)
        })?;
        rns.set("exec_lua", f)?;
    }

    // rns.setup_lsp(server, config) - config is a table or a JSON string
    {
        let engine = engine.clone();
        let f = lua.create_function(move |lua, (server, config): (String, Value)| {
            let report = match config {
                Value::String(json) => {
                    let json = json.to_str()?.to_string();
                    engine.call(|e| e.setup_lsp(&server, &json))?
                }
                Value::Nil => engine.run(|e| e.setup_server(&server, serde_json::json!({})))?,
                other => {
                    let config = lua_value_to_json(lua, other)?;
                    engine.run(|e| e.setup_server(&server, config))?
                }
            };
            report_to_lua(lua, &report)
        })?;
        rns.set("setup_lsp", f)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFetcher, FakeHost};
    use rns_core::{KeymapId, Mode, OptionValue, PluginState};

    fn setup() -> (Lua, Arc<Mutex<ConfigEngine>>, FakeHost) {
        let host = FakeHost::new();
        let engine = Arc::new(Mutex::new(ConfigEngine::new(
            Box::new(host.clone()),
            Box::new(FakeFetcher::new()),
            Vec::new(),
        )));
        let lua = Lua::new();
        register_rns_api(&lua, Arc::clone(&engine)).unwrap();
        (lua, engine, host)
    }

    #[test]
    fn test_flat_calls() {
        let (lua, _, host) = setup();
        lua.load(
            r#"
            rns.set_option("number", true)
            rns.set_option("tabstop", 4)
            rns.g("mapleader", " ")
            rns.map("n", "<leader>w", ":w<CR>", { silent = true })
            rns.command("Fmt", "lua Fmt()", { nargs = 0 })
            local report = rns.exec("echo 'hi'")
            assert(#report.applied == 1)
        "#,
        )
        .exec()
        .unwrap();

        let state = host.state();
        assert_eq!(state.options["number"], OptionValue::Bool(true));
        assert_eq!(state.options["tabstop"], OptionValue::Int(4));
        assert_eq!(state.globals["mapleader"], " ");
        assert_eq!(state.commands["Fmt"], "lua Fmt()");
        assert_eq!(state.executed, vec!["echo 'hi'"]);
    }

    #[test]
    fn test_plugin_config_scope() {
        let (lua, engine, host) = setup();
        lua.load(
            r#"
            rns.register_plugin("lsp", "https://example.com/lsp.git")
            rns.plugin_config("lsp", function()
                rns.add_server("lua_ls")
                rns.set_server_option("lua_ls", "checkThirdParty", false)
                rns.add_keymap("n", "gd", "<cmd>Def<CR>")
            end)
            rns.install_plugins()
            local report = rns.load_configs()
            assert(report.plugins[1].loaded)
        "#,
        )
        .exec()
        .unwrap();

        assert_eq!(
            engine.lock().plugin("lsp").unwrap().state,
            PluginState::ConfigLoaded
        );
        let state = host.state();
        let id = KeymapId {
            mode: Mode::Normal,
            lhs: "gd".into(),
            buffer: None,
        };
        assert_eq!(state.keymaps[&id], "<cmd>Def<CR>");
        assert_eq!(
            state.servers["lua_ls"],
            serde_json::json!({ "settings": { "lua_ls": { "checkThirdParty": false } } })
        );
    }

    #[test]
    fn test_plugin_config_error_closes_scope() {
        let (lua, engine, _) = setup();
        let result = lua
            .load(
                r#"
            rns.register_plugin("lsp", "src")
            rns.plugin_config("lsp", function()
                rns.add_server("lua_ls")
                error("boom")
            end)
        "#,
            )
            .exec();
        assert!(result.is_err());

        let engine = engine.lock();
        assert_eq!(engine.current_scope(), None);
        assert!(engine.registry().snapshot("lsp").is_none());
    }

    #[test]
    fn test_structural_error_raises() {
        let (lua, _, _) = setup();
        let err = lua
            .load(r#"rns.config_begin("ghost")"#)
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn test_keymap_conflict_raises_on_load() {
        let (lua, _, _) = setup();
        let err = lua
            .load(
                r#"
            rns.register_plugin("a", "src/a")
            rns.register_plugin("b", "src/b")
            rns.plugin_config("a", function() rns.add_keymap("n", "gd", "A") end)
            rns.plugin_config("b", function() rns.add_keymap("n", "gd", "B") end)
            rns.install_plugins()
            rns.load_configs()
        "#,
            )
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("Keymap conflict"));
    }

    #[test]
    fn test_setup_lsp_table_and_json() {
        let (lua, _, host) = setup();
        lua.load(
            r#"
            rns.setup_lsp("rust_analyzer", { settings = { cargo = { features = "all" } } })
            rns.setup_lsp("pyright", '{"settings": {}}')
        "#,
        )
        .exec()
        .unwrap();

        let servers = host.state().servers;
        assert_eq!(
            servers["rust_analyzer"],
            serde_json::json!({ "settings": { "cargo": { "features": "all" } } })
        );
        assert_eq!(servers["pyright"], serde_json::json!({ "settings": {} }));
    }

    /// Handle whose engine has gone away.
    #[derive(Clone)]
    struct Detached;

    impl EngineHandle for Detached {
        fn with<R>(&self, _: impl FnOnce(&mut ConfigEngine) -> R) -> EngineResult<R> {
            Err(EngineError::NotInitialized)
        }
    }

    #[test]
    fn test_missing_engine_raises() {
        let lua = Lua::new();
        let rns = create_rns_table(&lua, Detached).unwrap();
        lua.globals().set("detached", rns).unwrap();

        let err = lua
            .load(r#"detached.opt("path", "", ".")"#)
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("code 13"));
        assert!(lua.globals().get::<Value>("rns").unwrap().is_nil());
    }

    #[test]
    fn test_load_config_file() {
        let (lua, _, host) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.lua");
        std::fs::write(&path, r#"rns.opt("path", ".", "**")"#).unwrap();

        lua.load(format!("rns.load_config({:?})", path.to_string_lossy()))
            .exec()
            .unwrap();
        assert_eq!(
            host.state().options["path"],
            OptionValue::Str(".,**".into())
        );
    }
}
