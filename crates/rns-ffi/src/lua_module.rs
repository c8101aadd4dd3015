//! Lua module entry point.
//!
//! `require("rns")` returns the `rns` table bound to the same engine the C
//! exports drive. When `rns_init` has not been called, the first `require`
//! creates the engine from the default config with a host that runs
//! commands through `vim.cmd`.
//!
//! The loadable module is built with the `module` feature, which exports
//! `luaopen_rns` for a Lua 5.4 host:
//!
//! ```text
//! cargo build -p rns-ffi --release --no-default-features --features module
//! ```
//!
//! Like the C executor, `vim.cmd` runs while the engine is locked, so the
//! commands it executes must not call back into `rns`.

use mlua::{Lua, Result as LuaResult, Table};
use rns_core::{EngineConfig, EngineError, EngineResult};
use rns_engine::{create_rns_table, ConfigEngine, EngineHandle};

use crate::host::{ExCommandHost, LuaCommandSink};
use crate::ENGINE;

/// Handle over the library-wide engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedEngine;

impl EngineHandle for SharedEngine {
    fn with<R>(&self, f: impl FnOnce(&mut ConfigEngine) -> R) -> EngineResult<R> {
        let mut guard = ENGINE.lock();
        let engine = guard.as_mut().ok_or(EngineError::NotInitialized)?;
        Ok(f(engine))
    }
}

/// Build the module table, creating the engine on first use.
pub fn open(lua: &Lua) -> LuaResult<Table> {
    let uninitialized = ENGINE.lock().is_none();
    if uninitialized {
        let config = EngineConfig::load().map_err(mlua::Error::external)?;
        init_with_lua_host(lua, &config)?;
    }
    create_rns_table(lua, SharedEngine)
}

/// Replace the engine with one whose host runs commands through `vim.cmd`.
pub fn init_with_lua_host(lua: &Lua, config: &EngineConfig) -> LuaResult<()> {
    crate::init_tracing(&config.log);
    let host = ExCommandHost::new(Box::new(LuaCommandSink::from_globals(lua)?));
    let engine = ConfigEngine::from_config(Box::new(host), config).map_err(mlua::Error::external)?;
    crate::install_engine(Some(engine));
    crate::store_ok();
    tracing::info!("rns initialized from Lua");
    Ok(())
}

#[cfg(feature = "module")]
#[mlua::lua_module(name = "rns")]
fn rns_open(lua: &Lua) -> LuaResult<Table> {
    open(lua)
}
