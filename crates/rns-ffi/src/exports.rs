//! Exported C functions.
//!
//! Every pointer argument must be null or a NUL-terminated string valid for
//! the duration of the call. Null is only accepted where noted; elsewhere it
//! is reported as `InvalidArgument`.
//!
//! The executor registered with `rns_init` runs while the engine is locked
//! and must not call back into this library.

use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::path::Path;

use rns_core::{AutocmdSpec, EngineConfig, KeymapOptions, Mode, UserCommandOptions};
use rns_engine::ConfigEngine;
use serde::de::DeserializeOwned;

use crate::host::{CommandExecutor, ExCommandHost};
use crate::{
    install_engine, last_report, opt_str_arg, store_ok, str_arg, with_engine, with_report,
    AbiError, AbiResult,
};

fn parse_mode(mode: &str) -> AbiResult<Mode> {
    mode.parse::<Mode>().map_err(AbiError::invalid)
}

/// Parse an optional JSON options string. Missing options use the default.
fn parse_opts<T: DeserializeOwned + Default>(opts: Option<&str>, what: &str) -> AbiResult<T> {
    match opts {
        None => Ok(T::default()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| AbiError::invalid(format!("invalid {} options: {}", what, e))),
    }
}

fn ok<T>(_: T) -> c_int {
    0
}

// ============================================================================
// Library lifecycle
// ============================================================================

/// Create the engine. `config_path` may be null to use the default config
/// location. Calling it again replaces the engine and drops all state.
///
/// # Safety
/// `executor` must stay callable for as long as the library is in use.
#[no_mangle]
pub unsafe extern "C" fn rns_init(
    executor: Option<CommandExecutor>,
    config_path: *const c_char,
) -> c_int {
    let result = (|| -> AbiResult<ConfigEngine> {
        let executor = executor.ok_or_else(|| AbiError::invalid("executor must not be null"))?;
        let config = match opt_str_arg(config_path, "config_path")? {
            Some(path) => EngineConfig::load_from(Path::new(path))?,
            None => EngineConfig::load()?,
        };

        crate::init_tracing(&config.log);
        let host = ExCommandHost::with_executor(executor);
        Ok(ConfigEngine::from_config(Box::new(host), &config)?)
    })();

    match result {
        Ok(engine) => {
            install_engine(Some(engine));
            store_ok();
            tracing::info!("rns initialized");
            0
        }
        Err(err) => err.into_status(),
    }
}

/// Drop the engine. Later calls fail with `NotInitialized` until `rns_init`.
#[no_mangle]
pub extern "C" fn rns_shutdown() {
    install_engine(None);
}

/// JSON of the last report or error, or null if there is none. Release
/// with `rns_free_string`.
#[no_mangle]
pub extern "C" fn rns_last_report() -> *mut c_char {
    last_report()
        .and_then(|json| CString::new(json).ok())
        .map_or(std::ptr::null_mut(), CString::into_raw)
}

/// # Safety
/// `s` must be null or a pointer returned by `rns_last_report`, freed once.
#[no_mangle]
pub unsafe extern "C" fn rns_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Editor primitives
// ============================================================================

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_set_option_bool(name: *const c_char, value: c_int) -> c_int {
    with_report(|engine| Ok(engine.set_option(str_arg(name, "name")?, value != 0)))
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_set_option_int(name: *const c_char, value: c_int) -> c_int {
    with_report(|engine| Ok(engine.set_option(str_arg(name, "name")?, i64::from(value))))
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_set_option_string(
    name: *const c_char,
    value: *const c_char,
) -> c_int {
    with_report(|engine| {
        let name = str_arg(name, "name")?;
        let value = str_arg(value, "value")?;
        Ok(engine.set_option(name, value))
    })
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_set_global(name: *const c_char, value: *const c_char) -> c_int {
    with_report(|engine| {
        let name = str_arg(name, "name")?;
        let value = str_arg(value, "value")?;
        Ok(engine.set_global(name, value))
    })
}

/// `opts` is null or a JSON object such as `{"noremap": true, "silent": true}`.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_create_keymap(
    mode: *const c_char,
    lhs: *const c_char,
    rhs: *const c_char,
    opts: *const c_char,
) -> c_int {
    with_report(|engine| {
        let mode = parse_mode(str_arg(mode, "mode")?)?;
        let lhs = str_arg(lhs, "lhs")?;
        let rhs = str_arg(rhs, "rhs")?;
        let opts: KeymapOptions = parse_opts(opt_str_arg(opts, "opts")?, "keymap")?;
        Ok(engine.set_keymap(mode, lhs, rhs, opts))
    })
}

/// Buffer-local keymap; `buffer` 0 is the current buffer.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_buf_set_keymap(
    buffer: c_int,
    mode: *const c_char,
    lhs: *const c_char,
    rhs: *const c_char,
    opts: *const c_char,
) -> c_int {
    with_report(|engine| {
        let mode = parse_mode(str_arg(mode, "mode")?)?;
        let lhs = str_arg(lhs, "lhs")?;
        let rhs = str_arg(rhs, "rhs")?;
        let mut opts: KeymapOptions = parse_opts(opt_str_arg(opts, "opts")?, "keymap")?;
        opts.buffer = Some(buffer);
        Ok(engine.set_keymap(mode, lhs, rhs, opts))
    })
}

/// `opts` is null or a JSON object such as `{"nargs": "*", "bang": true}`.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_create_user_command(
    name: *const c_char,
    command: *const c_char,
    opts: *const c_char,
) -> c_int {
    with_report(|engine| {
        let name = str_arg(name, "name")?;
        let command = str_arg(command, "command")?;
        let opts: UserCommandOptions = parse_opts(opt_str_arg(opts, "opts")?, "command")?;
        Ok(engine.create_user_command(name, command, opts))
    })
}

/// `pattern` defaults to `*`; `group` may be null.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_create_autocmd(
    event: *const c_char,
    pattern: *const c_char,
    command: *const c_char,
    group: *const c_char,
) -> c_int {
    with_report(|engine| {
        let autocmd = AutocmdSpec {
            event: str_arg(event, "event")?.to_string(),
            pattern: opt_str_arg(pattern, "pattern")?.unwrap_or("*").to_string(),
            command: str_arg(command, "command")?.to_string(),
            group: opt_str_arg(group, "group")?.map(str::to_string),
        };
        Ok(engine.create_autocmd(autocmd))
    })
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_create_augroup(name: *const c_char, clear: c_int) -> c_int {
    with_report(|engine| Ok(engine.create_augroup(str_arg(name, "name")?, clear != 0)))
}

/// Same as `nvim_create_augroup`; augroups are always created through Lua.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_create_augroup_lua(name: *const c_char, clear: c_int) -> c_int {
    nvim_create_augroup(name, clear)
}

/// Same as `nvim_create_autocmd`.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_create_autocmd_lua(
    event: *const c_char,
    pattern: *const c_char,
    command: *const c_char,
    group: *const c_char,
) -> c_int {
    nvim_create_autocmd(event, pattern, command, group)
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn nvim_exec_command(command: *const c_char) -> c_int {
    with_report(|engine| Ok(engine.exec_command(str_arg(command, "command")?)))
}

// ============================================================================
// Legacy calls
// ============================================================================

/// Set `key` to `old_val,new_val`. `old_val` may be null or empty.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn opt(
    key: *const c_char,
    old_val: *const c_char,
    new_val: *const c_char,
) -> c_int {
    with_report(|engine| {
        let key = str_arg(key, "key")?;
        let old = opt_str_arg(old_val, "old_val")?.unwrap_or("");
        let new = str_arg(new_val, "new_val")?;
        Ok(engine.opt(key, old, new))
    })
}

/// Ungrouped autocmd.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn autocmd(
    event: *const c_char,
    pattern: *const c_char,
    command: *const c_char,
) -> c_int {
    nvim_create_autocmd(event, pattern, command, std::ptr::null())
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn exec_lua(code: *const c_char) -> c_int {
    with_report(|engine| Ok(engine.exec_code(str_arg(code, "code")?)))
}

/// `config_json` may be null for an empty setup table.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn setup_lsp(server: *const c_char, config_json: *const c_char) -> c_int {
    with_report(|engine| {
        let server = str_arg(server, "server")?;
        let config = opt_str_arg(config_json, "config_json")?.unwrap_or("{}");
        Ok(engine.setup_lsp(server, config)?)
    })
}

// ============================================================================
// Plugin manager
// ============================================================================

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn register_plugin(name: *const c_char, url: *const c_char) -> c_int {
    with_engine(|engine| {
        let name = str_arg(name, "name")?;
        let url = str_arg(url, "url")?;
        Ok(ok(engine.register_plugin(name, url)?))
    })
}

/// Attach raw configuration code, run when plugin configs are loaded.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn configure_plugin(name: *const c_char, config: *const c_char) -> c_int {
    with_engine(|engine| {
        let name = str_arg(name, "name")?;
        let config = str_arg(config, "config")?;
        Ok(ok(engine.configure_plugin(name, config)?))
    })
}

#[no_mangle]
pub extern "C" fn install_plugins() -> c_int {
    with_report(|engine| Ok(engine.install_plugins()))
}

#[no_mangle]
pub extern "C" fn load_plugin_configs() -> c_int {
    with_report(|engine| Ok(engine.load_plugin_configs()?))
}

#[no_mangle]
pub extern "C" fn update_plugins() -> c_int {
    with_report(|engine| Ok(engine.update_plugins()))
}

// ============================================================================
// Structured plugin configuration
// ============================================================================

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn plugin_config_begin(plugin_name: *const c_char) -> c_int {
    with_engine(|engine| Ok(ok(engine.config_begin(str_arg(plugin_name, "plugin_name")?)?)))
}

#[no_mangle]
pub extern "C" fn plugin_config_end() -> c_int {
    with_engine(|engine| Ok(ok(engine.config_end()?)))
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn plugin_config_add_server(server_name: *const c_char) -> c_int {
    with_engine(|engine| Ok(ok(engine.add_server(str_arg(server_name, "server_name")?)?)))
}

/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn plugin_config_set_server_option(
    server: *const c_char,
    option: *const c_char,
    value: *const c_char,
) -> c_int {
    with_engine(|engine| {
        let server = str_arg(server, "server")?;
        let option = str_arg(option, "option")?;
        let value = str_arg(value, "value")?;
        Ok(ok(engine.set_server_option(server, option, value)?))
    })
}

/// Keymap owned by `plugin`, declared from inside any open scope.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn plugin_config_set_mapping(
    plugin: *const c_char,
    mode: *const c_char,
    key: *const c_char,
    action: *const c_char,
) -> c_int {
    with_engine(|engine| {
        let plugin = str_arg(plugin, "plugin")?;
        let mode = parse_mode(str_arg(mode, "mode")?)?;
        let key = str_arg(key, "key")?;
        let action = str_arg(action, "action")?;
        Ok(ok(engine.add_mapping(plugin, mode, key, action)?))
    })
}

/// Keymap owned by the current scope. A `plugin` naming another plugin
/// hands ownership to that plugin instead.
///
/// # Safety
/// See module docs.
#[no_mangle]
pub unsafe extern "C" fn plugin_config_add_keymap(
    mode: *const c_char,
    key: *const c_char,
    plugin: *const c_char,
    command: *const c_char,
) -> c_int {
    with_engine(|engine| {
        let mode = parse_mode(str_arg(mode, "mode")?)?;
        let key = str_arg(key, "key")?;
        let plugin = opt_str_arg(plugin, "plugin")?;
        let command = str_arg(command, "command")?;

        match plugin {
            Some(owner) if engine.current_scope() != Some(owner) => {
                Ok(ok(engine.add_mapping(owner, mode, key, command)?))
            }
            _ => Ok(ok(engine.add_keymap(mode, key, command)?)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{c, executed, init, report, SERIAL};

    #[test]
    fn test_not_initialized() {
        let _serial = SERIAL.lock();
        rns_shutdown();

        assert_eq!(plugin_config_end(), 13);
        assert_eq!(report()["error"]["code"], 13);
    }

    #[test]
    fn test_flat_calls_render_commands() {
        let _serial = SERIAL.lock();
        let _dir = init();

        unsafe {
            assert_eq!(nvim_set_option_bool(c("number").as_ptr(), 1), 0);
            assert_eq!(opt(c("path").as_ptr(), c(".").as_ptr(), c("**").as_ptr()), 0);
            assert_eq!(
                nvim_create_keymap(
                    c("n").as_ptr(),
                    c("<leader>w").as_ptr(),
                    c(":w<CR>").as_ptr(),
                    c(r#"{"noremap": true}"#).as_ptr()
                ),
                0
            );
            assert_eq!(exec_lua(c("print('hi')").as_ptr()), 0);
            // Options are idempotent; redeclaring must not re-run the exec
            assert_eq!(nvim_set_option_bool(c("number").as_ptr(), 1), 0);
        }

        assert_eq!(
            executed(),
            vec![
                "set number",
                "set path=.,**",
                "nnoremap <leader>w :w<CR>",
                "lua print('hi')",
                "set number",
            ]
        );
        rns_shutdown();
    }

    #[test]
    fn test_rejected_primitive_reports_failure() {
        let _serial = SERIAL.lock();
        let _dir = init();

        let status = unsafe { nvim_set_option_bool(c("bogus").as_ptr(), 1) };
        assert_eq!(status, 11);

        let report = report();
        assert_eq!(report["failed"].as_array().unwrap().len(), 1);
        assert_eq!(report["applied"].as_array().unwrap().len(), 0);
        rns_shutdown();
    }

    #[test]
    fn test_invalid_arguments() {
        let _serial = SERIAL.lock();
        let _dir = init();

        unsafe {
            assert_eq!(nvim_set_global(std::ptr::null(), c("x").as_ptr()), 12);
            assert_eq!(setup_lsp(c("lua_ls").as_ptr(), c("{not json").as_ptr()), 12);
            assert_eq!(
                nvim_create_keymap(
                    c("q").as_ptr(),
                    c("x").as_ptr(),
                    c("y").as_ptr(),
                    std::ptr::null()
                ),
                12
            );
        }
        assert!(executed().is_empty());
        rns_shutdown();
    }

    #[test]
    fn test_structural_errors() {
        let _serial = SERIAL.lock();
        let _dir = init();

        unsafe {
            assert_eq!(plugin_config_begin(c("missing").as_ptr()), 3);
            assert_eq!(plugin_config_end(), 5);

            let url = c("https://github.com/nvim-telescope/telescope.nvim");
            assert_eq!(register_plugin(c("telescope").as_ptr(), url.as_ptr()), 0);
            assert_eq!(register_plugin(c("telescope").as_ptr(), url.as_ptr()), 0);
            assert_eq!(register_plugin(c("telescope").as_ptr(), c("other").as_ptr()), 1);

            assert_eq!(plugin_config_begin(c("telescope").as_ptr()), 0);
            assert_eq!(plugin_config_begin(c("telescope").as_ptr()), 4);
            assert_eq!(
                plugin_config_set_server_option(
                    c("lua_ls").as_ptr(),
                    c("a").as_ptr(),
                    c("b").as_ptr()
                ),
                6
            );
            assert_eq!(plugin_config_end(), 0);
        }
        rns_shutdown();
    }

    #[test]
    fn test_success_replaces_error_report() {
        let _serial = SERIAL.lock();
        let _dir = init();
        assert_eq!(report(), serde_json::json!({ "ok": true }));

        unsafe {
            let url = c("https://github.com/nvim-telescope/telescope.nvim");
            assert_eq!(register_plugin(c("telescope").as_ptr(), url.as_ptr()), 0);
            assert_eq!(register_plugin(c("telescope").as_ptr(), c("other").as_ptr()), 1);
            assert_eq!(report()["error"]["code"], 1);

            assert_eq!(plugin_config_begin(c("telescope").as_ptr()), 0);
        }
        assert_eq!(report(), serde_json::json!({ "ok": true }));

        assert_eq!(plugin_config_end(), 0);
        assert_eq!(report()["ok"], true);
        rns_shutdown();
    }

    #[test]
    fn test_structured_config_loads_after_install() {
        let _serial = SERIAL.lock();
        let dir = init();

        // An existing checkout counts as installed
        std::fs::create_dir_all(dir.path().join("pack").join("lsp")).unwrap();

        unsafe {
            let url = c("https://github.com/neovim/nvim-lspconfig");
            assert_eq!(register_plugin(c("lsp").as_ptr(), url.as_ptr()), 0);

            assert_eq!(plugin_config_begin(c("lsp").as_ptr()), 0);
            assert_eq!(plugin_config_add_server(c("lua_ls").as_ptr()), 0);
            assert_eq!(
                plugin_config_add_keymap(
                    c("n").as_ptr(),
                    c("gd").as_ptr(),
                    std::ptr::null(),
                    c("<cmd>Def<CR>").as_ptr()
                ),
                0
            );
            assert_eq!(
                plugin_config_add_keymap(
                    c("n").as_ptr(),
                    c("<leader>ff").as_ptr(),
                    c("unknown").as_ptr(),
                    c("<cmd>Find<CR>").as_ptr()
                ),
                3
            );
            assert_eq!(plugin_config_end(), 0);
        }

        assert_eq!(install_plugins(), 0);
        assert_eq!(report()["succeeded"], serde_json::json!(["lsp"]));

        assert_eq!(load_plugin_configs(), 0);
        assert_eq!(
            executed(),
            vec![
                "nnoremap gd <cmd>Def<CR>",
                "lua require('lspconfig')['lua_ls'].setup(vim.json.decode('{}'))",
            ]
        );
        rns_shutdown();
    }
}
