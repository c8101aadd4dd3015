//! Lua value parsing for the `rns` API.
//!
//! Converts Lua arguments and option tables into engine types.

use mlua::{Lua, Result as LuaResult, Table, Value};
use rns_core::{AutocmdSpec, KeymapOptions, Mode, OptionValue, UserCommandOptions};

/// Parse a map mode (`"n"`, `"normal"`, ...).
pub fn parse_mode(mode: &str) -> LuaResult<Mode> {
    mode.parse::<Mode>().map_err(mlua::Error::RuntimeError)
}

/// Parse keymap options.
///
/// Expected table shape:
/// ```lua
/// {
///   noremap = true,   -- optional (default true)
///   silent = false,   -- optional
///   buffer = 0,       -- optional: buffer-local mapping
///   desc = "string",  -- optional
/// }
/// ```
pub fn parse_keymap_options(opts: Option<Table>) -> LuaResult<KeymapOptions> {
    let Some(table) = opts else {
        return Ok(KeymapOptions::noremap());
    };

    Ok(KeymapOptions {
        noremap: table.get::<Option<bool>>("noremap")?.unwrap_or(true),
        silent: table.get::<Option<bool>>("silent")?.unwrap_or(false),
        buffer: table.get::<Option<i32>>("buffer")?,
        desc: table.get::<Option<String>>("desc")?,
    })
}

/// Parse user command options: `{ nargs = "*", bang = true, desc = "..." }`.
pub fn parse_command_options(opts: Option<Table>) -> LuaResult<UserCommandOptions> {
    let Some(table) = opts else {
        return Ok(UserCommandOptions::default());
    };

    // nargs may be given as a number
    let nargs = match table.get::<Value>("nargs")? {
        Value::Nil => None,
        Value::Integer(n) => Some(n.to_string()),
        Value::String(s) => Some(s.to_str()?.to_string()),
        other => {
            return Err(mlua::Error::RuntimeError(format!(
                "nargs must be a string or integer, got {}",
                other.type_name()
            )))
        }
    };

    Ok(UserCommandOptions {
        nargs,
        bang: table.get::<Option<bool>>("bang")?.unwrap_or(false),
        desc: table.get::<Option<String>>("desc")?,
    })
}

/// Parse an autocmd definition table.
///
/// ```lua
/// { event = "BufWritePre", pattern = "*.rs", command = "lua Fmt()", group = "Fmt" }
/// ```
pub fn parse_autocmd(table: Table) -> LuaResult<AutocmdSpec> {
    let event: String = table
        .get::<Option<String>>("event")?
        .ok_or_else(|| mlua::Error::RuntimeError("autocmd missing required 'event'".into()))?;
    let command: String = table
        .get::<Option<String>>("command")?
        .ok_or_else(|| mlua::Error::RuntimeError("autocmd missing required 'command'".into()))?;

    Ok(AutocmdSpec {
        event,
        pattern: table.get::<Option<String>>("pattern")?.unwrap_or_else(|| "*".into()),
        command,
        group: table.get::<Option<String>>("group")?,
    })
}

/// Convert a Lua value to an option value.
pub fn option_value(value: Value) -> LuaResult<OptionValue> {
    match value {
        Value::Boolean(b) => Ok(OptionValue::Bool(b)),
        Value::Integer(i) => Ok(OptionValue::Int(i)),
        Value::Number(n) if n.fract() == 0.0 => Ok(OptionValue::Int(n as i64)),
        Value::String(s) => Ok(OptionValue::Str(s.to_str()?.to_string())),
        other => Err(mlua::Error::RuntimeError(format!(
            "option value must be a boolean, integer or string, got {}",
            other.type_name()
        ))),
    }
}

/// Server option values are stored as text: strings verbatim, anything
/// else JSON-encoded so it keeps its type in the setup table.
pub fn server_option_text(lua: &Lua, value: Value) -> LuaResult<String> {
    match value {
        Value::String(s) => Ok(s.to_str()?.to_string()),
        other => {
            let json = lua_value_to_json(lua, other)?;
            serde_json::to_string(&json).map_err(|e| mlua::Error::RuntimeError(e.to_string()))
        }
    }
}

/// Convert a Lua value to a JSON value.
pub fn lua_value_to_json(lua: &Lua, value: Value) -> LuaResult<serde_json::Value> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(b)),
        Value::Integer(i) => Ok(serde_json::Value::Number(i.into())),
        Value::Number(n) => Ok(serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)),
        Value::String(s) => Ok(serde_json::Value::String(s.to_str()?.to_string())),
        Value::Table(t) => {
            // Sequences become arrays, everything else objects
            let is_array = t.raw_len() > 0 && t.clone().pairs::<i64, Value>().all(|r| r.is_ok());

            if is_array {
                let mut arr = Vec::new();
                for item in t.sequence_values::<Value>() {
                    arr.push(lua_value_to_json(lua, item?)?);
                }
                Ok(serde_json::Value::Array(arr))
            } else {
                let mut obj = serde_json::Map::new();
                for pair in t.pairs::<String, Value>() {
                    let (k, v) = pair?;
                    obj.insert(k, lua_value_to_json(lua, v)?);
                }
                Ok(serde_json::Value::Object(obj))
            }
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "cannot convert {} to JSON",
            other.type_name()
        ))),
    }
}

/// Convert a JSON value to a Lua value.
pub fn json_to_lua_value(lua: &Lua, value: &serde_json::Value) -> LuaResult<Value> {
    match value {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                Ok(n.as_f64().map(Value::Number).unwrap_or(Value::Nil))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(lua.create_string(s)?)),
        serde_json::Value::Array(arr) => {
            let table = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                table.set(i + 1, json_to_lua_value(lua, v)?)?;
            }
            Ok(Value::Table(table))
        }
        serde_json::Value::Object(obj) => {
            let table = lua.create_table()?;
            for (k, v) in obj {
                table.set(k.as_str(), json_to_lua_value(lua, v)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}

/// Serialize a report into a Lua table.
pub fn report_to_lua<T: serde::Serialize>(lua: &Lua, report: &T) -> LuaResult<Value> {
    let json = serde_json::to_value(report).map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
    json_to_lua_value(lua, &json)
}
