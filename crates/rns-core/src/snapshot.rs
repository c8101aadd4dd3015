//! Per-plugin configuration declarations and sealed snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::keymap::KeymapSpec;

/// Language-server configuration declared by one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    /// Option key -> raw value, sorted for stable rendering.
    pub options: BTreeMap<String, String>,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BTreeMap::new(),
        }
    }

    /// Setup table handed to the host: `{ settings = { [name] = options } }`.
    ///
    /// Values that parse as JSON literals (`true`, `42`, `["a"]`) keep their
    /// type; anything else is passed as a string.
    pub fn setup_json(&self) -> Value {
        let settings: serde_json::Map<String, Value> = self
            .options
            .iter()
            .map(|(k, v)| {
                let value =
                    serde_json::from_str::<Value>(v).unwrap_or_else(|_| Value::String(v.clone()));
                (k.clone(), value)
            })
            .collect();

        if settings.is_empty() {
            return json!({});
        }
        let mut by_server = serde_json::Map::new();
        by_server.insert(self.name.clone(), Value::Object(settings));
        json!({ "settings": by_server })
    }
}

/// Autocommand group declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AugroupSpec {
    pub name: String,
    /// Drop the group's existing autocmds when it is (re)created.
    pub clear: bool,
}

/// Autocommand declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AutocmdSpec {
    pub event: String,
    pub pattern: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Immutable configuration of one plugin, produced when its scope closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub plugin: String,

    /// Monotonic across the session; a higher revision supersedes a lower one.
    pub revision: u64,

    /// Servers in declaration order.
    pub servers: Vec<ServerConfig>,

    /// Keymaps in declaration order.
    pub keymaps: Vec<KeymapSpec>,

    pub augroups: Vec<AugroupSpec>,

    pub autocmds: Vec<AutocmdSpec>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
            && self.keymaps.is_empty()
            && self.augroups.is_empty()
            && self.autocmds.is_empty()
    }

    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_json_types() {
        let mut server = ServerConfig::new("lua_ls");
        server.options.insert("checkThirdParty".into(), "false".into());
        server.options.insert("workspace".into(), "/tmp/ws".into());
        server.options.insert("maxPreload".into(), "2000".into());

        assert_eq!(
            server.setup_json(),
            json!({
                "settings": {
                    "lua_ls": {
                        "checkThirdParty": false,
                        "workspace": "/tmp/ws",
                        "maxPreload": 2000
                    }
                }
            })
        );
    }

    #[test]
    fn test_setup_json_empty() {
        assert_eq!(ServerConfig::new("rust_analyzer").setup_json(), json!({}));
    }
}
