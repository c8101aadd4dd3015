//! Structured Config Builder
//!
//! Configuration is composed inside scopes opened with `begin(name)` and
//! closed with `end()`. Scopes form an explicit stack: they nest, close LIFO,
//! and at most one scope per plugin may be open.
//!
//! ```text
//! begin("lsp")                 frames: [lsp]
//!   add_server("lua_ls")
//!   begin("telescope")         frames: [lsp, telescope]
//!     add_keymap(n, "<leader>ff", ...)
//!   end()  ─► Sealed(telescope) frames: [lsp]
//!   set_server_option("lua_ls", ...)
//! end()    ─► Sealed(lsp)       frames: []
//! ```
//!
//! Nothing declared in a frame is visible to the resolver until the frame is
//! sealed and committed to the registry.

use rns_core::{
    AugroupSpec, AutocmdSpec, EngineError, EngineResult, KeymapOptions, KeymapOwner, KeymapSpec,
    Mode, ServerConfig, Snapshot,
};

use crate::registry::PluginRegistry;

/// One open config scope.
#[derive(Debug)]
struct Frame {
    plugin: String,
    servers: Vec<ServerConfig>,
    keymaps: Vec<KeymapSpec>,
    augroups: Vec<AugroupSpec>,
    autocmds: Vec<AutocmdSpec>,
}

impl Frame {
    fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            servers: Vec::new(),
            keymaps: Vec::new(),
            augroups: Vec::new(),
            autocmds: Vec::new(),
        }
    }

    fn server_mut(&mut self, name: &str) -> Option<&mut ServerConfig> {
        self.servers.iter_mut().find(|s| s.name == name)
    }
}

/// Contents of a closed scope, waiting for a revision stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub plugin: String,
    pub servers: Vec<ServerConfig>,
    pub keymaps: Vec<KeymapSpec>,
    pub augroups: Vec<AugroupSpec>,
    pub autocmds: Vec<AutocmdSpec>,
}

impl Sealed {
    /// Stamp with a revision, producing the immutable snapshot.
    pub fn into_snapshot(self, revision: u64) -> Snapshot {
        Snapshot {
            plugin: self.plugin,
            revision,
            servers: self.servers,
            keymaps: self.keymaps,
            augroups: self.augroups,
            autocmds: self.autocmds,
        }
    }
}

/// Stack of open config scopes.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    frames: Vec<Frame>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope for a registered plugin.
    pub fn begin(&mut self, registry: &PluginRegistry, name: &str) -> EngineResult<()> {
        if !registry.contains(name) {
            return Err(EngineError::UnknownPlugin(name.to_string()));
        }
        if self.is_open(name) {
            return Err(EngineError::ScopeAlreadyOpen(name.to_string()));
        }

        self.frames.push(Frame::new(name));
        tracing::debug!("Opened config scope '{}' (depth {})", name, self.depth());
        Ok(())
    }

    /// Declare a language server. Adding the same server again is a no-op.
    pub fn add_server(&mut self, server: &str) -> EngineResult<()> {
        let frame = self.current_mut()?;
        if frame.server_mut(server).is_none() {
            frame.servers.push(ServerConfig::new(server));
        }
        Ok(())
    }

    /// Set an option on a server added in the current scope.
    pub fn set_server_option(&mut self, server: &str, key: &str, value: &str) -> EngineResult<()> {
        let frame = self.current_mut()?;
        let plugin = frame.plugin.clone();
        let config = frame
            .server_mut(server)
            .ok_or_else(|| EngineError::UnknownServer {
                plugin,
                server: server.to_string(),
            })?;
        config.options.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Declare a keymap owned by the current scope's plugin.
    pub fn add_keymap(
        &mut self,
        mode: Mode,
        lhs: &str,
        rhs: &str,
        opts: KeymapOptions,
    ) -> EngineResult<()> {
        let frame = self.current_mut()?;
        let owner = KeymapOwner::Plugin(frame.plugin.clone());
        frame.keymaps.push(KeymapSpec {
            mode,
            lhs: lhs.to_string(),
            rhs: rhs.to_string(),
            owner,
            opts,
        });
        Ok(())
    }

    /// Declare a keymap owned by another registered plugin.
    ///
    /// The keymap is still sealed into the current scope's snapshot.
    pub fn add_mapping(
        &mut self,
        registry: &PluginRegistry,
        plugin: &str,
        mode: Mode,
        lhs: &str,
        rhs: &str,
    ) -> EngineResult<()> {
        // Scope check first so a stray call reports the missing scope.
        self.current_mut()?;
        if !registry.contains(plugin) {
            return Err(EngineError::UnknownPlugin(plugin.to_string()));
        }

        let frame = self.current_mut()?;
        frame.keymaps.push(KeymapSpec {
            mode,
            lhs: lhs.to_string(),
            rhs: rhs.to_string(),
            owner: KeymapOwner::Plugin(plugin.to_string()),
            opts: KeymapOptions::noremap(),
        });
        Ok(())
    }

    /// Declare an autocmd group. With `clear`, autocmds already declared for
    /// the group in this scope are dropped.
    pub fn add_augroup(&mut self, name: &str, clear: bool) -> EngineResult<()> {
        let frame = self.current_mut()?;
        if clear {
            frame
                .autocmds
                .retain(|au| au.group.as_deref() != Some(name));
        }
        frame.augroups.push(AugroupSpec {
            name: name.to_string(),
            clear,
        });
        Ok(())
    }

    pub fn add_autocmd(&mut self, autocmd: AutocmdSpec) -> EngineResult<()> {
        let frame = self.current_mut()?;
        frame.autocmds.push(autocmd);
        Ok(())
    }

    /// Close the innermost scope.
    pub fn end(&mut self) -> EngineResult<Sealed> {
        let frame = self.frames.pop().ok_or(EngineError::NoOpenScope)?;
        tracing::debug!(
            "Sealed config scope '{}': {} servers, {} keymaps, {} autocmds",
            frame.plugin,
            frame.servers.len(),
            frame.keymaps.len(),
            frame.autocmds.len()
        );

        Ok(Sealed {
            plugin: frame.plugin,
            servers: frame.servers,
            keymaps: frame.keymaps,
            augroups: frame.augroups,
            autocmds: frame.autocmds,
        })
    }

    /// Discard open scopes down to and including the one for `name`.
    pub fn abandon(&mut self, name: &str) -> usize {
        let Some(pos) = self.frames.iter().rposition(|f| f.plugin == name) else {
            return 0;
        };
        let dropped = self.frames.len() - pos;
        self.frames.truncate(pos);
        tracing::debug!("Abandoned {} config scope(s) through '{}'", dropped, name);
        dropped
    }

    /// Plugin of the innermost open scope.
    pub fn current(&self) -> Option<&str> {
        self.frames.last().map(|f| f.plugin.as_str())
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.plugin == name)
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn current_mut(&mut self) -> EngineResult<&mut Frame> {
        self.frames.last_mut().ok_or(EngineError::NoOpenScope)
    }
}
