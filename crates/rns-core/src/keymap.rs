//! Keymap declarations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Editor map mode.
///
/// Parsed from either the single-letter map prefix (`"n"`, `"i"`, ...) or the
/// long name (`"normal"`, `"insert"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Normal, visual, select and operator-pending (`:map`).
    All,
    Normal,
    /// Visual and select (`:vmap`).
    Visual,
    /// Visual only (`:xmap`).
    VisualOnly,
    Select,
    OperatorPending,
    Insert,
    Command,
    /// Insert and command-line (`:map!`).
    InsertCommand,
    Lang,
    Terminal,
}

impl Mode {
    /// The map-command prefix for this mode (`n` for `nmap`).
    pub fn prefix(self) -> &'static str {
        match self {
            Mode::All => "",
            Mode::Normal => "n",
            Mode::Visual => "v",
            Mode::VisualOnly => "x",
            Mode::Select => "s",
            Mode::OperatorPending => "o",
            Mode::Insert => "i",
            Mode::Command => "c",
            Mode::InsertCommand => "!",
            Mode::Lang => "l",
            Mode::Terminal => "t",
        }
    }

    /// The full map command (`nnoremap`, `map!`, ...).
    pub fn map_command(self, noremap: bool) -> String {
        let base = if noremap { "noremap" } else { "map" };
        match self {
            Mode::InsertCommand => format!("{base}!"),
            other => format!("{}{}", other.prefix(), base),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::All => "all",
            Mode::Normal => "normal",
            Mode::Visual => "visual",
            Mode::VisualOnly => "visual_only",
            Mode::Select => "select",
            Mode::OperatorPending => "operator_pending",
            Mode::Insert => "insert",
            Mode::Command => "command",
            Mode::InsertCommand => "insert_command",
            Mode::Lang => "lang",
            Mode::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim() {
            "" | "all" => Mode::All,
            "n" | "normal" => Mode::Normal,
            "v" | "visual" => Mode::Visual,
            "x" | "visual_only" => Mode::VisualOnly,
            "s" | "select" => Mode::Select,
            "o" | "operator_pending" => Mode::OperatorPending,
            "i" | "insert" => Mode::Insert,
            "c" | "command" => Mode::Command,
            "!" | "insert_command" => Mode::InsertCommand,
            "l" | "lang" => Mode::Lang,
            "t" | "terminal" => Mode::Terminal,
            other => return Err(format!("Unknown map mode '{}'", other)),
        };
        Ok(mode)
    }
}

/// Who declared a keymap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum KeymapOwner {
    /// Ownerless default from the flat API.
    Global,
    /// Declared inside a plugin's config scope.
    Plugin(String),
}

impl KeymapOwner {
    pub fn plugin(&self) -> Option<&str> {
        match self {
            KeymapOwner::Global => None,
            KeymapOwner::Plugin(name) => Some(name),
        }
    }
}

/// Options passed through to the host's keymap primitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct KeymapOptions {
    pub noremap: bool,
    pub silent: bool,
    /// Buffer-local mapping when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

impl KeymapOptions {
    /// Non-recursive mapping, the default for structured keymaps.
    pub fn noremap() -> Self {
        Self {
            noremap: true,
            ..Self::default()
        }
    }
}

/// Resolution identity of a keymap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeymapId {
    pub mode: Mode,
    pub lhs: String,
    pub buffer: Option<i32>,
}

/// A declared key binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeymapSpec {
    pub mode: Mode,
    /// Key sequence, e.g. `"<leader>ff"`.
    pub lhs: String,
    /// Action or command the sequence maps to.
    pub rhs: String,
    pub owner: KeymapOwner,
    #[serde(default)]
    pub opts: KeymapOptions,
}

impl KeymapSpec {
    pub fn id(&self) -> KeymapId {
        KeymapId {
            mode: self.mode,
            lhs: self.lhs.clone(),
            buffer: self.opts.buffer,
        }
    }
}
