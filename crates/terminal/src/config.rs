//! Session configuration and its persisted form
//!
//! A session file is an ordered JSON array of session objects. Unknown
//! fields are ignored on read and every field has a defensive default, so
//! loading never fails on partial or malformed documents.

use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

fn default_rows() -> u16 {
    25
}

fn default_cols() -> u16 {
    80
}

fn default_scrollback() -> usize {
    10_000
}

/// Everything needed to construct and persist one terminal session.
///
/// `args` is the shell's argument tail as a single string, split on
/// whitespace at spawn time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default)]
    pub args: String,

    #[serde(default)]
    pub working_dir: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub profile_name: String,

    #[serde(default = "default_rows")]
    pub rows: u16,

    #[serde(default = "default_cols")]
    pub cols: u16,

    #[serde(default = "default_scrollback")]
    pub scrollback_lines: usize,

    #[serde(default)]
    pub tab_index: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            args: String::new(),
            working_dir: String::new(),
            title: String::new(),
            profile_name: String::new(),
            rows: default_rows(),
            cols: default_cols(),
            scrollback_lines: default_scrollback(),
            tab_index: 0,
        }
    }
}

impl SessionConfig {
    /// The argument vector the shell is spawned with.
    pub fn arg_list(&self) -> Vec<String> {
        self.args.split_whitespace().map(String::from).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Read a session object, substituting defaults for anything missing
    /// or malformed. Never fails.
    pub fn from_json(doc: &serde_json::Value) -> Self {
        serde_json::from_value(doc.clone()).unwrap_or_default()
    }
}

/// Load the ordered session list. A missing or unparseable file yields an
/// empty list; malformed entries degrade to defaults individually.
pub fn load_sessions(path: &Path) -> Vec<SessionConfig> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::debug!(path = %path.display(), %e, "no session file");
            return Vec::new();
        }
    };

    let docs: Vec<serde_json::Value> = match serde_json::from_str(&contents) {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "failed to parse session file");
            return Vec::new();
        }
    };

    docs.iter().map(SessionConfig::from_json).collect()
}

/// Write the ordered session list.
pub fn save_sessions(path: &Path, sessions: &[SessionConfig]) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(sessions)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}
