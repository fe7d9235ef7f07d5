use crate::parser::DEFAULT_MAX_LINE_LEN;
use std::path::PathBuf;

/// Environment variable that relocates chat rooms when no flag is given.
pub const CHAT_ROOT_VAR: &str = "SHELLISH_CHAT_ROOT";

/// Runtime knobs of the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the `chatroom-<room>` directories.
    pub chat_root: PathBuf,
    /// Longest accepted input line, in bytes.
    pub max_line_len: usize,
    /// Number of lines the line editor keeps for recall.
    pub history_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        let chat_root = std::env::var_os(CHAT_ROOT_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self {
            chat_root,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            history_size: 100,
        }
    }
}

impl Config {
    pub fn with_chat_root(mut self, chat_root: impl Into<PathBuf>) -> Self {
        self.chat_root = chat_root.into();
        self
    }

    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size;
        self
    }
}
