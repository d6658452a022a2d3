//! REPL (Read-Eval-Print Loop) with readline support
//!
//! Provides the interactive prompt with command history persisted to disk
//! and line editing.

use rustyline::{DefaultEditor, Result as RustylineResult};

const HISTORY_FILE: &str = ".jitcalc_history";

/// REPL editor with readline support
pub struct Repl {
    editor: DefaultEditor,
}

impl Repl {
    /// Create a new REPL editor with readline support
    pub fn new() -> RustylineResult<Self> {
        let mut editor = DefaultEditor::new()?;

        // Load history from disk
        let history_path = Self::history_file_path();
        let _ = editor.load_history(&history_path);

        Ok(Self { editor })
    }

    /// Get the path to the history file
    fn history_file_path() -> String {
        match dirs_home() {
            Some(home) => format!("{}/{}", home, HISTORY_FILE),
            None => HISTORY_FILE.to_string(),
        }
    }

    /// Save history to disk
    fn save_history(&mut self) {
        let history_path = Self::history_file_path();
        let _ = self.editor.save_history(&history_path);
    }

    /// Read a line from the user with readline support
    pub fn read_line(&mut self, prompt: &str) -> RustylineResult<String> {
        self.editor.readline(prompt)
    }

    /// Add a line to history
    pub fn add_history(&mut self, line: &str) {
        let _ = self.editor.add_history_entry(line);
    }

    /// Finalize REPL (save history)
    pub fn finalize(&mut self) {
        self.save_history();
    }
}

/// Get home directory path (cross-platform)
fn dirs_home() -> Option<String> {
    #[cfg(unix)]
    {
        std::env::var("HOME").ok()
    }
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}
