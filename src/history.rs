//! Recent shell history for prompt context.
//!
//! Reads the history file of the user's shell (bash, zsh or fish), keeps the
//! last few commands and drops anything that looks like it carries a secret.

use crate::config::{HistoryConfig, SecurityConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A past command. `exit_code` is -1 when the shell did not record it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command: String,
    pub exit_code: i32,
}

impl HistoryEntry {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            exit_code: -1,
        }
    }
}

/// Shells whose history format is understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFormat {
    Bash,
    Zsh,
    Fish,
}

impl HistoryFormat {
    pub fn for_shell(shell: &str) -> Option<Self> {
        match shell {
            "bash" | "sh" => Some(HistoryFormat::Bash),
            "zsh" => Some(HistoryFormat::Zsh),
            "fish" => Some(HistoryFormat::Fish),
            _ => None,
        }
    }

    /// Default history file location under `home`.
    pub fn default_path(&self, home: &Path, histfile: Option<&str>) -> PathBuf {
        match self {
            HistoryFormat::Bash => histfile
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(".bash_history")),
            HistoryFormat::Zsh => histfile
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(".zsh_history")),
            HistoryFormat::Fish => home
                .join(".local")
                .join("share")
                .join("fish")
                .join("fish_history"),
        }
    }

    /// Extracts commands in file order.
    pub fn parse(&self, content: &str) -> Vec<String> {
        match self {
            HistoryFormat::Bash => content
                .lines()
                .filter(|l| !is_bash_timestamp(l))
                .map(str::to_string)
                .collect(),
            HistoryFormat::Zsh => content.lines().map(|l| parse_zsh_line(l).to_string()).collect(),
            HistoryFormat::Fish => content
                .lines()
                .filter_map(|l| l.trim_start().strip_prefix("- cmd:"))
                .map(|c| c.trim().replace("\\n", "\n"))
                .collect(),
        }
    }
}

fn is_bash_timestamp(line: &str) -> bool {
    line.strip_prefix('#')
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

/// `: 1700000000:0;git status` becomes `git status`; plain lines pass through.
fn parse_zsh_line(line: &str) -> &str {
    if line.starts_with(": ") {
        if let Some((_, cmd)) = line.split_once(';') {
            return cmd;
        }
    }
    line
}

/// Reads and filters history for one shell.
pub struct HistoryReader<'a> {
    history: &'a HistoryConfig,
    security: &'a SecurityConfig,
}

impl<'a> HistoryReader<'a> {
    pub fn new(history: &'a HistoryConfig, security: &'a SecurityConfig) -> Self {
        Self { history, security }
    }

    /// Last `limit` commands of `shell`, oldest first.
    ///
    /// Missing or unreadable files, unknown shells and shells not allowed by
    /// the config all yield an empty history.
    pub fn recent(&self, shell: &str, home: &Path, limit: usize) -> Vec<HistoryEntry> {
        if limit == 0 || !self.history.shells.iter().any(|s| s == shell) {
            return Vec::new();
        }
        let Some(format) = HistoryFormat::for_shell(shell) else {
            return Vec::new();
        };

        let histfile = std::env::var("HISTFILE").ok();
        let path = format.default_path(home, histfile.as_deref());
        let content = match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                debug!("No readable history at {}: {}", path.display(), e);
                return Vec::new();
            }
        };

        self.select(format.parse(&content), limit)
    }

    /// Cleans, redacts and trims raw commands to the last `limit`.
    pub fn select(&self, raw: Vec<String>, limit: usize) -> Vec<HistoryEntry> {
        let mut cleaned: Vec<String> = Vec::new();
        for command in raw {
            let command = command.trim();
            if command.is_empty() || cleaned.last().is_some_and(|last| last == command) {
                continue;
            }
            cleaned.push(command.to_string());
        }

        let kept: Vec<String> = cleaned.into_iter().filter(|c| !self.is_sensitive(c)).collect();
        let skip = kept.len().saturating_sub(limit);
        kept.into_iter().skip(skip).map(|c| HistoryEntry::new(&c)).collect()
    }

    fn is_sensitive(&self, command: &str) -> bool {
        if !self.security.redact_sensitive {
            return false;
        }
        let lowered = command.to_lowercase();
        self.security
            .filters
            .iter()
            .filter(|f| !f.is_empty())
            .any(|f| lowered.contains(&f.to_lowercase()))
    }
}
