//! The most recently generated command, kept for `forgor run`.

use crate::config::{Config, write_atomic};
use crate::danger::DangerLevel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const LAST_COMMAND_FILE: &str = "last_command.json";

/// What `forgor run` needs to re-assess and re-execute a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastCommand {
    pub command: String,
    /// The request that produced the command.
    pub query: String,
    pub shell: String,
    /// Engine verdict at generation time. `run` assesses again before executing.
    pub danger_level: DangerLevel,
    pub created_at: u64,
}

impl LastCommand {
    pub fn new(command: &str, query: &str, shell: &str, danger_level: DangerLevel, created_at: u64) -> Self {
        Self {
            command: command.to_string(),
            query: query.to_string(),
            shell: shell.to_string(),
            danger_level,
            created_at,
        }
    }

    /// Returns the path to the record under the config directory.
    pub fn default_path() -> Result<PathBuf> {
        Ok(Config::config_dir()?.join(LAST_COMMAND_FILE))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &content)
    }

    /// Loads the record; `None` when nothing was generated yet.
    pub fn load() -> Result<Option<Self>> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let record: Self = serde_json::from_str(&content)
            .with_context(|| format!("{} is not a valid last-command record", path.display()))?;
        Ok(Some(record))
    }
}
