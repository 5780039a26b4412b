//! System context: what the assistant knows about the machine it runs on.
//!
//! A [`SystemContext`] is an immutable snapshot (OS, shell, working directory,
//! tool inventory, a few environment facts). It is produced by the
//! [`detector`], stored by the two-tier [`cache`], and persisted by [`disk`].

pub mod cache;
pub mod catalog;
pub mod detector;
pub mod disk;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tool categories, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    PackageManagers,
    Languages,
    DevelopmentTools,
    SystemCommands,
    ContainerTools,
    CloudTools,
    DatabaseTools,
    NetworkTools,
    Other,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 9] = [
        ToolCategory::PackageManagers,
        ToolCategory::Languages,
        ToolCategory::DevelopmentTools,
        ToolCategory::SystemCommands,
        ToolCategory::ContainerTools,
        ToolCategory::CloudTools,
        ToolCategory::DatabaseTools,
        ToolCategory::NetworkTools,
        ToolCategory::Other,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ToolCategory::PackageManagers => "package_managers",
            ToolCategory::Languages => "languages",
            ToolCategory::DevelopmentTools => "development_tools",
            ToolCategory::SystemCommands => "system_commands",
            ToolCategory::ContainerTools => "container_tools",
            ToolCategory::CloudTools => "cloud_tools",
            ToolCategory::DatabaseTools => "database_tools",
            ToolCategory::NetworkTools => "network_tools",
            ToolCategory::Other => "other",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ToolCategory::PackageManagers => "Package managers",
            ToolCategory::Languages => "Languages",
            ToolCategory::DevelopmentTools => "Development tools",
            ToolCategory::SystemCommands => "System commands",
            ToolCategory::ContainerTools => "Container tools",
            ToolCategory::CloudTools => "Cloud tools",
            ToolCategory::DatabaseTools => "Database tools",
            ToolCategory::NetworkTools => "Network tools",
            ToolCategory::Other => "Other",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ToolCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let category = match normalized.as_str() {
            "package_managers" | "package" | "packages" | "pkg" => ToolCategory::PackageManagers,
            "languages" | "language" | "lang" => ToolCategory::Languages,
            "development_tools" | "development" | "dev" | "dev_tools" => ToolCategory::DevelopmentTools,
            "system_commands" | "system" | "sys" => ToolCategory::SystemCommands,
            "container_tools" | "container" | "containers" => ToolCategory::ContainerTools,
            "cloud_tools" | "cloud" => ToolCategory::CloudTools,
            "database_tools" | "database" | "db" => ToolCategory::DatabaseTools,
            "network_tools" | "network" | "net" => ToolCategory::NetworkTools,
            "other" | "misc" => ToolCategory::Other,
            _ => {
                let valid: Vec<&str> = ToolCategory::ALL.iter().map(|c| c.tag()).collect();
                return Err(format!(
                    "unknown tool category '{}' (valid: {})",
                    s.trim(),
                    valid.join(", ")
                ));
            }
        };
        Ok(category)
    }
}

/// A detected programming-language runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageRuntime {
    pub name: String,
    pub version: String,
    pub path: String,
}

/// A detected development tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevTool {
    pub name: String,
    pub version: String,
    pub path: String,
    pub description: String,
}

/// Categorised tool presence information.
///
/// Names are only added through [`ToolInventory::insert`], which keeps every
/// category duplicate-free and mirrors each name into the availability map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInventory {
    categories: BTreeMap<ToolCategory, Vec<String>>,
    runtimes: Vec<LanguageRuntime>,
    dev_tools: Vec<DevTool>,
    available: BTreeMap<String, bool>,
}

impl ToolInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `name` to `category` unless it is already there. Returns whether it was added.
    pub fn insert(&mut self, category: ToolCategory, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let list = self.categories.entry(category).or_default();
        if list.iter().any(|existing| existing == name) {
            return false;
        }
        list.push(name.to_string());
        self.available.insert(name.to_string(), true);
        true
    }

    pub fn add_runtime(&mut self, runtime: LanguageRuntime) {
        self.insert(ToolCategory::Languages, &runtime.name);
        if !self.runtimes.iter().any(|r| r.name == runtime.name) {
            self.runtimes.push(runtime);
        }
    }

    pub fn add_dev_tool(&mut self, tool: DevTool) {
        self.insert(ToolCategory::DevelopmentTools, &tool.name);
        if !self.dev_tools.iter().any(|t| t.name == tool.name) {
            self.dev_tools.push(tool);
        }
    }

    pub fn tools(&self, category: ToolCategory) -> &[String] {
        self.categories.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn runtimes(&self) -> &[LanguageRuntime] {
        &self.runtimes
    }

    pub fn dev_tools(&self) -> &[DevTool] {
        &self.dev_tools
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.available.get(name).copied().unwrap_or(false)
    }

    pub fn availability(&self) -> &BTreeMap<String, bool> {
        &self.available
    }

    pub fn total(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    /// SHA-256 over the canonical JSON form of the inventory.
    ///
    /// Every map is a `BTreeMap` and every list keeps insertion order, so
    /// equal inventories always serialise to the same bytes.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    /// Checks that every listed name is marked available.
    pub fn is_consistent(&self) -> bool {
        self.categories
            .values()
            .flatten()
            .all(|name| self.available.get(name) == Some(&true))
    }
}

/// Immutable snapshot of the host environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemContext {
    pub os: String,
    pub shell: String,
    pub arch: String,
    pub user: String,
    pub home_dir: String,
    pub working_dir: String,
    pub tools: ToolInventory,
    /// Selected environment facts. `PATH` is recorded as presence only.
    pub env: BTreeMap<String, String>,
    /// Unix seconds at which the snapshot was collected.
    pub collected_at: u64,
}

impl SystemContext {
    /// Same snapshot with the working directory replaced.
    ///
    /// The cached snapshot may have been collected elsewhere; callers overlay
    /// the live cwd before building prompts.
    pub fn with_working_dir(&self, cwd: impl Into<String>) -> Self {
        Self {
            working_dir: cwd.into(),
            ..self.clone()
        }
    }
}
