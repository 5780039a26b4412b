//! Configuration file model and persistence.
//!
//! The configuration lives at `<config-home>/forgor/config.yaml` and holds
//! named LLM profiles plus history, security, output and custom-tool
//! policies. Credentials may be literal strings or `${ENV_VAR}` placeholders;
//! placeholders are only expanded when a provider is built from the profile.

use crate::context::ToolCategory;
use crate::llm::{SafetyLevel, Vendor};
use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable that overrides the config directory.
pub const CONFIG_HOME_ENV: &str = "FORGOR_CONFIG_HOME";

const APP_DIR: &str = "forgor";
const CONFIG_FILE: &str = "config.yaml";

/// One named bundle of vendor, credential, model and generation controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.1
}

impl Profile {
    pub fn new(provider: &str, api_key: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn vendor(&self) -> Result<Vendor> {
        self.provider.parse::<Vendor>().map_err(|e| anyhow!(e))
    }

    /// Checks everything that can be checked without touching the environment.
    ///
    /// Credential emptiness is checked later, after `${VAR}` expansion.
    pub fn validate_shape(&self) -> Result<()> {
        let vendor = self.vendor()?;
        if self.max_tokens == 0 {
            bail!("max_tokens must be a positive integer");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("temperature {} is outside [0, 2]", self.temperature);
        }
        if !vendor.accepts_model(&self.model) {
            bail!(
                "model '{}' is not supported by {} (supported: {})",
                self.model,
                vendor,
                vendor.models().join(", ")
            );
        }
        if vendor == Vendor::Local && self.endpoint.as_deref().is_none_or(|e| e.trim().is_empty()) {
            bail!("the local provider requires an endpoint");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_max")]
    pub max_commands: usize,
    #[serde(default = "default_history_shells")]
    pub shells: Vec<String>,
}

fn default_history_max() -> usize {
    10
}

fn default_history_shells() -> Vec<String> {
    vec!["bash".into(), "zsh".into(), "fish".into()]
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_commands: default_history_max(),
            shells: default_history_shells(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub redact_sensitive: bool,
    #[serde(default = "default_filters")]
    pub filters: Vec<String>,
    /// How cautious the model is told to be.
    #[serde(default)]
    pub safety_level: SafetyLevel,
}

fn default_true() -> bool {
    true
}

fn default_filters() -> Vec<String> {
    [
        "password",
        "passwd",
        "token",
        "secret",
        "api_key",
        "apikey",
        "private_key",
        "aws_secret_access_key",
        "authorization:",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            redact_sensitive: true,
            filters: default_filters(),
            safety_level: SafetyLevel::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(OutputFormat::Plain),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{other}' (use plain or json)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_true")]
    pub confirm_before_run: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Plain,
            confirm_before_run: true,
        }
    }
}

/// User-declared tools per category, merged into the detected inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomTools(BTreeMap<ToolCategory, Vec<String>>);

impl CustomTools {
    pub fn list(&self, category: ToolCategory) -> &[String] {
        self.0.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (ToolCategory, &[String])> {
        self.0.iter().map(|(c, tools)| (*c, tools.as_slice()))
    }

    /// Appends tools, skipping blanks and duplicates. Returns the names actually added.
    pub fn add(&mut self, category: ToolCategory, tools: &[String]) -> Vec<String> {
        let list = self.0.entry(category).or_default();
        let mut added = Vec::new();
        for tool in tools {
            let tool = tool.trim();
            if tool.is_empty() || list.iter().any(|t| t == tool) {
                continue;
            }
            list.push(tool.to_string());
            added.push(tool.to_string());
        }
        added
    }

    /// Removes tools. Returns the names actually removed.
    pub fn remove(&mut self, category: ToolCategory, tools: &[String]) -> Vec<String> {
        let Some(list) = self.0.get_mut(&category) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        list.retain(|t| {
            if tools.iter().any(|r| r.trim() == t) {
                removed.push(t.clone());
                false
            } else {
                true
            }
        });
        if list.is_empty() {
            self.0.remove(&category);
        }
        removed
    }

    pub fn clear(&mut self, category: Option<ToolCategory>) {
        match category {
            Some(c) => {
                self.0.remove(&c);
            }
            None => self.0.clear(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }
}

/// Splits a comma-separated tool list.
pub fn parse_tool_list(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub default_profile: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub custom_tools: CustomTools,
}

impl Default for Config {
    /// The template written by `config init`: one profile per hosted vendor.
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "openai".to_string(),
            Profile::new("openai", "${OPENAI_API_KEY}", "gpt-4o-mini"),
        );
        profiles.insert(
            "anthropic".to_string(),
            Profile::new("anthropic", "${ANTHROPIC_API_KEY}", "claude-3-5-haiku-20241022"),
        );
        profiles.insert(
            "gemini".to_string(),
            Profile::new("gemini", "${GOOGLE_AI_API_KEY}", "gemini-1.5-flash"),
        );

        Self {
            default_profile: "openai".to_string(),
            profiles,
            history: HistoryConfig::default(),
            security: SecurityConfig::default(),
            output: OutputConfig::default(),
            custom_tools: CustomTools::default(),
        }
    }
}

impl Config {
    /// Fallback used when the file is missing or unreadable: a single
    /// profile for the default hosted vendor with a credential placeholder.
    pub fn minimal() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "openai".to_string(),
            Profile::new("openai", "${OPENAI_API_KEY}", "gpt-4o-mini"),
        );
        Self {
            default_profile: "openai".to_string(),
            profiles,
            ..Self::default()
        }
    }

    /// Directory holding the config file and every cache file.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_HOME_ENV) {
            let dir = dir.trim();
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        let base = dirs::config_dir().ok_or_else(|| anyhow!("Could not find the user config directory"))?;
        Ok(base.join(APP_DIR))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?;
        debug!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Loads the config, falling back to [`Config::minimal`] with a hint on failure.
    pub fn load_or_minimal() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}", e);
                warn!("Using a minimal default configuration; run `forgor config init` to create one");
                Self::minimal()
            }
        }
    }

    /// Loads the config for a command that writes it back.
    ///
    /// Only a missing file falls back to [`Config::minimal`]; a file that
    /// cannot be read or parsed is an error so saving never clobbers it.
    pub fn load_for_update() -> Result<Self> {
        Self::load_for_update_from(&Self::config_path()?)
    }

    pub fn load_for_update_from(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::minimal())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Rewrites the whole file atomically (temp file, then rename).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        write_atomic(path, content.as_bytes())?;
        info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Resolves `""` and `"default"` to the configured default profile name.
    pub fn resolve_profile_name<'a>(&'a self, name: &'a str) -> &'a str {
        match name.trim() {
            "" | "default" => &self.default_profile,
            other => other,
        }
    }

    pub fn profile(&self, name: &str) -> Result<&Profile> {
        let resolved = self.resolve_profile_name(name);
        self.profiles.get(resolved).ok_or_else(|| {
            let known: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
            anyhow!(
                "profile '{}' not found (available: {})",
                resolved,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            )
        })
    }

    pub fn set_default_profile(&mut self, name: &str) -> Result<()> {
        if !self.profiles.contains_key(name) {
            bail!("cannot set default: profile '{}' does not exist", name);
        }
        self.default_profile = name.to_string();
        Ok(())
    }

    /// Structural validation of the whole file.
    pub fn validate(&self) -> Result<()> {
        if !self.profiles.contains_key(&self.default_profile) {
            bail!("default_profile '{}' is not defined under profiles", self.default_profile);
        }
        for (name, profile) in &self.profiles {
            profile
                .validate_shape()
                .with_context(|| format!("profile '{}' is invalid", name))?;
        }
        Ok(())
    }

    /// YAML rendering with literal credentials masked.
    pub fn to_masked_yaml(&self) -> Result<String> {
        let mut masked = self.clone();
        for profile in masked.profiles.values_mut() {
            profile.api_key = mask_credential(&profile.api_key);
        }
        Ok(serde_yaml::to_string(&masked)?)
    }
}

/// Placeholders are shown as-is; literal keys keep only their last four characters.
pub fn mask_credential(key: &str) -> String {
    if key.is_empty() || placeholder_regex().is_match(key) {
        return key.to_string();
    }
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

fn placeholder_regex() -> Regex {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
}

/// Environment lookup, injectable so tests never touch the process environment.
pub type EnvLookup = std::sync::Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lookup backed by the process environment.
pub fn process_env() -> EnvLookup {
    std::sync::Arc::new(|name: &str| std::env::var(name).ok())
}

/// Expands `${NAME}` placeholders using `lookup`.
///
/// Returns the expanded string and the names of variables that were not set.
/// Unset variables expand to nothing.
pub fn expand_env_with<F>(value: &str, lookup: F) -> (String, Vec<String>)
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();
    let expanded = placeholder_regex()
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match lookup(name) {
                Some(v) => v,
                None => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        })
        .into_owned();
    (expanded, missing)
}

/// Writes `bytes` to a sibling temp file and renames it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "forgor".to_string());
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, std::process::id()));
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
        Config::minimal().validate().unwrap();
    }

    #[test]
    fn test_load_for_update_refuses_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        assert_eq!(Config::load_for_update_from(&path).unwrap().default_profile, "openai");

        let broken = "default_profile: work\nprofiles:\n  work:\n    provider: openai\n     model: gpt-4o\n";
        fs::write(&path, broken).unwrap();
        assert!(Config::load_for_update_from(&path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), broken);
    }

    #[test]
    fn test_yaml_roundtrip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forgor").join("config.yaml");

        let mut config = Config::default();
        config
            .custom_tools
            .add(ToolCategory::CloudTools, &["pulumi".to_string()]);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.custom_tools.list(ToolCategory::CloudTools), ["pulumi"]);
    }

    #[test]
    fn test_parses_documented_layout() {
        let yaml = r#"
default_profile: work
profiles:
  work:
    provider: anthropic
    api_key: ${ANTHROPIC_API_KEY}
    model: claude-3-5-sonnet-20241022
    max_tokens: 300
    temperature: 0.2
  home:
    provider: local
    model: llama3.1
    endpoint: http://localhost:11434/v1
history:
  max_commands: 5
  shells: [zsh]
security:
  redact_sensitive: true
  filters: [password]
output:
  format: json
  confirm_before_run: false
custom_tools:
  development_tools: [just, bazel]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.history.max_commands, 5);
        assert_eq!(config.profiles["home"].api_key, "");
        assert_eq!(
            config.custom_tools.list(ToolCategory::DevelopmentTools),
            ["just", "bazel"]
        );
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let yaml = "default_profile: a\nprofiles:\n  a:\n    provider: openai\n    model: gpt-4o\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.history, HistoryConfig::default());
        assert!(config.output.confirm_before_run);
        assert_eq!(config.profiles["a"].max_tokens, 500);
    }

    #[test]
    fn test_resolve_profile_name() {
        let config = Config::default();
        assert_eq!(config.resolve_profile_name(""), "openai");
        assert_eq!(config.resolve_profile_name("default"), "openai");
        assert_eq!(config.resolve_profile_name("gemini"), "gemini");
        assert!(config.profile("nope").is_err());
    }

    #[test]
    fn test_validate_rejects_dangling_default() {
        let mut config = Config::default();
        config.default_profile = "ghost".to_string();
        assert!(config.validate().is_err());
        assert!(config.set_default_profile("ghost").is_err());
        config.set_default_profile("gemini").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_profile_shape_rules() {
        assert!(Profile::new("openai", "k", "gpt-4o").validate_shape().is_ok());
        assert!(Profile::new("openai", "k", "claude-3-haiku-20240307").validate_shape().is_err());
        assert!(Profile::new("mystery", "k", "x").validate_shape().is_err());
        assert!(Profile::new("local", "", "llama3").validate_shape().is_err());
        assert!(
            Profile::new("local", "", "llama3")
                .with_endpoint("http://localhost:11434/v1")
                .validate_shape()
                .is_ok()
        );

        let mut hot = Profile::new("openai", "k", "gpt-4o");
        hot.temperature = 2.5;
        assert!(hot.validate_shape().is_err());

        let mut empty = Profile::new("openai", "k", "gpt-4o");
        empty.max_tokens = 0;
        assert!(empty.validate_shape().is_err());
    }

    #[test]
    fn test_expand_env_with() {
        let lookup = |name: &str| (name == "KEY").then(|| "sk-123".to_string());
        assert_eq!(expand_env_with("${KEY}", lookup), ("sk-123".to_string(), vec![]));
        assert_eq!(
            expand_env_with("pre-${KEY}-${GONE}", lookup),
            ("pre-sk-123-".to_string(), vec!["GONE".to_string()])
        );
        assert_eq!(expand_env_with("literal", lookup).0, "literal");
    }

    #[test]
    fn test_mask_credential() {
        assert_eq!(mask_credential("${OPENAI_API_KEY}"), "${OPENAI_API_KEY}");
        assert_eq!(mask_credential("sk-abcdefghijkl"), "****ijkl");
        assert_eq!(mask_credential("short"), "****");
        assert_eq!(mask_credential(""), "");
    }

    #[test]
    fn test_custom_tools_add_remove_clear() {
        let mut tools = CustomTools::default();
        let added = tools.add(
            ToolCategory::Other,
            &parse_tool_list("foo, bar,foo, ,baz"),
        );
        assert_eq!(added, ["foo", "bar", "baz"]);
        assert_eq!(tools.add(ToolCategory::Other, &["bar".into()]), Vec::<String>::new());

        let removed = tools.remove(ToolCategory::Other, &["bar".into(), "nope".into()]);
        assert_eq!(removed, ["bar"]);
        assert_eq!(tools.list(ToolCategory::Other), ["foo", "baz"]);

        tools.add(ToolCategory::CloudTools, &["aws".into()]);
        tools.clear(Some(ToolCategory::Other));
        assert!(tools.list(ToolCategory::Other).is_empty());
        assert!(!tools.is_empty());
        tools.clear(None);
        assert!(tools.is_empty());
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
