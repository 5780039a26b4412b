//! Probes the host and builds a [`SystemContext`].

use super::catalog::{self, DEV_TOOLS, RUNTIMES};
use super::{DevTool, LanguageRuntime, SystemContext, ToolCategory, ToolInventory};
use crate::clock::TimeProvider;
use crate::config::{CustomTools, EnvLookup, process_env};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

/// Deadline for a single `--version` subprocess.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Environment variables copied into the snapshot verbatim.
const ENV_FACTS: &[&str] = &["LANG", "TERM", "EDITOR", "VIRTUAL_ENV", "CONDA_DEFAULT_ENV", "KUBECONFIG"];

/// Finds binaries on `PATH`.
pub trait BinaryLocator: Send + Sync {
    fn locate(&self, name: &str) -> Option<PathBuf>;
}

pub struct WhichLocator;

impl BinaryLocator for WhichLocator {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }
}

/// Anything able to produce a fresh snapshot. The cache only sees this trait.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn collect(&self) -> SystemContext;
}

pub struct SystemDetector {
    locator: Arc<dyn BinaryLocator>,
    clock: Arc<dyn TimeProvider>,
    env: EnvLookup,
    custom_tools: CustomTools,
    probe_versions: bool,
}

impl SystemDetector {
    pub fn new(clock: Arc<dyn TimeProvider>, custom_tools: CustomTools) -> Self {
        Self {
            locator: Arc::new(WhichLocator),
            clock,
            env: process_env(),
            custom_tools,
            probe_versions: true,
        }
    }

    pub fn with_locator(mut self, locator: Arc<dyn BinaryLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    /// Disables the `--version` subprocesses; versions become `"unknown"`.
    pub fn without_version_probes(mut self) -> Self {
        self.probe_versions = false;
        self
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    async fn build_inventory(&self) -> ToolInventory {
        let mut inventory = ToolInventory::new();

        for category in ToolCategory::ALL {
            for binary in catalog::binaries(category) {
                if self.locator.locate(binary).is_some() {
                    inventory.insert(category, binary);
                }
            }
        }

        let mut probes = JoinSet::new();
        for runtime in RUNTIMES {
            if let Some(path) = self.locator.locate(runtime.binary) {
                let probe = self.probe_versions;
                probes.spawn(async move {
                    let version = if probe {
                        probe_version(&path, runtime.version_args).await
                    } else {
                        "unknown".to_string()
                    };
                    Probed::Runtime(LanguageRuntime {
                        name: runtime.binary.to_string(),
                        version,
                        path: path.display().to_string(),
                    })
                });
            }
        }
        for tool in DEV_TOOLS {
            if let Some(path) = self.locator.locate(tool.binary) {
                let probe = self.probe_versions;
                probes.spawn(async move {
                    let version = if probe {
                        probe_version(&path, &["--version"]).await
                    } else {
                        "unknown".to_string()
                    };
                    Probed::DevTool(DevTool {
                        name: tool.binary.to_string(),
                        version,
                        path: path.display().to_string(),
                        description: tool.description.to_string(),
                    })
                });
            }
        }

        let mut runtimes = Vec::new();
        let mut dev_tools = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Probed::Runtime(r)) => runtimes.push(r),
                Ok(Probed::DevTool(t)) => dev_tools.push(t),
                Err(e) => debug!("Version probe task failed: {}", e),
            }
        }
        // Completion order is arbitrary; keep the catalogue order instead.
        runtimes.sort_by_key(|r| RUNTIMES.iter().position(|p| p.binary == r.name));
        dev_tools.sort_by_key(|t| DEV_TOOLS.iter().position(|p| p.binary == t.name));
        for runtime in runtimes {
            inventory.add_runtime(runtime);
        }
        for tool in dev_tools {
            inventory.add_dev_tool(tool);
        }

        for (category, names) in self.custom_tools.iter() {
            for name in names {
                if inventory.insert(category, name) && self.locator.locate(name).is_none() {
                    debug!("Custom tool '{}' ({}) is not on PATH", name, category);
                }
            }
        }

        inventory
    }

    fn env_facts(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let path_state = if self.var("PATH").is_some() { "present" } else { "absent" };
        env.insert("PATH".to_string(), path_state.to_string());
        for name in ENV_FACTS {
            if let Some(value) = self.var(name) {
                env.insert(name.to_string(), value);
            }
        }
        env
    }
}

enum Probed {
    Runtime(LanguageRuntime),
    DevTool(DevTool),
}

#[async_trait]
impl ContextSource for SystemDetector {
    async fn collect(&self) -> SystemContext {
        let started = std::time::Instant::now();
        let os_tag = std::env::consts::OS;

        let working_dir = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| ".".to_string());
        let home_dir = dirs::home_dir()
            .map(|p| p.display().to_string())
            .or_else(|| self.var("HOME"))
            .unwrap_or_default();
        let user = self
            .var("USER")
            .or_else(|| self.var("USERNAME"))
            .unwrap_or_else(|| "unknown".to_string());

        let tools = self.build_inventory().await;
        let context = SystemContext {
            os: os_display_name(os_tag).to_string(),
            shell: shell_name(self.var("SHELL").as_deref(), os_tag),
            arch: std::env::consts::ARCH.to_string(),
            user,
            home_dir,
            working_dir,
            tools,
            env: self.env_facts(),
            collected_at: self.clock.now(),
        };

        debug!(
            "Collected system context: {} tools in {:?}",
            context.tools.total(),
            started.elapsed()
        );
        context
    }
}

/// Human name for a `std::env::consts::OS` tag.
pub fn os_display_name(tag: &str) -> &str {
    match tag {
        "macos" | "darwin" => "macOS",
        "linux" => "Linux",
        "windows" => "Windows",
        "freebsd" => "FreeBSD",
        "openbsd" => "OpenBSD",
        "netbsd" => "NetBSD",
        "android" => "Android",
        "ios" => "iOS",
        other => other,
    }
}

/// Basename of `$SHELL`, or the platform default when unset.
pub fn shell_name(shell_var: Option<&str>, os_tag: &str) -> String {
    let from_var = shell_var
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| Path::new(s).file_name())
        .map(|n| n.to_string_lossy().trim_end_matches(".exe").to_string());

    from_var.unwrap_or_else(|| {
        if os_tag == "windows" {
            "cmd".to_string()
        } else {
            "bash".to_string()
        }
    })
}

/// First line printed by `<path> <args>`, or `"unknown"`.
async fn probe_version(path: &Path, args: &[&str]) -> String {
    let run = tokio::process::Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(PROBE_TIMEOUT, run).await {
        Ok(Ok(output)) => first_line(&output.stdout)
            .or_else(|| first_line(&output.stderr))
            .unwrap_or_else(|| "unknown".to_string()),
        Ok(Err(e)) => {
            debug!("Version probe for {} failed: {}", path.display(), e);
            "unknown".to_string()
        }
        Err(_) => {
            debug!("Version probe for {} timed out", path.display());
            "unknown".to_string()
        }
    }
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::HashSet;

    /// Pretends exactly the listed binaries exist under `/usr/bin`.
    pub struct FakeLocator(pub HashSet<&'static str>);

    impl FakeLocator {
        pub fn with(names: &[&'static str]) -> Self {
            Self(names.iter().copied().collect())
        }
    }

    impl BinaryLocator for FakeLocator {
        fn locate(&self, name: &str) -> Option<PathBuf> {
            self.0.contains(name).then(|| PathBuf::from(format!("/usr/bin/{name}")))
        }
    }

    fn env(pairs: &'static [(&'static str, &'static str)]) -> EnvLookup {
        Arc::new(move |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        })
    }

    fn detector(locator: FakeLocator, custom: CustomTools) -> SystemDetector {
        SystemDetector::new(Arc::new(ManualClock::new(1_700_000_000)), custom)
            .with_locator(Arc::new(locator))
            .with_env(env(&[("SHELL", "/usr/local/bin/zsh"), ("PATH", "/usr/bin"), ("USER", "dev")]))
            .without_version_probes()
    }

    #[test]
    fn test_os_mapping() {
        assert_eq!(os_display_name("darwin"), "macOS");
        assert_eq!(os_display_name("macos"), "macOS");
        assert_eq!(os_display_name("linux"), "Linux");
        assert_eq!(os_display_name("haiku"), "haiku");
    }

    #[test]
    fn test_shell_name() {
        assert_eq!(shell_name(Some("/bin/zsh"), "linux"), "zsh");
        assert_eq!(shell_name(Some("/opt/homebrew/bin/fish"), "macos"), "fish");
        assert_eq!(shell_name(None, "linux"), "bash");
        assert_eq!(shell_name(Some(""), "linux"), "bash");
        assert_eq!(shell_name(None, "windows"), "cmd");
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line(b"\nPython 3.12.1\nextra"), Some("Python 3.12.1".to_string()));
        assert_eq!(first_line(b"  \n"), None);
    }

    #[tokio::test]
    async fn test_collect_uses_locator_and_env() {
        let ctx = detector(FakeLocator::with(&["git", "grep", "python3", "docker"]), CustomTools::default())
            .collect()
            .await;

        assert_eq!(ctx.shell, "zsh");
        assert_eq!(ctx.user, "dev");
        assert_eq!(ctx.collected_at, 1_700_000_000);
        assert_eq!(ctx.env.get("PATH").map(String::as_str), Some("present"));
        assert!(!ctx.env.values().any(|v| v.contains("/usr/bin")));

        assert_eq!(ctx.tools.tools(ToolCategory::SystemCommands), ["grep"]);
        assert!(ctx.tools.tools(ToolCategory::ContainerTools).contains(&"docker".to_string()));
        let runtime = &ctx.tools.runtimes()[0];
        assert_eq!(runtime.name, "python3");
        assert_eq!(runtime.version, "unknown");
        assert_eq!(runtime.path, "/usr/bin/python3");
        assert!(ctx.tools.dev_tools().iter().any(|t| t.name == "git" && !t.description.is_empty()));
        assert!(ctx.tools.is_consistent());
    }

    #[tokio::test]
    async fn test_custom_tools_are_merged_even_off_path() {
        let mut custom = CustomTools::default();
        custom.add(ToolCategory::Other, &["mytool".to_string(), "grep".to_string()]);
        custom.add(ToolCategory::SystemCommands, &["grep".to_string()]);

        let ctx = detector(FakeLocator::with(&["grep"]), custom).collect().await;
        assert_eq!(ctx.tools.tools(ToolCategory::Other), ["mytool", "grep"]);
        assert_eq!(ctx.tools.tools(ToolCategory::SystemCommands), ["grep"]);
        assert!(ctx.tools.is_available("mytool"));
    }

    #[tokio::test]
    async fn test_missing_version_binary_falls_back_to_unknown() {
        let version = probe_version(Path::new("/nonexistent/forgor-probe"), &["--version"]).await;
        assert_eq!(version, "unknown");
    }
}
