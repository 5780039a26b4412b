//! Danger assessment engine.
//!
//! Classifies a proposed shell command into a [`DangerLevel`] independently
//! of whatever the model said about it. The pipeline is:
//!
//! 1. **Pattern scan** over a fixed rule catalogue (case-insensitive regexes
//!    matched against the lowercased command). The highest matching level
//!    wins; factors and mitigations of every match are collected.
//! 2. **Context adjustment** based on the working directory and OS.
//! 3. **Heuristic adjustment** for risky token combinations, piped
//!    downloads and wildcard removals.
//!
//! The engine never fails. Assessing the same command in the same context
//! always yields the same result, and adding a dangerous token to a command
//! never lowers its level.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordinal risk level: `safe < low < medium < high < critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DangerLevel {
    #[default]
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl DangerLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DangerLevel::Safe => "safe",
            DangerLevel::Low => "low",
            DangerLevel::Medium => "medium",
            DangerLevel::High => "high",
            DangerLevel::Critical => "critical",
        }
    }

    /// One step up, saturating at `Critical`.
    pub fn bumped(self) -> Self {
        match self {
            DangerLevel::Safe => DangerLevel::Low,
            DangerLevel::Low => DangerLevel::Medium,
            DangerLevel::Medium => DangerLevel::High,
            DangerLevel::High | DangerLevel::Critical => DangerLevel::Critical,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            DangerLevel::Safe => "✅",
            DangerLevel::Low => "ℹ️",
            DangerLevel::Medium => "⚠️",
            DangerLevel::High => "🔶",
            DangerLevel::Critical => "🛑",
        }
    }
}

impl fmt::Display for DangerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DangerLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" | "none" => Ok(DangerLevel::Safe),
            "low" => Ok(DangerLevel::Low),
            "medium" | "moderate" => Ok(DangerLevel::Medium),
            "high" => Ok(DangerLevel::High),
            "critical" => Ok(DangerLevel::Critical),
            other => Err(format!("unknown danger level '{other}'")),
        }
    }
}

/// A single catalogue entry.
#[derive(Debug, Clone)]
pub struct DangerRule {
    pub name: &'static str,
    pub pattern: &'static str,
    pub level: DangerLevel,
    pub reason: &'static str,
    pub factors: &'static [&'static str],
    pub mitigations: &'static [&'static str],
    /// Substrings of the working directory that neutralise this rule.
    pub context_safe: &'static [&'static str],
}

/// Result of assessing one command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DangerAssessment {
    pub level: DangerLevel,
    pub confidence: f64,
    pub reason: String,
    pub factors: Vec<String>,
    pub mitigations: Vec<String>,
}

/// Environment the command would run in.
#[derive(Debug, Clone, Default)]
pub struct AssessmentContext {
    pub cwd: String,
    /// Human OS name as produced by the context detector (`macOS`, `Linux`, ...).
    pub os: String,
}

impl AssessmentContext {
    pub fn new(cwd: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            os: os.into(),
        }
    }
}

pub const PIPED_DOWNLOAD_FACTOR: &str = "Remote code execution via piped download";
pub const PIPED_DOWNLOAD_MITIGATION: &str = "Download and inspect scripts before execution";

const PATTERN_CONFIDENCE: f64 = 0.8;
const HEURISTIC_CONFIDENCE: f64 = 0.6;
const NO_MATCH_CONFIDENCE: f64 = 0.7;

/// The built-in rule catalogue.
pub fn builtin_rules() -> Vec<DangerRule> {
    vec![
        DangerRule {
            name: "recursive_force_delete",
            pattern: r"\brm\s+(?:[^;&|\s]+\s+)*?-(?:[a-z]*[rf][a-z]*|-recursive|-force)\b",
            level: DangerLevel::High,
            reason: "Recursive or forced file deletion",
            factors: &["Files are removed permanently without confirmation"],
            mitigations: &[
                "List the targets first with `ls` to confirm what will be removed",
                "Use `rm -i` to confirm each deletion",
            ],
            context_safe: &["/node_modules", "/.cache"],
        },
        DangerRule {
            name: "root_wildcard",
            pattern: r"\b(?:rm|mv|cp|chmod|chown)\b[^|;&]*\s/\*",
            level: DangerLevel::Critical,
            reason: "Wildcard operation on the root filesystem",
            factors: &["Targets every top-level directory of the system"],
            mitigations: &["Restrict the path to the directory you actually mean"],
            context_safe: &[],
        },
        DangerRule {
            name: "recursive_delete_root",
            pattern: r"\brm\s+(?:[^;&|\s]+\s+)*?/(?:\s|$)",
            level: DangerLevel::Critical,
            reason: "Deletion targeting the root directory",
            factors: &["Would destroy the operating system installation"],
            mitigations: &["Never run removal commands against `/`"],
            context_safe: &[],
        },
        DangerRule {
            name: "direct_disk_io",
            pattern: r"\bdd\b[^|;&]*/dev/",
            level: DangerLevel::Critical,
            reason: "Direct disk I/O",
            factors: &["Raw device writes bypass the filesystem and can wipe disks"],
            mitigations: &["Double-check `if=` and `of=` device names with `lsblk`"],
            context_safe: &[],
        },
        DangerRule {
            name: "filesystem_format",
            pattern: r"\bmkfs(?:\.[a-z0-9]+)?\b",
            level: DangerLevel::Critical,
            reason: "Filesystem creation",
            factors: &["Formatting erases all data on the target device"],
            mitigations: &["Verify the device with `lsblk` before formatting"],
            context_safe: &[],
        },
        DangerRule {
            name: "block_device_redirect",
            pattern: r">\s*/dev/(?:sd[a-z]|nvme\d|hd[a-z]|disk\d|mmcblk\d)",
            level: DangerLevel::Critical,
            reason: "Output redirected onto a block device",
            factors: &["Overwrites the raw contents of a disk"],
            mitigations: &["Redirect into a regular file instead"],
            context_safe: &[],
        },
        DangerRule {
            name: "fork_bomb",
            pattern: r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            level: DangerLevel::Critical,
            reason: "Fork bomb",
            factors: &["Exhausts process slots until the machine locks up"],
            mitigations: &["Do not run this command"],
            context_safe: &[],
        },
        DangerRule {
            name: "system_power",
            pattern: r"\b(?:shutdown|reboot|halt|poweroff)\b|\binit\s+[06]\b",
            level: DangerLevel::Medium,
            reason: "System shutdown or reboot",
            factors: &["Interrupts every running process and logged-in user"],
            mitigations: &["Save work and notify other users first"],
            context_safe: &[],
        },
        DangerRule {
            name: "world_writable",
            pattern: r"\bchmod\s+(?:-\S+\s+)*0?777\b",
            level: DangerLevel::High,
            reason: "World-writable permissions",
            factors: &["Any local user can modify the affected files"],
            mitigations: &["Grant the narrowest permissions needed, e.g. 755 or 644"],
            context_safe: &[],
        },
        DangerRule {
            name: "piped_download",
            pattern: r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:sh|bash|zsh|fish)\b",
            level: DangerLevel::Critical,
            reason: "Downloaded content piped straight into a shell",
            factors: &[PIPED_DOWNLOAD_FACTOR],
            mitigations: &[PIPED_DOWNLOAD_MITIGATION],
            context_safe: &[],
        },
        DangerRule {
            name: "forceful_kill",
            pattern: r"\b(?:kill|killall|pkill)\s+(?:[^;&|\s]+\s+)*?-(?:9|kill|sigkill)\b",
            level: DangerLevel::Medium,
            reason: "Forceful process termination",
            factors: &["SIGKILL gives the process no chance to clean up"],
            mitigations: &["Try a plain `kill` (SIGTERM) first"],
            context_safe: &[],
        },
        DangerRule {
            name: "global_package_install",
            pattern: r"\bnpm\s+(?:install|i|add)\b[^|;&]*\s(?:-g|--global)\b|\byarn\s+global\s+add\b|\bsudo\s+(?:apt|apt-get|yum|dnf|pacman|zypper|apk|pip3?|gem|npm|brew|snap|port)\b",
            level: DangerLevel::Medium,
            reason: "System-wide package installation",
            factors: &["Modifies packages shared by every user of the machine"],
            mitigations: &["Prefer a user-local or project-local install"],
            context_safe: &[],
        },
        DangerRule {
            name: "extract_to_root",
            pattern: r"\b(?:tar|unzip)\b[^|;&]*(?:\s-c\s*/(?:\s|$)|--directory[=\s]/(?:\s|$)|\s-d\s+/(?:\s|$))",
            level: DangerLevel::Medium,
            reason: "Archive extraction into the root directory",
            factors: &["Archive contents may overwrite system files"],
            mitigations: &["Extract into an empty directory and inspect first"],
            context_safe: &[],
        },
        DangerRule {
            name: "bind_all_interfaces",
            pattern: r"\b0\.0\.0\.0\b",
            level: DangerLevel::Low,
            reason: "Service bound to all network interfaces",
            factors: &["The service becomes reachable from other machines"],
            mitigations: &["Bind to 127.0.0.1 unless remote access is required"],
            context_safe: &[],
        },
        DangerRule {
            name: "history_manipulation",
            pattern: r"\bhistory\s+-c\b|>\s*\S*_history\b|\bunset\s+histfile\b",
            level: DangerLevel::Low,
            reason: "Shell history manipulation",
            factors: &["Erases the record of previously run commands"],
            mitigations: &["Back up the history file before clearing it"],
            context_safe: &[],
        },
    ]
}

struct CompiledRule {
    rule: DangerRule,
    regex: Regex,
}

struct Indicators {
    groups: Vec<Regex>,
    shell_pipe: Regex,
    download: Regex,
    rm: Regex,
}

/// Stateless evaluator holding the compiled catalogue.
pub struct DangerAnalyzer {
    rules: Vec<CompiledRule>,
    indicators: Indicators,
}

impl DangerAnalyzer {
    /// Compiles the built-in catalogue.
    pub fn new() -> Self {
        Self::with_rules(builtin_rules())
    }

    /// Compiles a custom catalogue. Rules whose pattern fails to compile are skipped.
    pub fn with_rules(rules: Vec<DangerRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|rule| match Regex::new(&format!("(?i){}", rule.pattern)) {
                Ok(regex) => Some(CompiledRule { rule, regex }),
                Err(e) => {
                    tracing::warn!("Skipping danger rule '{}': {}", rule.name, e);
                    None
                }
            })
            .collect();

        Self {
            rules,
            indicators: Indicators::new(),
        }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.rule.name).collect()
    }

    /// Assesses `command` as if run in `ctx`.
    pub fn assess(&self, command: &str, ctx: &AssessmentContext) -> DangerAssessment {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return DangerAssessment {
                level: DangerLevel::Safe,
                confidence: 1.0,
                reason: "Empty command".to_string(),
                factors: Vec::new(),
                mitigations: Vec::new(),
            };
        }

        let lowered = trimmed.to_lowercase();
        let cwd = ctx.cwd.to_lowercase();

        let mut level = DangerLevel::Safe;
        let mut reasons: Vec<String> = Vec::new();
        let mut factors: Vec<String> = Vec::new();
        let mut mitigations: Vec<String> = Vec::new();
        let mut matched_rule = false;

        for compiled in &self.rules {
            let rule = &compiled.rule;
            if !compiled.regex.is_match(&lowered) {
                continue;
            }
            if rule.context_safe.iter().any(|safe| cwd.contains(safe)) {
                tracing::debug!("Rule '{}' neutralised by working directory {}", rule.name, ctx.cwd);
                continue;
            }
            matched_rule = true;
            level = level.max(rule.level);
            push_unique(&mut reasons, rule.reason);
            for factor in rule.factors {
                push_unique(&mut factors, factor);
            }
            for mitigation in rule.mitigations {
                push_unique(&mut mitigations, mitigation);
            }
        }

        // Context adjustment.
        if cwd.contains("/tmp") || cwd.contains("/temp") {
            if level == DangerLevel::High {
                level = DangerLevel::Medium;
                push_unique(
                    &mut mitigations,
                    &format!(
                        "Running inside a temporary directory ({}); impact is limited to temporary files",
                        ctx.cwd
                    ),
                );
            }
        } else if ctx.cwd == "/" && level == DangerLevel::Medium {
            level = DangerLevel::High;
            push_unique(&mut factors, "Working directory is the filesystem root");
        }
        let is_macos = ctx.os.eq_ignore_ascii_case("macos") || ctx.os.eq_ignore_ascii_case("darwin");
        if is_macos && self.indicators.rm.is_match(&lowered) {
            push_unique(&mut mitigations, "Consider `trash` instead of `rm` so files can be recovered");
        }

        // Heuristic adjustment.
        let mut heuristic_hit = false;
        let indicator_count = self
            .indicators
            .groups
            .iter()
            .filter(|group| group.is_match(&lowered))
            .count();
        if indicator_count >= 2 && matches!(level, DangerLevel::Medium | DangerLevel::High) {
            level = level.bumped();
            heuristic_hit = true;
            push_unique(&mut factors, "Combines several high-risk operations");
        }

        if self.indicators.download.is_match(&lowered) && self.indicators.shell_pipe.is_match(&lowered) {
            if level < DangerLevel::Critical {
                heuristic_hit = true;
            }
            level = DangerLevel::Critical;
            push_unique(&mut reasons, "Downloaded content piped into a shell");
            push_unique(&mut factors, PIPED_DOWNLOAD_FACTOR);
            push_unique(&mut mitigations, PIPED_DOWNLOAD_MITIGATION);
        }

        if self.indicators.rm.is_match(&lowered) && lowered.contains('*') && level < DangerLevel::High {
            level = DangerLevel::High;
            heuristic_hit = true;
            push_unique(&mut reasons, "Wildcard removal");
            push_unique(&mut factors, "Wildcards can expand to far more files than intended");
        }

        let confidence = if matched_rule {
            PATTERN_CONFIDENCE
        } else if heuristic_hit {
            HEURISTIC_CONFIDENCE
        } else {
            NO_MATCH_CONFIDENCE
        };

        let reason = if reasons.is_empty() {
            "No dangerous patterns detected".to_string()
        } else {
            reasons.join("; ")
        };

        DangerAssessment {
            level,
            confidence,
            reason,
            factors,
            mitigations,
        }
    }
}

impl Default for DangerAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicators {
    fn new() -> Self {
        // `rm` and `-rf` describe the same operation and count once.
        let groups = [r"\bsudo\b", r"\brm\b|(?:^|\s)-rf\b", r">\s*/dev/", r"\bdd\b"]
            .iter()
            .map(|p| Regex::new(p).expect("indicator pattern is valid"))
            .collect();
        Self {
            groups,
            shell_pipe: Regex::new(r"\|\s*(?:sudo\s+)?(?:sh|bash|zsh|fish)\b").expect("valid"),
            download: Regex::new(r"\b(?:curl|wget)\b").expect("valid"),
            rm: Regex::new(r"\brm\b").expect("valid"),
        }
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}
