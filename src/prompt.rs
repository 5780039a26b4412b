//! Prompt assembly.
//!
//! The system prompt describes the machine (from [`SystemContext`]); the user
//! prompt carries the query, cwd, recent history and any hint. The reply
//! format section depends on which grammar the vendor's parser expects.

use crate::context::{SystemContext, ToolCategory};
use crate::llm::{CommandRequest, SafetyLevel};
use std::fmt::Write;

/// Tools listed per category before the list is cut short.
pub const MAX_TOOLS_PER_CATEGORY: usize = 15;

/// Which reply grammar the prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// Labelled `COMMAND:` / `EXPLANATION:` / `DANGER_LEVEL:` / `DANGER_REASON:` lines.
    Structured,
    /// One line, `command || explanation` when `explain` is set.
    Inline { explain: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

pub struct PromptBuilder {
    style: PromptStyle,
}

impl PromptBuilder {
    pub fn new(style: PromptStyle) -> Self {
        Self { style }
    }

    /// Builds the prompt pair for a generation request.
    pub fn build(&self, request: &CommandRequest) -> PromptPair {
        PromptPair {
            system: self.system_prompt(&request.context.system, request.options.safety_level),
            user: self.user_prompt(request),
        }
    }

    /// Builds the prompt pair asking the model to explain `command`.
    pub fn build_explain(&self, command: &str) -> PromptPair {
        PromptPair {
            system: "You are a shell expert. Explain what the given command does in plain \
                     language: each part, its flags, and any side effects or risks. \
                     Reply with the explanation only, no code fences."
                .to_string(),
            user: format!("Explain this command:\n{command}"),
        }
    }

    fn system_prompt(&self, ctx: &SystemContext, safety: SafetyLevel) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "You are a command-line expert. Translate the user's request into a single {} command for {}.",
            ctx.shell, ctx.os
        );
        out.push('\n');
        out.push_str("SYSTEM:\n");
        let _ = writeln!(out, "- OS: {}", ctx.os);
        let _ = writeln!(out, "- Shell: {}", ctx.shell);
        let _ = writeln!(out, "- Architecture: {}", ctx.arch);
        let _ = writeln!(out, "- User: {}", ctx.user);
        let _ = writeln!(out, "- Working directory: {}", ctx.working_dir);

        let runtimes = ctx.tools.runtimes();
        if !runtimes.is_empty() {
            out.push_str("\nLANGUAGE RUNTIMES:\n");
            for runtime in runtimes {
                let _ = writeln!(out, "- {} ({})", runtime.name, runtime.version);
            }
        }

        let mut listed_any = false;
        for category in ToolCategory::ALL {
            if category == ToolCategory::Languages {
                continue;
            }
            let tools = ctx.tools.tools(category);
            if tools.is_empty() {
                continue;
            }
            if !listed_any {
                out.push_str("\nAVAILABLE TOOLS:\n");
                listed_any = true;
            }
            let shown: Vec<&str> = tools
                .iter()
                .take(MAX_TOOLS_PER_CATEGORY)
                .map(String::as_str)
                .collect();
            let more = tools.len().saturating_sub(shown.len());
            let _ = write!(out, "- {}: {}", category.title(), shown.join(", "));
            if more > 0 {
                let _ = write!(out, " (+{more} more)");
            }
            out.push('\n');
        }

        out.push_str("\nRULES:\n");
        out.push_str("1. Prefer tools that are listed as available.\n");
        out.push_str("2. Produce exactly one command; chain steps with && or pipes if needed.\n");
        out.push_str("3. Never wrap the answer in markdown or code fences.\n");
        out.push_str(safety_instruction(safety));
        out.push('\n');

        out.push_str("\nREPLY FORMAT:\n");
        match self.style {
            PromptStyle::Structured => {
                out.push_str("COMMAND: <the command>\n");
                out.push_str("EXPLANATION: <one sentence, only if asked>\n");
                out.push_str("DANGER_LEVEL: <safe|low|medium|high|critical>\n");
                out.push_str("DANGER_REASON: <why that level>\n");
            }
            PromptStyle::Inline { explain: true } => {
                out.push_str("<the command> || <one sentence explanation>\n");
                out.push_str("Everything on one line, nothing else.\n");
            }
            PromptStyle::Inline { explain: false } => {
                out.push_str("Only the command on one line, nothing else.\n");
            }
        }
        out
    }

    fn user_prompt(&self, request: &CommandRequest) -> String {
        let ctx = &request.context;
        let mut out = String::new();
        let _ = writeln!(out, "Request: {}", request.query.trim());
        let _ = writeln!(out, "Current directory: {}", ctx.system.working_dir);

        if !ctx.history.is_empty() {
            out.push_str("Recent commands:\n");
            for entry in &ctx.history {
                let _ = writeln!(out, "  {}", entry.command);
            }
        }

        if let Some(hint) = ctx.user_hint.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            let _ = writeln!(out, "Note: {hint}");
        }

        if self.style == PromptStyle::Structured {
            if request.options.include_explanation {
                out.push_str("Include an EXPLANATION line.\n");
            } else {
                out.push_str("Omit the EXPLANATION line.\n");
            }
        }
        out
    }
}

fn safety_instruction(level: SafetyLevel) -> &'static str {
    match level {
        SafetyLevel::Strict => {
            "4. Never produce destructive, privileged or irreversible commands; \
             if the request needs one, produce a read-only command that previews the effect instead."
        }
        SafetyLevel::Moderate => {
            "4. Prefer the least destructive command that does the job and avoid sudo unless required."
        }
        SafetyLevel::Permissive => "4. Produce exactly what was asked; the user reviews every command.",
    }
}
