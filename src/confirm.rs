//! Confirmation gating before a generated command runs.
//!
//! [`decide`] turns the engine verdict and the command-line flags into one of
//! three outcomes; [`ConfirmUI`] asks the question when the outcome is
//! [`Decision::Prompt`].

use crate::danger::{DangerAssessment, DangerLevel};
use anyhow::Result;
use std::io::{self, BufRead, Write};
use tracing::info;

/// Flags and settings that influence whether a command runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunPolicy {
    /// `-c`: offer to run the command.
    pub confirm: bool,
    /// `-R`: run without asking, except for critical commands.
    pub force_run: bool,
    /// `--allow-critical`: lets force-run skip the prompt for critical commands too.
    pub allow_critical: bool,
    /// `output.confirm_before_run` from the config file.
    pub confirm_before_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Print the command and stop.
    DisplayOnly,
    /// Run without asking.
    Run,
    /// Ask first.
    Prompt,
}

/// Gating rules, in order:
///
/// 1. Neither `confirm` nor `force_run`: display only.
/// 2. Critical commands always prompt, unless both `force_run` and
///    `allow_critical` are set.
/// 3. `force_run` runs everything else.
/// 4. `confirm` prompts when `confirm_before_run` is on or the level is
///    above [`DangerLevel::Safe`]; a safe command with prompting disabled
///    runs directly.
pub fn decide(level: DangerLevel, policy: &RunPolicy) -> Decision {
    if !policy.confirm && !policy.force_run {
        return Decision::DisplayOnly;
    }
    if level == DangerLevel::Critical && !(policy.force_run && policy.allow_critical) {
        return Decision::Prompt;
    }
    if policy.force_run {
        return Decision::Run;
    }
    if policy.confirm_before_run || level > DangerLevel::Safe {
        Decision::Prompt
    } else {
        Decision::Run
    }
}

/// Terminal dialogs around running a command.
pub struct ConfirmUI {
    verbose: bool,
}

impl ConfirmUI {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Asks whether to run `command`. Only `y` or `yes` (any case) accepts;
    /// anything else, including end of input, declines.
    pub fn prompt_to_run_with_io<R: BufRead, W: Write>(
        &self,
        command: &str,
        assessment: &DangerAssessment,
        input: &mut R,
        output: &mut W,
    ) -> Result<bool> {
        if assessment.level >= DangerLevel::High {
            self.show_danger_with_io(assessment, output)?;
        }

        write!(output, "\n▶️  Run `{}`? [y/N]: ", command)?;
        output.flush()?;

        let mut line = String::new();
        let read = input.read_line(&mut line)?;
        if read == 0 {
            writeln!(output)?;
            info!("No answer on input, not running the command");
            return Ok(false);
        }

        let accepted = matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes");
        info!("User {} the command", if accepted { "accepted" } else { "declined" });
        Ok(accepted)
    }

    /// Prints the level, factors and mitigations of a risky command.
    pub fn show_danger_with_io<W: Write>(&self, assessment: &DangerAssessment, output: &mut W) -> Result<()> {
        writeln!(output, "\n{}", "=".repeat(60))?;
        writeln!(
            output,
            "{} DANGER LEVEL: {}",
            assessment.level.emoji(),
            assessment.level.as_str().to_uppercase()
        )?;
        writeln!(output, "{}", "=".repeat(60))?;
        if !assessment.reason.is_empty() {
            writeln!(output, "📝 {}", assessment.reason)?;
        }
        if !assessment.factors.is_empty() {
            writeln!(output)?;
            writeln!(output, "⚠️  Risk factors:")?;
            for factor in &assessment.factors {
                writeln!(output, "   • {}", factor)?;
            }
        }
        if !assessment.mitigations.is_empty() {
            writeln!(output)?;
            writeln!(output, "💡 Before running:")?;
            for mitigation in &assessment.mitigations {
                writeln!(output, "   • {}", mitigation)?;
            }
        }
        if self.verbose {
            writeln!(output, "\n   (engine confidence {:.2})", assessment.confidence)?;
        }
        writeln!(output, "{}", "-".repeat(60))?;
        Ok(())
    }

    pub fn show_cancelled_with_io<W: Write>(&self, output: &mut W) -> Result<()> {
        writeln!(output, "❌ Cancelled. The command was not executed.")?;
        Ok(())
    }

    /// Stdin/stdout wrapper around [`Self::prompt_to_run_with_io`].
    pub fn prompt_to_run(&self, command: &str, assessment: &DangerAssessment) -> Result<bool> {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stderr();
        self.prompt_to_run_with_io(command, assessment, &mut input, &mut output)
    }

    pub fn show_danger(&self, assessment: &DangerAssessment) {
        let _ = self.show_danger_with_io(assessment, &mut io::stderr());
    }

    pub fn show_cancelled(&self) {
        let _ = self.show_cancelled_with_io(&mut io::stderr());
    }
}
