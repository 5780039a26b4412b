//! Rendering of generation and explanation results.
//!
//! Plain output is for people; JSON output is a stable object for scripts.

use crate::config::OutputFormat;
use crate::danger::{DangerAssessment, DangerLevel};
use crate::llm::{CommandResponse, TokenUsage};
use anyhow::Result;
use serde::Serialize;
use std::fmt::Write as _;

/// Everything known about one generated command.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub query: String,
    pub profile: String,
    pub provider: String,
    pub response: CommandResponse,
    /// Engine verdict; authoritative for gating.
    pub assessment: DangerAssessment,
}

impl GenerationReport {
    /// Model that answered, falling back to what the profile asked for.
    pub fn model(&self) -> &str {
        self.response
            .metadata
            .get("model")
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// The vendor claimed a lower level than the engine found.
    pub fn vendor_understated(&self) -> bool {
        self.response.danger_level < self.assessment.level
    }
}

#[derive(Serialize)]
struct VendorAssessmentView<'a> {
    level: DangerLevel,
    reason: &'a str,
}

#[derive(Serialize)]
struct ReportView<'a> {
    query: &'a str,
    command: &'a str,
    explanation: Option<&'a str>,
    danger: &'a DangerAssessment,
    vendor_assessment: VendorAssessmentView<'a>,
    warnings: &'a [String],
    confidence: f64,
    usage: TokenUsage,
    provider: &'a str,
    profile: &'a str,
    model: &'a str,
}

#[derive(Serialize)]
struct ExplanationView<'a> {
    command: &'a str,
    explanation: &'a str,
    danger: &'a DangerAssessment,
    usage: TokenUsage,
    provider: &'a str,
    model: &'a str,
}

pub fn render(report: &GenerationReport, format: OutputFormat, verbose: bool) -> Result<String> {
    match format {
        OutputFormat::Plain => Ok(render_plain(report, verbose)),
        OutputFormat::Json => render_json(report),
    }
}

pub fn render_json(report: &GenerationReport) -> Result<String> {
    let response = &report.response;
    let view = ReportView {
        query: &report.query,
        command: &response.command,
        explanation: response.explanation.as_deref(),
        danger: &report.assessment,
        vendor_assessment: VendorAssessmentView {
            level: response.danger_level,
            reason: &response.danger_reason,
        },
        warnings: &response.warnings,
        confidence: response.confidence,
        usage: response.usage,
        provider: &report.provider,
        profile: &report.profile,
        model: report.model(),
    };
    Ok(serde_json::to_string_pretty(&view)?)
}

pub fn render_plain(report: &GenerationReport, verbose: bool) -> String {
    let response = &report.response;
    let assessment = &report.assessment;
    let mut out = String::new();

    let _ = writeln!(out, "💡 {}", response.command);

    if let Some(explanation) = response.explanation.as_deref().filter(|e| !e.trim().is_empty()) {
        let _ = writeln!(out, "\n📝 {}", explanation.trim());
    }

    if assessment.level > DangerLevel::Safe {
        let _ = writeln!(
            out,
            "\n{} Danger: {} ({})",
            assessment.level.emoji(),
            assessment.level,
            assessment.reason
        );
        for factor in &assessment.factors {
            let _ = writeln!(out, "   • {}", factor);
        }
        for mitigation in &assessment.mitigations {
            let _ = writeln!(out, "   💡 {}", mitigation);
        }
    }

    if report.vendor_understated() {
        let _ = writeln!(
            out,
            "   (model rated it {}: {})",
            response.danger_level,
            if response.danger_reason.is_empty() { "no reason given" } else { &response.danger_reason }
        );
    }

    if !response.warnings.is_empty() {
        let _ = writeln!(out);
        for warning in &response.warnings {
            let _ = writeln!(out, "⚠️  {}", warning);
        }
    }

    if verbose {
        let _ = writeln!(
            out,
            "\n🤖 {} / {} via profile '{}' (confidence {:.2}, tokens {} in + {} out = {})",
            report.provider,
            report.model(),
            report.profile,
            response.confidence,
            response.usage.prompt,
            response.usage.completion,
            response.usage.total
        );
    }

    out
}

/// Renders the result of `forgor explain`.
pub fn render_explanation(
    command: &str,
    response: &CommandResponse,
    assessment: &DangerAssessment,
    provider: &str,
    format: OutputFormat,
) -> Result<String> {
    let explanation = response.explanation.as_deref().unwrap_or("").trim();
    let model = response.metadata.get("model").map(String::as_str).unwrap_or("unknown");

    match format {
        OutputFormat::Json => {
            let view = ExplanationView {
                command,
                explanation,
                danger: assessment,
                usage: response.usage,
                provider,
                model,
            };
            Ok(serde_json::to_string_pretty(&view)?)
        }
        OutputFormat::Plain => {
            let mut out = String::new();
            let _ = writeln!(out, "🔍 {}", command);
            let _ = writeln!(out, "\n{}", explanation);
            let _ = writeln!(out, "\n{} Danger: {}", assessment.level.emoji(), assessment.level);
            for factor in &assessment.factors {
                let _ = writeln!(out, "   • {}", factor);
            }
            Ok(out)
        }
    }
}
