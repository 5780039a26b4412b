//! Vendor-neutral LLM contract and the per-vendor adapters behind it.
//!
//! Every adapter turns a [`CommandRequest`] into one HTTPS call and the reply
//! into a [`CommandResponse`]. Adding a vendor means adding a model
//! allowlist, a wire schema, auth headers, a response grammar and a
//! stop-reason map; nothing outside this module changes.

pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod local;
pub mod openai;
pub mod parse;

use crate::context::SystemContext;
use crate::danger::DangerLevel;
use crate::error::ProviderError;
use crate::history::HistoryEntry;
use crate::http_client::HttpResponse;
use crate::safety;
use parse::ParsedCommand;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// Supported LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    OpenAi,
    Anthropic,
    Gemini,
    Local,
}

const OPENAI_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-4",
    "gpt-3.5-turbo",
    "o1-mini",
    "o3-mini",
];

const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-5-sonnet-20240620",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

const GEMINI_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
    "gemini-pro",
];

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::OpenAi => "openai",
            Vendor::Anthropic => "anthropic",
            Vendor::Gemini => "gemini",
            Vendor::Local => "local",
        }
    }

    /// Model allowlist. Empty for `local`, which accepts any model name.
    pub fn models(&self) -> &'static [&'static str] {
        match self {
            Vendor::OpenAi => OPENAI_MODELS,
            Vendor::Anthropic => ANTHROPIC_MODELS,
            Vendor::Gemini => GEMINI_MODELS,
            Vendor::Local => &[],
        }
    }

    pub fn accepts_model(&self, model: &str) -> bool {
        match self {
            Vendor::Local => !model.trim().is_empty(),
            _ => self.models().contains(&model),
        }
    }

    /// Hosted vendors need a credential; self-hosted ones need an endpoint.
    pub fn is_hosted(&self) -> bool {
        !matches!(self, Vendor::Local)
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Vendor::OpenAi),
            "anthropic" => Ok(Vendor::Anthropic),
            "gemini" | "google" => Ok(Vendor::Gemini),
            "local" => Ok(Vendor::Local),
            other => Err(format!(
                "unknown provider '{other}' (supported: openai, anthropic, gemini, google, local)"
            )),
        }
    }
}

/// How careful the model is told to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Strict,
    #[default]
    Moderate,
    Permissive,
}

/// Everything the model gets to know besides the query.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub system: SystemContext,
    pub history: Vec<HistoryEntry>,
    pub user_hint: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub include_explanation: bool,
    pub safety_level: SafetyLevel,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            temperature: 0.1,
            include_explanation: false,
            safety_level: SafetyLevel::Moderate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub query: String,
    pub context: RequestContext,
    pub options: RequestOptions,
}

impl CommandRequest {
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.query.trim().is_empty() {
            return Err(ProviderError::invalid_input("query must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }
}

/// One candidate command plus the vendor's metadata about it.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub command: String,
    pub explanation: Option<String>,
    pub alternatives: Vec<String>,
    pub confidence: f64,
    /// The vendor's self-assessment. The danger engine has the final say.
    pub danger_level: DangerLevel,
    pub danger_reason: String,
    pub warnings: Vec<String>,
    pub usage: TokenUsage,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProviderLimits {
    pub max_tokens: u32,
    pub max_history: u32,
    pub timeout_seconds: u32,
}

/// Static description of a provider instance.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub version: String,
    pub models: Vec<String>,
    pub capabilities: Vec<String>,
    pub limits: ProviderLimits,
    pub metadata: BTreeMap<String, String>,
}

/// The uniform contract every vendor adapter implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Produces one candidate command for `request`.
    async fn generate_command(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandResponse, ProviderError>;

    /// Explains what `command` does; the explanation lands in `explanation`.
    async fn explain_command(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResponse, ProviderError>;

    fn info(&self) -> ProviderInfo;
}

/// Generation settings shared by every adapter, taken from the profile.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub base_url: String,
}

impl AdapterSettings {
    /// Request options override the profile, but never exceed its token cap.
    pub fn effective_max_tokens(&self, options: &RequestOptions) -> u32 {
        options.max_tokens.min(self.max_tokens).max(1)
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

impl CommandResponse {
    /// Builds a response from parsed model text.
    ///
    /// Warnings always come from the substring scan. When the vendor gave no
    /// self-assessment, the level is the one the scan implies.
    pub(crate) fn from_parsed(
        parsed: ParsedCommand,
        confidence: f64,
        usage: TokenUsage,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self, ProviderError> {
        let command = parsed.command.trim().to_string();
        if command.is_empty() {
            return Err(ProviderError::model("no command found in the model response"));
        }

        let warnings = safety::scan_command(&command);
        let (danger_level, danger_reason) = match parsed.danger_level {
            Some(level) => (level, parsed.danger_reason.unwrap_or_default()),
            None if warnings.is_empty() => (DangerLevel::Safe, "no warnings from the safety scan".to_string()),
            None => (safety::implied_level(&warnings), warnings.join("; ")),
        };

        Ok(Self {
            command,
            explanation: parsed.explanation,
            alternatives: Vec::new(),
            confidence,
            danger_level,
            danger_reason,
            warnings,
            usage,
            metadata,
        })
    }

    /// Response to an explain call: the command echoed back with the model's text.
    pub(crate) fn explained(
        command: &str,
        explanation: String,
        confidence: f64,
        usage: TokenUsage,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let warnings = safety::scan_command(command);
        Self {
            command: command.to_string(),
            explanation: Some(explanation),
            alternatives: Vec::new(),
            confidence,
            danger_level: safety::implied_level(&warnings),
            danger_reason: warnings.join("; "),
            warnings,
            usage,
            metadata,
        }
    }
}

pub(crate) fn standard_limits(max_tokens: u32) -> ProviderLimits {
    ProviderLimits {
        max_tokens,
        max_history: 50,
        timeout_seconds: crate::http_client::REQUEST_TIMEOUT.as_secs() as u32,
    }
}

/// Maps a non-2xx vendor response onto a [`ProviderError`].
///
/// Every supported vendor nests its error under `error`, with the kind in
/// `type` (OpenAI, Anthropic) or `status` (Gemini), an optional string
/// `code` (OpenAI) and a human `message`.
/// Bodies that are not JSON fall back to the status mapping.
pub(crate) fn error_from_response(response: &HttpResponse) -> ProviderError {
    let envelope: Option<serde_json::Value> = serde_json::from_str(&response.body).ok();
    let error = envelope.as_ref().and_then(|v| v.get("error"));

    let field = |key: &str| error.and_then(|e| e.get(key)).and_then(|v| v.as_str());
    let vendor_type = field("type").or_else(|| field("status"));
    let vendor_code = field("code");
    let message = field("message").or_else(|| error.and_then(|e| e.as_str()));

    ProviderError::from_vendor_envelope(response.status, vendor_type, vendor_code, message)
}

pub(crate) fn require_text(text: Option<&str>, vendor: Vendor) -> Result<String, ProviderError> {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(ProviderError::model(format!("{vendor} returned an empty response"))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_parsing_and_aliases() {
        assert_eq!("google".parse::<Vendor>().unwrap(), Vendor::Gemini);
        assert_eq!("OpenAI".parse::<Vendor>().unwrap(), Vendor::OpenAi);
        assert!("cohere".parse::<Vendor>().is_err());
    }

    #[test]
    fn test_allowlists() {
        assert!(Vendor::OpenAi.accepts_model("gpt-4o-mini"));
        assert!(!Vendor::OpenAi.accepts_model("gpt-5-ultra"));
        assert!(Vendor::Local.accepts_model("anything:7b"));
        assert!(!Vendor::Local.accepts_model(" "));
        assert!(Vendor::Gemini.is_hosted());
        assert!(!Vendor::Local.is_hosted());
    }

    #[test]
    fn test_effective_max_tokens_is_capped_by_profile() {
        let s = test_support::settings("https://x", "gpt-4o");
        let mut options = RequestOptions::default();
        options.max_tokens = 2000;
        assert_eq!(s.effective_max_tokens(&options), 500);
        options.max_tokens = 100;
        assert_eq!(s.effective_max_tokens(&options), 100);
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        let s = test_support::settings("https://api.example.com/v1/", "gpt-4o");
        assert_eq!(s.endpoint("/chat/completions"), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_from_parsed_falls_back_to_scan_level() {
        let parsed = ParsedCommand {
            command: "sudo rm -rf build".into(),
            ..ParsedCommand::default()
        };
        let response =
            CommandResponse::from_parsed(parsed, 0.9, TokenUsage::new(1, 2), BTreeMap::new()).unwrap();
        assert_eq!(response.danger_level, DangerLevel::Medium);
        assert!(!response.warnings.is_empty());
        assert_eq!(response.usage.total, 3);
    }

    #[test]
    fn test_from_parsed_keeps_vendor_level() {
        let parsed = ParsedCommand {
            command: "ls".into(),
            danger_level: Some(DangerLevel::Low),
            danger_reason: Some("lists".into()),
            ..ParsedCommand::default()
        };
        let response =
            CommandResponse::from_parsed(parsed, 0.9, TokenUsage::default(), BTreeMap::new()).unwrap();
        assert_eq!(response.danger_level, DangerLevel::Low);
        assert_eq!(response.danger_reason, "lists");
        assert!(response.warnings.is_empty());
    }

    #[test]
    fn test_from_parsed_rejects_blank_command() {
        let err = CommandResponse::from_parsed(
            ParsedCommand::default(),
            0.9,
            TokenUsage::default(),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Model);
    }

    #[test]
    fn test_error_envelopes() {
        let response = HttpResponse {
            status: 429,
            body: r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#.into(),
        };
        let err = error_from_response(&response);
        assert_eq!(err.kind, crate::error::ErrorKind::RateLimit);
        assert_eq!(err.message, "slow down");

        let response = HttpResponse {
            status: 400,
            body: r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#.into(),
        };
        assert_eq!(error_from_response(&response).kind, crate::error::ErrorKind::InvalidInput);

        let response = HttpResponse {
            status: 401,
            body: r#"{"error":{"message":"Incorrect API key provided: sk-test.","type":"invalid_request_error","param":null,"code":"invalid_api_key"}}"#.into(),
        };
        let err = error_from_response(&response);
        assert_eq!(err.kind, crate::error::ErrorKind::Auth);
        assert_eq!(err.message, "Incorrect API key provided: sk-test.");

        let response = HttpResponse {
            status: 502,
            body: "<html>bad gateway</html>".into(),
        };
        let err = error_from_response(&response);
        assert_eq!(err.kind, crate::error::ErrorKind::Model);
        assert_eq!(err.message, "HTTP 502");
    }

    #[test]
    fn test_empty_query_is_invalid_input() {
        let request = test_support::sample_request("   ", false);
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }
}
