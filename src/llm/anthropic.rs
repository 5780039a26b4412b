//! Anthropic messages adapter.
//!
//! The only vendor that answers in the structured grammar, so it is also the
//! only one that reports its own danger level.

use super::parse::{self, FinishReason};
use super::{
    AdapterSettings, CommandRequest, CommandResponse, Provider, ProviderInfo, TokenUsage, Vendor,
    error_from_response, require_text, standard_limits,
};
use crate::error::ProviderError;
use crate::http_client::HttpClient;
use crate::prompt::{PromptBuilder, PromptPair, PromptStyle};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

struct Reply {
    text: String,
    finish: FinishReason,
    usage: TokenUsage,
    metadata: BTreeMap<String, String>,
}

fn stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

pub struct AnthropicProvider {
    settings: AdapterSettings,
    http: Arc<dyn HttpClient>,
}

impl AnthropicProvider {
    pub fn new(settings: AdapterSettings, http: Arc<dyn HttpClient>) -> Self {
        Self { settings, http }
    }

    async fn send(
        &self,
        prompt: &PromptPair,
        max_tokens: u32,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<Reply, ProviderError> {
        let url = self.settings.endpoint("messages");
        let headers = [
            ("x-api-key", self.settings.api_key.as_str()),
            ("anthropic-version", API_VERSION),
            ("content-type", "application/json"),
        ];
        let body = json!({
            "model": self.settings.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "system": prompt.system,
            "messages": [
                { "role": "user", "content": prompt.user }
            ]
        });

        debug!("POST {} (model {})", url, self.settings.model);
        let response = self.http.post_json(&url, &headers, &body, cancel).await?;
        if !response.is_success() {
            return Err(error_from_response(&response));
        }

        let message: MessagesResponse = serde_json::from_str(&response.body).map_err(|e| {
            ProviderError::model("anthropic returned an unreadable response").with_source(e)
        })?;

        let text = require_text(
            message.content.first().and_then(|block| block.text.as_deref()),
            Vendor::Anthropic,
        )?;

        let usage = message
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        let mut metadata = BTreeMap::new();
        if let Some(id) = message.id {
            metadata.insert("id".to_string(), id);
        }
        if let Some(model) = message.model {
            metadata.insert("model".to_string(), model);
        }
        if let Some(reason) = &message.stop_reason {
            metadata.insert("stop_reason".to_string(), reason.clone());
        }

        Ok(Reply {
            text,
            finish: stop_reason(message.stop_reason.as_deref()),
            usage,
            metadata,
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn generate_command(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandResponse, ProviderError> {
        request.validate()?;
        let prompt = PromptBuilder::new(PromptStyle::Structured).build(request);
        let reply = self
            .send(
                &prompt,
                self.settings.effective_max_tokens(&request.options),
                request.options.temperature,
                cancel,
            )
            .await?;

        let mut parsed = parse::parse_structured(&reply.text);
        if !request.options.include_explanation {
            parsed.explanation = None;
        }
        CommandResponse::from_parsed(parsed, parse::confidence_for(reply.finish), reply.usage, reply.metadata)
    }

    async fn explain_command(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResponse, ProviderError> {
        if command.trim().is_empty() {
            return Err(ProviderError::invalid_input("command to explain must not be empty"));
        }
        let prompt = PromptBuilder::new(PromptStyle::Structured).build_explain(command);
        let reply = self
            .send(&prompt, self.settings.max_tokens, self.settings.temperature, cancel)
            .await?;
        Ok(CommandResponse::explained(
            command,
            reply.text,
            parse::confidence_for(reply.finish),
            reply.usage,
            reply.metadata,
        ))
    }

    fn info(&self) -> ProviderInfo {
        let mut metadata = BTreeMap::new();
        metadata.insert("model".to_string(), self.settings.model.clone());
        metadata.insert("api_version".to_string(), API_VERSION.to_string());
        ProviderInfo {
            name: Vendor::Anthropic.as_str().to_string(),
            version: API_VERSION.to_string(),
            models: Vendor::Anthropic.models().iter().map(|m| m.to_string()).collect(),
            capabilities: vec!["generate".into(), "explain".into(), "danger_assessment".into()],
            limits: standard_limits(self.settings.max_tokens),
            metadata,
        }
    }
}
