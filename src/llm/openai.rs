//! OpenAI chat-completions adapter.
//!
//! The wire helpers here are shared with the self-hosted adapter, which
//! speaks the same protocol.

use super::parse::{self, FinishReason};
use super::{
    AdapterSettings, CommandRequest, CommandResponse, Provider, ProviderInfo, TokenUsage, Vendor,
    error_from_response, require_text, standard_limits,
};
use crate::error::ProviderError;
use crate::http_client::{HttpClient, HttpResponse};
use crate::prompt::{PromptBuilder, PromptPair, PromptStyle};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// First choice text plus what the response says about how it ended.
pub(crate) struct ChatReply {
    pub text: String,
    pub finish: FinishReason,
    pub usage: TokenUsage,
    pub metadata: BTreeMap<String, String>,
}

pub(crate) fn chat_body(model: &str, max_tokens: u32, temperature: f32, prompt: &PromptPair) -> serde_json::Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "messages": [
            { "role": "system", "content": prompt.system },
            { "role": "user", "content": prompt.user }
        ]
    })
}

pub(crate) fn finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

/// Decodes a chat-completions response, mapping error envelopes first.
pub(crate) fn read_chat_reply(response: &HttpResponse, vendor: Vendor) -> Result<ChatReply, ProviderError> {
    if !response.is_success() {
        return Err(error_from_response(response));
    }

    let completion: ChatCompletion = serde_json::from_str(&response.body).map_err(|e| {
        ProviderError::model(format!("{vendor} returned an unreadable response")).with_source(e)
    })?;

    let choice = completion.choices.first();
    let text = require_text(choice.and_then(|c| c.message.content.as_deref()), vendor)?;
    let raw_finish = choice.and_then(|c| c.finish_reason.clone());

    let usage = completion
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    let mut metadata = BTreeMap::new();
    if let Some(id) = completion.id {
        metadata.insert("id".to_string(), id);
    }
    if let Some(model) = completion.model {
        metadata.insert("model".to_string(), model);
    }
    if let Some(reason) = &raw_finish {
        metadata.insert("finish_reason".to_string(), reason.clone());
    }

    Ok(ChatReply {
        text,
        finish: finish_reason(raw_finish.as_deref()),
        usage,
        metadata,
    })
}

pub struct OpenAiProvider {
    settings: AdapterSettings,
    http: Arc<dyn HttpClient>,
}

impl OpenAiProvider {
    pub fn new(settings: AdapterSettings, http: Arc<dyn HttpClient>) -> Self {
        Self { settings, http }
    }

    async fn send(
        &self,
        prompt: &PromptPair,
        max_tokens: u32,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<ChatReply, ProviderError> {
        let url = self.settings.endpoint("chat/completions");
        let auth = format!("Bearer {}", self.settings.api_key);
        let headers = [("Authorization", auth.as_str()), ("Content-Type", "application/json")];
        let body = chat_body(&self.settings.model, max_tokens, temperature, prompt);

        debug!("POST {} (model {})", url, self.settings.model);
        let response = self.http.post_json(&url, &headers, &body, cancel).await?;
        read_chat_reply(&response, Vendor::OpenAi)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn generate_command(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandResponse, ProviderError> {
        request.validate()?;
        let explain = request.options.include_explanation;
        let prompt = PromptBuilder::new(PromptStyle::Inline { explain }).build(request);

        let reply = self
            .send(
                &prompt,
                self.settings.effective_max_tokens(&request.options),
                request.options.temperature,
                cancel,
            )
            .await?;

        let parsed = parse::parse_inline(&reply.text, explain);
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
        let prompt = PromptBuilder::new(PromptStyle::Inline { explain: true }).build_explain(command);
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
        metadata.insert("base_url".to_string(), self.settings.base_url.clone());
        ProviderInfo {
            name: Vendor::OpenAi.as_str().to_string(),
            version: "v1".to_string(),
            models: Vendor::OpenAi.models().iter().map(|m| m.to_string()).collect(),
            capabilities: vec!["generate".into(), "explain".into()],
            limits: standard_limits(self.settings.max_tokens),
            metadata,
        }
    }
}
