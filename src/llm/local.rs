//! Self-hosted, OpenAI-compatible endpoints (Ollama, LM Studio, vLLM).

use super::openai::{ChatReply, chat_body, read_chat_reply};
use super::parse;
use super::{AdapterSettings, CommandRequest, CommandResponse, Provider, ProviderInfo, Vendor, standard_limits};
use crate::error::ProviderError;
use crate::http_client::HttpClient;
use crate::prompt::{PromptBuilder, PromptPair, PromptStyle};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct LocalProvider {
    settings: AdapterSettings,
    http: Arc<dyn HttpClient>,
}

impl LocalProvider {
    /// `settings.base_url` is the server's OpenAI-compatible root, e.g.
    /// `http://localhost:11434/v1`.
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
        let mut headers = vec![("Content-Type", "application/json")];
        if !self.settings.api_key.is_empty() {
            headers.push(("Authorization", auth.as_str()));
        }
        let body = chat_body(&self.settings.model, max_tokens, temperature, prompt);

        debug!("POST {} (model {})", url, self.settings.model);
        let response = self.http.post_json(&url, &headers, &body, cancel).await?;
        read_chat_reply(&response, Vendor::Local)
    }
}

#[async_trait]
impl Provider for LocalProvider {
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
        metadata.insert("endpoint".to_string(), self.settings.base_url.clone());
        ProviderInfo {
            name: Vendor::Local.as_str().to_string(),
            version: "openai-compatible".to_string(),
            models: vec![self.settings.model.clone()],
            capabilities: vec!["generate".into(), "explain".into(), "offline".into()],
            limits: standard_limits(self.settings.max_tokens),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::MockHttpClient;
    use crate::llm::test_support::{sample_request, settings};
    use serde_json::json;

    fn completion(content: &str) -> String {
        json!({
            "model": "llama3.1:8b",
            "choices": [{ "message": { "content": content }, "finish_reason": "stop" }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_no_auth_header_without_key() {
        let mock = Arc::new(MockHttpClient::new(200, &completion("ls")));
        let mut s = settings("http://localhost:11434/v1", "llama3.1:8b");
        s.api_key.clear();
        let response = LocalProvider::new(s, mock.clone())
            .generate_command(&sample_request("list", false), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.command, "ls");
        assert_eq!(response.usage.total, 0);
        let request = mock.last_request();
        assert_eq!(request.url, "http://localhost:11434/v1/chat/completions");
        assert!(!request.headers.iter().any(|(k, _)| k == "Authorization"));
        assert_eq!(request.body["model"], "llama3.1:8b");
    }

    #[tokio::test]
    async fn test_bearer_sent_when_key_present() {
        let mock = Arc::new(MockHttpClient::new(200, &completion("ls")));
        let s = settings("http://gpu-box:8000/v1", "mistral-7b");
        LocalProvider::new(s, mock.clone())
            .generate_command(&sample_request("list", false), &CancellationToken::new())
            .await
            .unwrap();
        let request = mock.last_request();
        assert!(request.headers.contains(&("Authorization".to_string(), "Bearer test-key".to_string())));
    }

    #[test]
    fn test_info_reports_configured_model() {
        let mock = Arc::new(MockHttpClient::new(200, "{}"));
        let info = LocalProvider::new(settings("http://localhost:1234/v1", "qwen2.5-coder"), mock).info();
        assert_eq!(info.models, vec!["qwen2.5-coder".to_string()]);
        assert!(info.capabilities.contains(&"offline".to_string()));
    }
}
