//! Google Gemini `generateContent` adapter.

use super::parse::{self, FinishReason};
use super::{
    AdapterSettings, CommandRequest, CommandResponse, Provider, ProviderInfo, TokenUsage, Vendor,
    error_from_response, require_text, standard_limits,
};
use crate::error::ProviderError;
use crate::http_client::{HttpClient, redact_query};
use crate::prompt::{PromptBuilder, PromptPair, PromptStyle};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

struct Reply {
    text: String,
    finish: FinishReason,
    usage: TokenUsage,
    metadata: BTreeMap<String, String>,
}

fn finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") => FinishReason::ContentFilter,
        Some("RECITATION") => FinishReason::Recitation,
        _ => FinishReason::Other,
    }
}

pub struct GeminiProvider {
    settings: AdapterSettings,
    http: Arc<dyn HttpClient>,
}

impl GeminiProvider {
    pub fn new(settings: AdapterSettings, http: Arc<dyn HttpClient>) -> Self {
        Self { settings, http }
    }

    fn request_body(&self, prompt: &PromptPair, max_tokens: u32, temperature: f32) -> serde_json::Value {
        let safety_settings: Vec<serde_json::Value> = HARM_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": "BLOCK_ONLY_HIGH" }))
            .collect();

        json!({
            "systemInstruction": { "parts": [{ "text": prompt.system }] },
            "contents": [
                { "role": "user", "parts": [{ "text": prompt.user }] }
            ],
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": temperature
            },
            "safetySettings": safety_settings
        })
    }

    async fn send(
        &self,
        prompt: &PromptPair,
        max_tokens: u32,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<Reply, ProviderError> {
        let url = format!(
            "{}?key={}",
            self.settings
                .endpoint(&format!("models/{}:generateContent", self.settings.model)),
            self.settings.api_key
        );
        let headers = [("Content-Type", "application/json")];
        let body = self.request_body(prompt, max_tokens, temperature);

        debug!("POST {} (model {})", redact_query(&url), self.settings.model);
        let response = self.http.post_json(&url, &headers, &body, cancel).await?;
        if !response.is_success() {
            return Err(error_from_response(&response));
        }

        let generated: GenerateResponse = serde_json::from_str(&response.body).map_err(|e| {
            ProviderError::model("gemini returned an unreadable response").with_source(e)
        })?;

        if let Some(reason) = generated.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref()) {
            return Err(ProviderError::safety(format!("prompt blocked by gemini: {reason}")).with_code(reason));
        }

        let candidate = generated.candidates.first();
        let raw_finish = candidate.and_then(|c| c.finish_reason.clone());
        let text: String = candidate
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() && raw_finish.as_deref() == Some("SAFETY") {
            return Err(ProviderError::safety("response withheld by gemini safety filters").with_code("SAFETY"));
        }
        let text = require_text(Some(text.as_str()), Vendor::Gemini)?;

        let usage = generated
            .usage_metadata
            .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();

        let mut metadata = BTreeMap::new();
        if let Some(version) = generated.model_version {
            metadata.insert("model".to_string(), version);
        }
        if let Some(reason) = &raw_finish {
            metadata.insert("finish_reason".to_string(), reason.clone());
        }

        Ok(Reply {
            text,
            finish: finish_reason(raw_finish.as_deref()),
            usage,
            metadata,
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
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
        metadata.insert("safety_threshold".to_string(), "BLOCK_ONLY_HIGH".to_string());
        ProviderInfo {
            name: Vendor::Gemini.as_str().to_string(),
            version: "v1beta".to_string(),
            models: Vendor::Gemini.models().iter().map(|m| m.to_string()).collect(),
            capabilities: vec!["generate".into(), "explain".into()],
            limits: standard_limits(self.settings.max_tokens),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::http_client::ReqwestHttpClient;
    use crate::http_client::tests::MockHttpClient;
    use crate::llm::test_support::{sample_request, settings};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generated(text: &str, finish: &str) -> String {
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": finish
            }],
            "usageMetadata": { "promptTokenCount": 90, "candidatesTokenCount": 9, "totalTokenCount": 99 },
            "modelVersion": "gemini-1.5-flash-002"
        })
        .to_string()
    }

    fn provider(mock: Arc<MockHttpClient>) -> GeminiProvider {
        GeminiProvider::new(settings(DEFAULT_BASE_URL, "gemini-1.5-flash"), mock)
    }

    #[tokio::test]
    async fn test_generate_builds_vendor_schema() {
        let mock = Arc::new(MockHttpClient::new(200, &generated("du -sh * || sizes of entries", "STOP")));
        let response = provider(mock.clone())
            .generate_command(&sample_request("folder sizes", true), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.command, "du -sh *");
        assert_eq!(response.explanation.as_deref(), Some("sizes of entries"));
        assert_eq!(response.usage, TokenUsage::new(90, 9));

        let request = mock.last_request();
        assert_eq!(
            request.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent?key=test-key"
        );
        assert!(request.body["systemInstruction"]["parts"][0]["text"].is_string());
        assert_eq!(request.body["generationConfig"]["maxOutputTokens"], 500);
        let safety = request.body["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), 4);
        assert!(safety.iter().all(|s| s["threshold"] == "BLOCK_ONLY_HIGH"));
    }

    #[tokio::test]
    async fn test_finish_reasons_map_to_confidence() {
        for (finish, expected) in [("STOP", 0.9), ("MAX_TOKENS", 0.7), ("RECITATION", 0.4), ("OTHER", 0.5)] {
            let mock = Arc::new(MockHttpClient::new(200, &generated("ls", finish)));
            let response = provider(mock)
                .generate_command(&sample_request("ls", false), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(response.confidence, expected, "finish reason {finish}");
        }
    }

    #[tokio::test]
    async fn test_prompt_block_is_safety_error() {
        let body = json!({ "promptFeedback": { "blockReason": "SAFETY" } }).to_string();
        let mock = Arc::new(MockHttpClient::new(200, &body));
        let err = provider(mock)
            .generate_command(&sample_request("x", false), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Safety);
        assert_eq!(err.code.as_deref(), Some("SAFETY"));
    }

    #[tokio::test]
    async fn test_empty_safety_candidate_is_safety_error() {
        let body = json!({ "candidates": [{ "finishReason": "SAFETY" }] }).to_string();
        let mock = Arc::new(MockHttpClient::new(200, &body));
        let err = provider(mock)
            .generate_command(&sample_request("x", false), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Safety);
    }

    #[tokio::test]
    async fn test_invalid_key_envelope() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
        let mock = Arc::new(MockHttpClient::new(400, body));
        let err = provider(mock)
            .generate_command(&sample_request("x", false), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert!(err.message.starts_with("API key not valid"));
    }

    #[tokio::test]
    async fn test_resource_exhausted_is_quota() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let mock = Arc::new(MockHttpClient::new(429, body));
        let err = provider(mock)
            .generate_command(&sample_request("x", false), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Quota);
    }

    #[tokio::test]
    async fn test_against_http_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(generated("uname -a", "STOP")))
            .mount(&server)
            .await;

        let base = format!("{}/v1beta", server.uri());
        let provider = GeminiProvider::new(settings(&base, "gemini-1.5-pro"), Arc::new(ReqwestHttpClient::new()));
        let response = provider
            .generate_command(&sample_request("kernel version", false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.command, "uname -a");
    }
}
