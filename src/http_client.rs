//! HTTP client abstraction for talking to LLM vendors.
//!
//! Provider adapters never touch `reqwest` directly; they go through the
//! [`HttpClient`] trait so tests can substitute a canned response and so the
//! deadline and cancellation rules live in one place.

use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Total deadline for one vendor request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Status code and raw body of a vendor response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for HTTP communication with external APIs.
///
/// # Example
///
/// ```ignore
/// use forgor::http_client::{HttpClient, ReqwestHttpClient};
/// use tokio_util::sync::CancellationToken;
///
/// let client = ReqwestHttpClient::new();
/// let response = client.post_json(
///     "https://api.example.com/endpoint",
///     &[("content-type", "application/json")],
///     &serde_json::json!({"key": "value"}),
///     &CancellationToken::new(),
/// ).await?;
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body.
    ///
    /// Non-2xx statuses are returned as a normal [`HttpResponse`]; only
    /// transport failures, the deadline and cancellation produce an error.
    ///
    /// # Errors
    ///
    /// * [`ErrorKind::Network`](crate::error::ErrorKind::Network) when the request never
    ///   produced a response
    /// * [`ErrorKind::Timeout`](crate::error::ErrorKind::Timeout) when the deadline passed or
    ///   `cancel` fired first
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ProviderError>;
}

/// HTTP client implementation using reqwest.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Creates a client with the 30-second total deadline.
    pub fn new() -> Self {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ProviderError> {
        let mut request = self.client.post(url);

        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let exchange = async {
            let response = request.json(body).send().await.map_err(map_transport_error)?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(map_transport_error)?;
            Ok::<_, ProviderError>(HttpResponse { status, body })
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Request to {} cancelled by caller", redact_query(url));
                Err(ProviderError::timeout("request cancelled"))
            }
            result = exchange => result,
        }
    }
}

/// reqwest errors print the request URL, which carries the Gemini key, so
/// it is stripped before the error becomes a cause.
fn map_transport_error(err: reqwest::Error) -> ProviderError {
    let err = err.without_url();
    if err.is_timeout() {
        ProviderError::timeout(format!(
            "request timed out after {}s",
            REQUEST_TIMEOUT.as_secs()
        ))
        .with_source(err)
    } else {
        let what = if err.is_connect() {
            "could not connect to the provider"
        } else if err.is_body() || err.is_decode() {
            "connection dropped while reading the response"
        } else {
            "request failed before a response arrived"
        };
        ProviderError::network(what).with_source(err)
    }
}

/// Drops the query string so API keys passed as `?key=` never reach the logs.
pub fn redact_query(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A request captured by [`MockHttpClient`].
    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub body: serde_json::Value,
    }

    /// Mock HTTP client returning a predetermined response.
    pub struct MockHttpClient {
        response: Mutex<Result<HttpResponse, ProviderError>>,
        pub requests: Mutex<Vec<RecordedRequest>>,
    }

    impl MockHttpClient {
        pub fn new(status: u16, body: &str) -> Self {
            Self {
                response: Mutex::new(Ok(HttpResponse {
                    status,
                    body: body.to_string(),
                })),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(error: ProviderError) -> Self {
            Self {
                response: Mutex::new(Err(error)),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn last_request(&self) -> RecordedRequest {
            self.requests.lock().unwrap().last().cloned().expect("no request recorded")
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &serde_json::Value,
            cancel: &CancellationToken,
        ) -> Result<HttpResponse, ProviderError> {
            self.requests.lock().unwrap().push(RecordedRequest {
                url: url.to_string(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: body.clone(),
            });
            if cancel.is_cancelled() {
                return Err(ProviderError::timeout("request cancelled"));
            }
            match &*self.response.lock().unwrap() {
                Ok(response) => Ok(response.clone()),
                Err(e) => Err(ProviderError::new(e.kind, e.message.clone())),
            }
        }
    }

    #[test]
    fn test_is_success_range() {
        assert!(HttpResponse { status: 200, body: String::new() }.is_success());
        assert!(!HttpResponse { status: 429, body: String::new() }.is_success());
    }

    #[test]
    fn test_redact_query_strips_key() {
        assert_eq!(
            redact_query("https://host/v1beta/models/m:generateContent?key=secret"),
            "https://host/v1beta/models/m:generateContent"
        );
        assert_eq!(redact_query("https://host/v1/messages"), "https://host/v1/messages");
    }

    #[tokio::test]
    async fn test_transport_error_chain_hides_query_key() {
        let client = ReqwestHttpClient::with_timeout(Duration::from_secs(5));
        let result = client
            .post_json(
                "http://127.0.0.1:9/v1beta/models/m:generateContent?key=SECRET123",
                &[],
                &serde_json::json!({}),
                &CancellationToken::new(),
            )
            .await;

        let err = result.unwrap_err();
        let mut chain = err.to_string();
        let mut cause: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(&err);
        while let Some(e) = cause {
            chain.push_str(&format!(": {e}"));
            cause = e.source();
        }
        assert!(!chain.contains("SECRET123"), "key leaked: {chain}");
        assert!(!chain.contains("generateContent"));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_before_response() {
        let client = ReqwestHttpClient::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Port 9 (discard) is never answered; the cancelled branch must win.
        let result = client
            .post_json("http://127.0.0.1:9/", &[], &serde_json::json!({}), &cancel)
            .await;

        let err = result.unwrap_err();
        assert!(
            err.kind == crate::error::ErrorKind::Timeout || err.kind == crate::error::ErrorKind::Network
        );
    }
}
