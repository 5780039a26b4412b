//! Provider error taxonomy.
//!
//! Everything that crosses the provider boundary (validation, HTTP, parsing,
//! vendor-side refusals) is reported as a [`ProviderError`] carrying one of
//! nine [`ErrorKind`]s, a human message, an optional vendor error code and an
//! optional underlying cause.

use serde::Serialize;
use std::fmt;

/// Category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    RateLimit,
    Quota,
    Network,
    Timeout,
    InvalidInput,
    Model,
    Safety,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Quota => "quota",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Model => "model",
            ErrorKind::Safety => "safety",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by every provider operation.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub code: Option<String>,
    #[source]
    source: Option<BoxError>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            source: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Model, message)
    }

    pub fn safety(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Safety, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Attaches the vendor's own error code or type string.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Maps a vendor error envelope onto the common taxonomy.
    pub fn from_vendor(status: u16, vendor_type: Option<&str>, message: Option<&str>) -> Self {
        Self::from_vendor_envelope(status, vendor_type, None, message)
    }

    /// Like [`ProviderError::from_vendor`], also consulting the vendor's `code`.
    ///
    /// The code is more specific than the type, so a recognised code wins,
    /// then a recognised type, then the HTTP status. A 401/403 reported under
    /// a generic request-error type is still an auth failure. An empty
    /// message falls back to `HTTP <status>`.
    pub fn from_vendor_envelope(
        status: u16,
        vendor_type: Option<&str>,
        vendor_code: Option<&str>,
        message: Option<&str>,
    ) -> Self {
        let vendor_type = vendor_type.filter(|t| !t.is_empty());
        let vendor_code = vendor_code.filter(|c| !c.is_empty());

        let kind = match vendor_code
            .and_then(kind_from_vendor_type)
            .or_else(|| vendor_type.and_then(kind_from_vendor_type))
        {
            Some(ErrorKind::InvalidInput) if matches!(status, 401 | 403) => ErrorKind::Auth,
            Some(kind) => kind,
            None => kind_from_status(status),
        };

        let message = match message.map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => format!("HTTP {status}"),
        };

        let error = Self::new(kind, message);
        match vendor_code.or(vendor_type) {
            Some(code) => error.with_code(code),
            None => error,
        }
    }
}

fn kind_from_vendor_type(vendor_type: &str) -> Option<ErrorKind> {
    let t = vendor_type.to_ascii_lowercase();
    let table: &[(&[&str], ErrorKind)] = &[
        (&["invalid_request", "invalid_argument"], ErrorKind::InvalidInput),
        (
            &["authentication", "permission", "unauthenticated", "invalid_api_key"],
            ErrorKind::Auth,
        ),
        (&["rate_limit"], ErrorKind::RateLimit),
        (&["quota", "resource_exhausted"], ErrorKind::Quota),
        (
            &["overloaded", "server_error", "api_error", "internal", "unavailable"],
            ErrorKind::Model,
        ),
        (&["content_filter", "safety"], ErrorKind::Safety),
    ];

    table
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| t.contains(n)))
        .map(|(_, kind)| *kind)
}

fn kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 404 | 422 => ErrorKind::InvalidInput,
        401 | 403 => ErrorKind::Auth,
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimit,
        500..=599 => ErrorKind::Model,
        _ => ErrorKind::Unknown,
    }
}
