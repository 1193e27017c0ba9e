use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the `bds-api` crate.
///
/// Covers every failure mode of the transport layer: HTTP gateway,
/// backend error envelopes, and the real-time hub connection.
/// `bds-core` maps these into service-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A header name or value could not be encoded.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    // ── Backend ─────────────────────────────────────────────────────
    /// Normalized error envelope for any non-2xx response.
    #[error("API error: {0}")]
    Api(Box<ApiErrorEnvelope>),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Hub ─────────────────────────────────────────────────────────
    /// The hub transport could not be opened.
    #[error("Hub connection failed: {0}")]
    HubConnect(String),

    /// The hub rejected the protocol handshake.
    #[error("Hub handshake rejected: {0}")]
    HubHandshake(String),

    /// The hub connection was closed by the server.
    #[error("Hub closed: {reason}")]
    HubClosed { reason: String },

    /// A hub frame could not be encoded or decoded.
    #[error("Hub protocol error: {0}")]
    HubProtocol(String),
}

impl Error {
    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(envelope) => Some(envelope.status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` when the backend refused the credentials (401/403).
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::HubConnect(_) | Self::HubClosed { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The normalized envelope, for errors that came back from the backend.
    pub fn envelope(&self) -> Option<&ApiErrorEnvelope> {
        match self {
            Self::Api(envelope) => Some(envelope),
            _ => None,
        }
    }
}

// ── ApiErrorEnvelope ─────────────────────────────────────────────────

/// Normalized error shape handed to error sinks and returned to callers.
///
/// When the backend answers with its own `{errorCode, errorMessage,
/// developerMessage}` body the envelope is *custom*; otherwise it is built
/// from the HTTP status line and the raw body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorEnvelope {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub developer_message: Option<String>,

    /// HTTP status of the underlying response.
    #[serde(skip)]
    pub status: u16,

    /// `true` when the body was a backend-defined error object.
    #[serde(skip)]
    pub custom: bool,
}

impl ApiErrorEnvelope {
    /// Build an envelope from a response status and raw body.
    pub fn from_response(status: reqwest::StatusCode, body: &str) -> Self {
        if let Ok(mut envelope) = serde_json::from_str::<Self>(body) {
            if envelope.error_code.is_some() {
                envelope.status = status.as_u16();
                envelope.custom = true;
                return envelope;
            }
        }

        Self {
            error_code: Some(status.as_u16().to_string()),
            error_message: status.canonical_reason().map(String::from),
            developer_message: (!body.is_empty()).then(|| body.to_owned()),
            status: status.as_u16(),
            custom: false,
        }
    }
}

impl fmt::Display for ApiErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.error_code.as_deref().unwrap_or("unknown");
        let message = self
            .error_message
            .as_deref()
            .or(self.developer_message.as_deref())
            .unwrap_or("no message");
        write!(f, "HTTP {} [{code}] {message}", self.status)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn custom_envelope_keeps_backend_fields() {
        let body = concat!(
            r#"{"errorCode":"USR_LOCKED","errorMessage":"Locked","#,
            r#""developerMessage":"too many attempts"}"#,
        );
        let env = ApiErrorEnvelope::from_response(StatusCode::BAD_REQUEST, body);

        assert!(env.custom);
        assert_eq!(env.status, 400);
        assert_eq!(env.error_code.as_deref(), Some("USR_LOCKED"));
        assert_eq!(env.developer_message.as_deref(), Some("too many attempts"));
    }

    #[test]
    fn plain_body_falls_back_to_status_line() {
        let env = ApiErrorEnvelope::from_response(StatusCode::SERVICE_UNAVAILABLE, "upstream down");

        assert!(!env.custom);
        assert_eq!(env.error_code.as_deref(), Some("503"));
        assert_eq!(env.error_message.as_deref(), Some("Service Unavailable"));
        assert_eq!(env.developer_message.as_deref(), Some("upstream down"));
    }

    #[test]
    fn json_without_error_code_is_not_custom() {
        let env = ApiErrorEnvelope::from_response(StatusCode::NOT_FOUND, r#"{"title":"nope"}"#);
        assert!(!env.custom);
        assert_eq!(env.error_code.as_deref(), Some("404"));
    }

    #[test]
    fn auth_rejection_matches_401_and_403() {
        for (status, expected) in [(401, true), (403, true), (500, false)] {
            let err = Error::Api(Box::new(ApiErrorEnvelope {
                status,
                ..ApiErrorEnvelope::default()
            }));
            assert_eq!(err.is_auth_rejection(), expected, "status {status}");
        }
        assert!(!Error::HubConnect("refused".into()).is_auth_rejection());
    }
}
