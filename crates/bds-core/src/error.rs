// ── Core error types ──
//
// Service-level errors from bds-core. Transport details stay in
// `bds_api::Error`; the `From` impls below translate them into variants a
// host application can act on.

use bds_api::ApiErrorEnvelope;
use bds_config::ConfigError;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach backend at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("{component} used before initialisation")]
    NotInitialised { component: &'static str },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// Backend error code, or the HTTP status for non-custom errors.
        code: Option<String>,
        status: Option<u16>,
        /// `true` when the backend sent its own error object.
        custom: bool,
    },

    // ── Configuration / storage errors ───────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// HTTP status of the failed call, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. }) || self.status() == Some(404)
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<bds_api::Error> for CoreError {
    fn from(err: bds_api::Error) -> Self {
        match err {
            bds_api::Error::Transport(ref e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::ConnectionFailed {
                        url: e.url().map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                        custom: false,
                    }
                }
            }
            bds_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            bds_api::Error::InvalidHeader(msg) => CoreError::Config {
                message: format!("Invalid header: {msg}"),
            },
            bds_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            bds_api::Error::Api(envelope) => from_envelope(&envelope),
            bds_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            bds_api::Error::HubConnect(reason)
            | bds_api::Error::HubHandshake(reason)
            | bds_api::Error::HubClosed { reason }
            | bds_api::Error::HubProtocol(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("Hub: {reason}"),
            },
        }
    }
}

fn from_envelope(envelope: &ApiErrorEnvelope) -> CoreError {
    if matches!(envelope.status, 401 | 403) && !envelope.custom {
        return CoreError::AuthenticationFailed {
            message: envelope.to_string(),
        };
    }
    CoreError::Api {
        message: envelope
            .error_message
            .clone()
            .or_else(|| envelope.developer_message.clone())
            .unwrap_or_else(|| envelope.to_string()),
        code: envelope.error_code.clone(),
        status: Some(envelope.status),
        custom: envelope.custom,
    }
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Keyring(_) | ConfigError::Io(_) => CoreError::Storage {
                message: err.to_string(),
            },
            other => CoreError::Config {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn api_error(status: u16, custom: bool) -> bds_api::Error {
        bds_api::Error::Api(Box::new(ApiErrorEnvelope {
            error_code: Some(if custom { "BDS_X".into() } else { status.to_string() }),
            error_message: Some("nope".into()),
            developer_message: None,
            status,
            custom,
        }))
    }

    #[test]
    fn plain_401_is_authentication_failure() {
        let err: CoreError = api_error(401, false).into();
        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    }

    #[test]
    fn custom_errors_keep_their_code() {
        let err: CoreError = api_error(400, true).into();
        match err {
            CoreError::Api { code, status, custom, message } => {
                assert_eq!(code.as_deref(), Some("BDS_X"));
                assert_eq!(status, Some(400));
                assert!(custom);
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn not_found_status_is_detected() {
        let err: CoreError = api_error(404, false).into();
        assert!(err.is_not_found());
    }

    #[test]
    fn io_failures_are_storage_errors() {
        let err: CoreError = ConfigError::Io(std::io::Error::other("disk")).into();
        assert!(matches!(err, CoreError::Storage { .. }));
    }
}
