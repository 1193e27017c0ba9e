// Injection points for the gateway: where normalized errors go and where
// the session credentials come from.

use crate::error::ApiErrorEnvelope;

/// Receives every reportable gateway error.
///
/// The host application typically forwards these to its own UI; the
/// default sink only logs.
pub trait ErrorSink: Send + Sync {
    fn report(&self, context: &str, error: &ApiErrorEnvelope);
}

/// Default sink: logs the envelope through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, context: &str, error: &ApiErrorEnvelope) {
        tracing::error!(
            context,
            status = error.status,
            code = error.error_code.as_deref().unwrap_or(""),
            developer_message = error.developer_message.as_deref().unwrap_or(""),
            "{}",
            error.error_message.as_deref().unwrap_or("request failed")
        );
    }
}

/// Supplies the `Authorization` header value for authenticated calls.
pub trait CredentialProvider: Send + Sync {
    /// Full header value, e.g. `"Bearer eyJ..."`, or `None` when signed out.
    fn authorization(&self) -> Option<String>;
}
