//! Transport layer for the BDS client SDK.
//!
//! - [`gateway`]: async HTTP client with default headers, credential
//!   injection and error-envelope normalization.
//! - [`hub`]: the real-time hub. One persistent connection multiplexes many
//!   subscription keys and fans server events out to listeners.
//! - [`schedule`]: timer abstraction driving hub retries.
//! - [`transport`]: shared TLS/timeout settings for `reqwest` clients.

pub mod error;
pub mod gateway;
pub mod hub;
pub mod schedule;
mod tls;
pub mod transport;

pub use error::{ApiErrorEnvelope, Error};
pub use gateway::{
    ApiClient, ApiResponse, CredentialProvider, ErrorSink, GatewaySettings, RequestOptions,
    TracingErrorSink,
};
pub use hub::{HubEvent, HubMultiplexer, HubState, HubTransport, WebSocketHubTransport};
pub use schedule::{ReconnectPolicy, Scheduler, TokioScheduler};
pub use transport::{TlsMode, TransportConfig};
