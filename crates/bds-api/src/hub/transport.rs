// Hub transport contract: what the multiplexer needs from a real-time link.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Messages ─────────────────────────────────────────────────────────

/// Outbound control message sent to the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum HubInvocation {
    /// Join the logical channel named by the key.
    Connect(String),
    /// Leave the logical channel named by the key.
    Disconnect(String),
    /// Relay an application message to a channel.
    Message {
        key: String,
        method: String,
        payload: Value,
    },
}

impl HubInvocation {
    /// Hub method this invocation targets.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "Connect",
            Self::Disconnect(_) => "Disconnect",
            Self::Message { .. } => "Message",
        }
    }

    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::Connect(key) | Self::Disconnect(key) => vec![Value::String(key.clone())],
            Self::Message { key, method, payload } => vec![
                Value::String(key.clone()),
                Value::String(method.clone()),
                payload.clone(),
            ],
        }
    }
}

/// Named event pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct HubEvent {
    pub name: String,
    pub arguments: Vec<Value>,
}

impl HubEvent {
    pub fn new(name: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// String argument at `index`, if present.
    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).and_then(Value::as_str)
    }

    /// Deserialize the argument at `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Option<T> {
        self.arguments
            .get(index)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

// ── Session ──────────────────────────────────────────────────────────

/// A live hub connection, as handed to the multiplexer.
///
/// The inbound channel closing is the disconnect signal. Cancelling
/// `shutdown` tears the underlying link down.
#[derive(Debug)]
pub struct HubSession {
    pub outbound: mpsc::UnboundedSender<HubInvocation>,
    pub inbound: mpsc::UnboundedReceiver<HubEvent>,
    pub shutdown: CancellationToken,
}

/// Opens hub connections. Implemented over WebSocket in production and by
/// in-memory fakes in tests.
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Open a connection and complete the protocol handshake.
    async fn start(&self, url: Url, access_token: Option<String>) -> Result<HubSession, Error>;
}

/// Supplies the access token at every (re)connect attempt.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

impl<F> AccessTokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn access_token(&self) -> Option<String> {
        self()
    }
}

/// Hub endpoint for an application: `{server}hubs/bds?appId=..&deviceId=..`.
pub fn hub_url(server_url: &Url, app_id: &str, device_id: &str) -> Result<Url, Error> {
    let mut url = server_url.join("hubs/bds")?;
    url.query_pairs_mut()
        .append_pair("appId", app_id)
        .append_pair("deviceId", device_id);
    Ok(url)
}
