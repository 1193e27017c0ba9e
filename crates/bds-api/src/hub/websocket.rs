//! WebSocket hub transport.
//!
//! Opens the hub endpoint over WebSocket, performs the JSON protocol
//! handshake and then runs a pump task that shuttles frames between the
//! socket and the [`HubSession`] channels. The pump exits (closing the
//! inbound channel) when the server closes, the socket errors, or the
//! session's shutdown token is cancelled.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::protocol::{self, HubFrame};
use super::transport::{HubEvent, HubInvocation, HubSession, HubTransport};
use crate::error::Error;
use crate::tls;
use crate::transport::{TlsMode, TransportConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── WebSocketHubTransport ────────────────────────────────────────────

/// Production [`HubTransport`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketHubTransport {
    /// Upper bound for socket open + protocol handshake. Default: 15s.
    pub handshake_timeout: Duration,
    /// Interval between keep-alive pings. Default: 15s.
    pub keep_alive: Duration,
    /// Certificate checks for `wss` endpoints.
    pub tls: TlsMode,
}

impl Default for WebSocketHubTransport {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(15),
            keep_alive: Duration::from_secs(15),
            tls: TlsMode::System,
        }
    }
}

impl WebSocketHubTransport {
    /// Same TLS mode as the HTTP gateway built from `config`.
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            tls: config.tls.clone(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl HubTransport for WebSocketHubTransport {
    async fn start(&self, url: Url, access_token: Option<String>) -> Result<HubSession, Error> {
        let ws_url = websocket_url(url, access_token.as_deref())?;
        tracing::info!(url = %redact_token(&ws_url), "Connecting to hub");

        let connector = tls::client_config(&self.tls)?.map(Connector::Rustls);
        let timeout = self.handshake_timeout;
        let (write, read, leftover) = tokio::time::timeout(timeout, open(&ws_url, connector))
            .await
            .map_err(|_| Error::HubConnect(format!("handshake timed out after {timeout:?}")))??;

        tracing::info!("Hub connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        // A close sent with the handshake reply fails the attempt, so the
        // caller waits its retry delay instead of reconnecting at once.
        if !forward_frames(&leftover, &inbound_tx) {
            return Err(Error::HubClosed {
                reason: "closed with the handshake response".into(),
            });
        }
        tokio::spawn(pump(
            write,
            read,
            outbound_rx,
            inbound_tx,
            shutdown.clone(),
            self.keep_alive,
        ));

        Ok(HubSession {
            outbound: outbound_tx,
            inbound: inbound_rx,
            shutdown,
        })
    }
}

// ── Connection setup ─────────────────────────────────────────────────

/// Rewrite `http(s)` to `ws(s)` and attach the access token.
pub fn websocket_url(mut url: Url, access_token: Option<&str>) -> Result<Url, Error> {
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => "",
        other => return Err(Error::HubConnect(format!("unsupported hub scheme: {other}"))),
    };
    if !scheme.is_empty() {
        url.set_scheme(scheme)
            .map_err(|()| Error::HubConnect(format!("cannot switch {url} to {scheme}")))?;
    }
    if let Some(token) = access_token {
        url.query_pairs_mut().append_pair("access_token", token);
    }
    Ok(url)
}

fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "access_token" { "***".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

/// Open the socket and complete the handshake. Returns the split stream and
/// any frames that arrived in the same message as the handshake response.
async fn open(
    url: &Url,
    connector: Option<Connector>,
) -> Result<(SplitSink<WsStream, Message>, SplitStream<WsStream>, String), Error> {
    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::HubConnect(e.to_string()))?;

    let request = ClientRequestBuilder::new(uri);
    let (ws_stream, _response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| Error::HubConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::text(protocol::handshake_request()?))
        .await
        .map_err(|e| Error::HubConnect(e.to_string()))?;

    let leftover = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                break protocol::parse_handshake_response(&text)?.to_owned();
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(Error::HubClosed {
                    reason: frame.map_or_else(
                        || "closed during handshake".into(),
                        |f| f.reason.to_string(),
                    ),
                });
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(Error::HubHandshake("binary handshake response".into()));
            }
            // Ping/Pong/raw frames before the handshake reply
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::HubConnect(e.to_string())),
            None => {
                return Err(Error::HubClosed {
                    reason: "stream ended during handshake".into(),
                });
            }
        }
    };

    Ok((write, read, leftover))
}

// ── Pump ─────────────────────────────────────────────────────────────

async fn pump(
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    mut outbound: mpsc::UnboundedReceiver<HubInvocation>,
    inbound: mpsc::UnboundedSender<HubEvent>,
    shutdown: CancellationToken,
    keep_alive: Duration,
) {
    let mut ping = tokio::time::interval(keep_alive);
    ping.tick().await;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                // Flush queued invocations (a final Disconnect) before closing.
                while let Ok(invocation) = outbound.try_recv() {
                    if let Ok(frame) = protocol::encode_invocation(&invocation) {
                        let _ = write.send(Message::text(frame)).await;
                    }
                }
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !forward_frames(&text, &inbound) {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "Hub close frame received"
                            );
                        } else {
                            tracing::info!("Hub close frame received (no payload)");
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Hub socket error");
                        break;
                    }
                    None => {
                        tracing::info!("Hub stream ended");
                        break;
                    }
                    // Binary, Ping, Pong, Frame
                    Some(Ok(_)) => {}
                }
            }
            invocation = outbound.recv() => {
                let Some(invocation) = invocation else { break };
                match protocol::encode_invocation(&invocation) {
                    Ok(frame) => {
                        if let Err(e) = write.send(Message::text(frame)).await {
                            tracing::warn!(
                                error = %e,
                                method = invocation.method_name(),
                                "Hub send failed"
                            );
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Dropping unencodable hub invocation"),
                }
            }
            _ = ping.tick() => {
                if write.send(Message::text(protocol::encode_ping())).await.is_err() {
                    break;
                }
            }
        }
    }

    shutdown.cancel();
    tracing::debug!("Hub pump exiting");
}

/// Forward decoded invocations to the session. Returns `false` when the
/// server asked to close.
fn forward_frames(text: &str, inbound: &mpsc::UnboundedSender<HubEvent>) -> bool {
    let frames = match protocol::decode_frames(text) {
        Ok(frames) => frames,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to decode hub message");
            return true;
        }
    };

    for frame in frames {
        match frame {
            HubFrame::Invocation(event) => {
                // Receiver gone means the multiplexer is tearing down.
                let _ = inbound.send(event);
            }
            HubFrame::Close { error } => {
                tracing::info!(error = error.as_deref().unwrap_or(""), "Hub requested close");
                return false;
            }
            HubFrame::Ping => tracing::trace!("Hub ping"),
            HubFrame::Ignored(kind) => tracing::trace!(kind, "Ignoring hub frame"),
        }
    }
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn https_becomes_wss_with_token() {
        let url = Url::parse("https://api.example.com/hubs/bds?appId=a&deviceId=d").unwrap();
        let ws = websocket_url(url, Some("tok")).unwrap();
        assert_eq!(
            ws.as_str(),
            "wss://api.example.com/hubs/bds?appId=a&deviceId=d&access_token=tok"
        );
    }

    #[test]
    fn http_becomes_ws_without_token() {
        let url = Url::parse("http://localhost:5000/hubs/bds?appId=a").unwrap();
        let ws = websocket_url(url, None).unwrap();
        assert_eq!(ws.scheme(), "ws");
        assert!(!ws.as_str().contains("access_token"));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let url = Url::parse("ftp://example.com/hubs/bds").unwrap();
        assert!(matches!(websocket_url(url, None), Err(Error::HubConnect(_))));
    }

    #[test]
    fn token_is_redacted_for_logs() {
        let url = Url::parse("wss://h/hubs/bds?appId=a&access_token=secret").unwrap();
        let shown = redact_token(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("appId=a"));
    }

    #[test]
    fn close_frame_stops_forwarding() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let text = "{\"type\":1,\"target\":\"A\",\"arguments\":[]}\u{1e}{\"type\":7}\u{1e}";
        assert!(!forward_frames(text, &tx));
        assert_eq!(rx.try_recv().unwrap().name, "A");
    }

    #[test]
    fn malformed_message_is_skipped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(forward_frames("not json\u{1e}", &tx));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_with_handshake_response_fails_the_attempt() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _handshake = ws.next().await;
            ws.send(Message::text("{}\u{1e}{\"type\":7,\"error\":\"bye\"}\u{1e}"))
                .await
                .unwrap();
            let _ = ws.next().await;
        });

        let url = Url::parse(&format!("http://{addr}/hubs/bds")).unwrap();
        let result = WebSocketHubTransport::default().start(url, None).await;

        assert!(matches!(result, Err(Error::HubClosed { .. })));
        server.abort();
    }

    #[test]
    fn transport_config_tls_reaches_the_hub() {
        let config = TransportConfig {
            tls: TlsMode::DangerAcceptInvalid,
            ..TransportConfig::default()
        };
        assert_eq!(WebSocketHubTransport::new(&config).tls, TlsMode::DangerAcceptInvalid);
    }
}
