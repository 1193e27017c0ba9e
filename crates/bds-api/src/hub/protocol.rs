// JSON hub protocol codec.
//
// Frames are JSON objects terminated by the ASCII record separator (0x1E).
// A single WebSocket text message may carry several frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::transport::{HubEvent, HubInvocation};
use crate::error::Error;

pub const RECORD_SEPARATOR: char = '\u{1e}';

const PROTOCOL: &str = "json";
const PROTOCOL_VERSION: u32 = 1;

// ── Frame types ──────────────────────────────────────────────────────

const TYPE_INVOCATION: u8 = 1;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    Invocation(HubEvent),
    Ping,
    Close { error: Option<String> },
    /// Completions, stream items and other frame types the client ignores.
    Ignored(u8),
}

#[derive(Serialize)]
struct HandshakeRequest {
    protocol: &'static str,
    version: u32,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct OutboundInvocation<'a> {
    #[serde(rename = "type")]
    kind: u8,
    target: &'a str,
    arguments: &'a [Value],
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

// ── Handshake ────────────────────────────────────────────────────────

/// The framed handshake request sent right after the socket opens.
pub fn handshake_request() -> Result<String, Error> {
    let body = serde_json::to_string(&HandshakeRequest {
        protocol: PROTOCOL,
        version: PROTOCOL_VERSION,
    })
    .map_err(|e| Error::HubProtocol(e.to_string()))?;
    Ok(format!("{body}{RECORD_SEPARATOR}"))
}

/// Parse the server's handshake response.
///
/// Returns whatever followed the handshake frame in the same message, since
/// servers may piggyback the first invocations on it.
pub fn parse_handshake_response(text: &str) -> Result<&str, Error> {
    let (head, rest) = text
        .split_once(RECORD_SEPARATOR)
        .ok_or_else(|| Error::HubHandshake("incomplete handshake response".into()))?;

    let response: HandshakeResponse = serde_json::from_str(head)
        .map_err(|e| Error::HubHandshake(format!("malformed handshake: {e}")))?;

    match response.error {
        Some(error) => Err(Error::HubHandshake(error)),
        None => Ok(rest),
    }
}

// ── Frames ───────────────────────────────────────────────────────────

/// Encode an outbound invocation as a fire-and-forget frame.
pub fn encode_invocation(invocation: &HubInvocation) -> Result<String, Error> {
    let arguments = invocation.arguments();
    let body = serde_json::to_string(&OutboundInvocation {
        kind: TYPE_INVOCATION,
        target: invocation.method_name(),
        arguments: &arguments,
    })
    .map_err(|e| Error::HubProtocol(e.to_string()))?;
    Ok(format!("{body}{RECORD_SEPARATOR}"))
}

pub fn encode_ping() -> String {
    format!("{{\"type\":{TYPE_PING}}}{RECORD_SEPARATOR}")
}

/// Decode every frame in a text message. Malformed frames fail the whole
/// message; the caller decides whether to drop or close.
pub fn decode_frames(text: &str) -> Result<Vec<HubFrame>, Error> {
    text.split(RECORD_SEPARATOR)
        .filter(|chunk| !chunk.trim().is_empty())
        .map(decode_frame)
        .collect()
}

fn decode_frame(chunk: &str) -> Result<HubFrame, Error> {
    let raw: RawFrame = serde_json::from_str(chunk).map_err(|e| Error::HubProtocol(e.to_string()))?;

    Ok(match raw.kind {
        TYPE_INVOCATION => {
            let target = raw
                .target
                .ok_or_else(|| Error::HubProtocol("invocation without target".into()))?;
            HubFrame::Invocation(HubEvent {
                name: target,
                arguments: raw.arguments,
            })
        }
        TYPE_PING => HubFrame::Ping,
        TYPE_CLOSE => HubFrame::Close { error: raw.error },
        other => HubFrame::Ignored(other),
    })
}
