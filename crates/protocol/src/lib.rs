//! Live channel WebSocket protocol definitions.
//!
//! Protocol version 1. All communication uses JSON frames over a single
//! WebSocket connection, multiplexing every channel the client has open.
//!
//! Frame types:
//! - `RequestFrame`: client → server RPC call (connect, subscribe, publish)
//! - `ResponseFrame`: server → client RPC result
//! - `EventFrame`: server → client push (publication, join, leave)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576; // 1 MB
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // 10s
pub const REQUEST_TIMEOUT_MS: u64 = 10_000; // 10s
pub const PING_INTERVAL_MS: u64 = 25_000; // 25s

// ── Methods and events ───────────────────────────────────────────────────────

pub mod methods {
    pub const CONNECT: &str = "connect";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const PUBLISH: &str = "publish";
    pub const PRESENCE: &str = "presence";
}

pub mod events {
    pub const PUBLICATION: &str = "publication";
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";
    /// Server dropped a subscription on its side (channel closed, permission revoked).
    pub const UNSUBSCRIBED: &str = "unsubscribed";
}

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const UNKNOWN_CHANNEL: &str = "UNKNOWN_CHANNEL";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
}

// ── Error shape ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: None,
        }
    }
}

impl std::fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Client → server RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub r#type: String, // always "req"
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RequestFrame {
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            r#type: "req".into(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Server → client RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub r#type: String, // always "res"
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            r#type: "res".into(),
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            r#type: "res".into(),
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Server → client push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub r#type: String, // always "event"
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: serde_json::Value, seq: u64) -> Self {
        Self {
            r#type: "event".into(),
            event: event.into(),
            payload: Some(payload),
            seq: Some(seq),
        }
    }
}

/// Discriminated union of every frame the server can send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "res")]
    Response(ResponseFrameInner),
    #[serde(rename = "event")]
    Event(EventFrameInner),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrameInner {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl From<ResponseFrameInner> for ResponseFrame {
    fn from(inner: ResponseFrameInner) -> Self {
        Self {
            r#type: "res".into(),
            id: inner.id,
            ok: inner.ok,
            payload: inner.payload,
            error: inner.error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrameInner {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

// ── Connect handshake ────────────────────────────────────────────────────────

/// Parameters sent by the client in the initial `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "minProtocol")]
    pub min_protocol: u32,
    #[serde(rename = "maxProtocol")]
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(rename = "userAgent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    #[serde(rename = "instanceId", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Sent by the server after a successful handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloOk {
    pub r#type: String, // always "hello-ok"
    pub protocol: u32,
    pub server: ServerInfo,
    #[serde(rename = "pingIntervalMs", default = "default_ping_interval")]
    pub ping_interval_ms: u64,
}

fn default_ping_interval() -> u64 {
    PING_INTERVAL_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    #[serde(rename = "connId")]
    pub conn_id: String,
}

// ── Channel payloads ─────────────────────────────────────────────────────────

/// Params for `subscribe`, `unsubscribe` and `presence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelParams {
    pub channel: String,
}

/// Params for `publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishParams {
    pub channel: String,
    pub data: serde_json::Value,
}

/// A participant on a presence-enabled channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPresence {
    pub user: String,
    pub client: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Result payload of `presence`: connected participants keyed by client id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceResult {
    #[serde(default)]
    pub clients: HashMap<String, ClientPresence>,
}

/// Payload of a `publication` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationPayload {
    pub channel: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// Payload of `join` / `leave` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    pub channel: String,
    pub info: ClientPresence,
}

/// Payload of an `unsubscribed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribedPayload {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn server_frame_dispatches_on_type_tag() {
        let res: ServerFrame = serde_json::from_value(json!({
            "type": "res",
            "id": "1",
            "ok": false,
            "error": { "code": "UNKNOWN_CHANNEL", "message": "no such channel" }
        }))
        .unwrap();
        let ServerFrame::Response(inner) = res else {
            panic!("expected response frame");
        };
        assert!(!inner.ok);
        assert_eq!(inner.error.unwrap().code, error_codes::UNKNOWN_CHANNEL);

        let ev: ServerFrame = serde_json::from_value(json!({
            "type": "event",
            "event": "publication",
            "payload": { "channel": "grafana/broadcast/x", "data": { "v": 1 } },
            "seq": 7
        }))
        .unwrap();
        let ServerFrame::Event(inner) = ev else {
            panic!("expected event frame");
        };
        let publication: PublicationPayload =
            serde_json::from_value(inner.payload.unwrap()).unwrap();
        assert_eq!(publication.channel, "grafana/broadcast/x");
        assert_eq!(publication.data["v"], 1);
    }

    #[test]
    fn hello_ok_defaults_ping_interval() {
        let hello: HelloOk = serde_json::from_value(json!({
            "type": "hello-ok",
            "protocol": 1,
            "server": { "version": "10.1.0", "connId": "c-1" }
        }))
        .unwrap();
        assert_eq!(hello.ping_interval_ms, PING_INTERVAL_MS);
        assert_eq!(hello.server.conn_id, "c-1");
    }

    #[test]
    fn request_frame_omits_absent_params() {
        let frame = RequestFrame::new("abc", methods::PRESENCE, None);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "req");
        assert!(json.get("params").is_none());
    }
}
