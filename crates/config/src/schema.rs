/// Config schema types (server, auth, transport, channels, datasources).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashliveConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub transport: TransportConfig,
    pub channels: ChannelsConfig,
    /// Data sources that may back `ds/...` channels.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub datasources: Vec<DataSourceEntry>,
}

/// Live server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket endpoint of the live server. Defaults to the local Grafana
    /// live endpoint.
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000/api/live/ws".into(),
        }
    }
}

/// Credentials sent in the connect handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token (service account or API key).
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
}

impl AuthConfig {
    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

/// Connection tuning for the WebSocket transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Time allowed for the `connect` handshake.
    pub handshake_timeout_ms: u64,
    /// Time allowed for a single request (subscribe, publish, presence).
    pub request_timeout_ms: u64,
    /// Upper bound of the exponential reconnect backoff.
    pub max_backoff_ms: u64,
    /// Extra PEM CA certificate to trust for `wss://` endpoints.
    pub ca_cert: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            max_backoff_ms: 5_000,
            ca_cert: None,
        }
    }
}

/// Per-channel event fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Events buffered per channel for its stream subscribers. Delivery is
    /// not lossless: a subscriber more than `buffer` events behind drops the
    /// oldest ones and continues with the newest.
    pub buffer: usize,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self { buffer: 256 }
    }
}

/// A data source known to the client, keyed by uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceEntry {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    /// Whether the data source streams; non-streaming sources have no channels.
    #[serde(default = "default_true")]
    pub streaming: bool,
}

fn default_true() -> bool {
    true
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
