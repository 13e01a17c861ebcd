//! WebSocket transport for live channels.
//!
//! [`WsTransport`] implements [`dashlive_live::Transport`] on top of
//! `tokio-tungstenite`: one socket, a `connect` handshake, request/response
//! correlation and automatic reconnect.

pub mod connection;
pub mod error;
pub mod rpc;
pub mod tls;
pub mod transport;

pub use {connection::ConnectOptions, error::Error, transport::WsTransport};
