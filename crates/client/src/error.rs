use dashlive_protocol::ErrorShape;

/// Errors raised by the WebSocket transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered a request with an error frame.
    #[error("request rejected: {0}")]
    Rejected(ErrorShape),

    #[error("not connected")]
    NotConnected,

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Error> for dashlive_live::Error {
    fn from(err: Error) -> Self {
        Self::transport(err)
    }
}
