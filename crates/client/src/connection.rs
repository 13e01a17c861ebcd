use {
    crate::{Error, tls::build_tls_connector, transport::Shared},
    dashlive_config::DashliveConfig,
    dashlive_protocol::{
        ClientInfo, ConnectParams, HANDSHAKE_TIMEOUT_MS, HelloOk, PROTOCOL_VERSION,
        REQUEST_TIMEOUT_MS, RequestFrame, ResponseFrame, methods,
    },
    futures::{SinkExt, StreamExt},
    secrecy::{ExposeSecret, Secret},
    std::{path::PathBuf, sync::Arc, time::Duration},
    tokio::sync::mpsc,
    tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message},
    tracing::{debug, info, warn},
};

/// First reconnect delay; doubles up to [`ConnectOptions::max_backoff`].
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: String,
    pub token: Option<Secret<String>>,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub max_backoff: Duration,
    pub ca_cert: Option<PathBuf>,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            handshake_timeout: Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            max_backoff: Duration::from_secs(5),
            ca_cert: None,
        }
    }

    pub fn from_config(config: &DashliveConfig) -> Self {
        Self {
            url: config.server.url.clone(),
            token: config.auth.token.clone(),
            handshake_timeout: Duration::from_millis(config.transport.handshake_timeout_ms),
            request_timeout: Duration::from_millis(config.transport.request_timeout_ms),
            max_backoff: Duration::from_millis(config.transport.max_backoff_ms),
            ca_cert: config.transport.ca_cert.clone(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Secret::new(token.into()));
        self
    }
}

/// Build the `connect` handshake params.
pub(crate) fn build_connect_params(options: &ConnectOptions, instance_id: &str) -> ConnectParams {
    ConnectParams {
        min_protocol: PROTOCOL_VERSION,
        max_protocol: PROTOCOL_VERSION,
        client: ClientInfo {
            id: "dashlive".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            platform: std::env::consts::OS.into(),
            instance_id: Some(instance_id.into()),
        },
        token: options.token.as_ref().map(|t| t.expose_secret().clone()),
        user_agent: Some(format!("dashlive/{}", env!("CARGO_PKG_VERSION"))),
    }
}

/// Keep a connection up until the transport is closed, reconnecting with
/// exponential backoff.
pub(crate) async fn connection_loop(shared: Arc<Shared>) {
    let mut backoff = INITIAL_BACKOFF.min(shared.options.max_backoff);

    loop {
        info!(url = %shared.options.url, "connecting to live endpoint");

        let reason = match connect_and_run(&shared, &mut backoff).await {
            Ok(()) => {
                debug!("connection closed cleanly");
                "connection closed".to_string()
            },
            Err(e) => {
                warn!(error = %e, "connection error");
                e.to_string()
            },
        };
        shared.on_disconnected(reason).await;

        if shared.closed.is_cancelled() {
            break;
        }
        info!(delay_ms = backoff.as_millis() as u64, "reconnecting after delay");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {},
            _ = shared.closed.cancelled() => break,
        }
        backoff = (backoff * 2).min(shared.options.max_backoff);
    }
    debug!("connection loop stopped");
}

/// Single connection attempt: connect, handshake, then pump frames.
async fn connect_and_run(shared: &Arc<Shared>, backoff: &mut Duration) -> Result<(), Error> {
    let options = &shared.options;
    let connector = build_tls_connector(options.ca_cert.as_deref())?;
    let (ws_stream, _response) =
        connect_async_tls_with_config(options.url.as_str(), None, false, Some(connector)).await?;
    let (mut ws_sink, mut ws_reader) = ws_stream.split();

    let connect_id = uuid::Uuid::new_v4().to_string();
    let params = build_connect_params(options, &shared.instance_id);
    let connect_frame = RequestFrame::new(
        connect_id.clone(),
        methods::CONNECT,
        Some(serde_json::to_value(params)?),
    );
    ws_sink
        .send(Message::Text(serde_json::to_string(&connect_frame)?.into()))
        .await?;

    let hello = wait_for_hello(&mut ws_reader, &connect_id, options.handshake_timeout).await?;
    info!(
        server_version = %hello.server.version,
        conn_id = %hello.server.conn_id,
        "connected to live endpoint"
    );
    *backoff = INITIAL_BACKOFF.min(options.max_backoff);

    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
    shared.on_connected(write_tx).await;

    loop {
        tokio::select! {
            msg = ws_reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => shared.handle_text(&text).await,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket closed by server");
                        return Ok(());
                    },
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => return Err(Error::WebSocket(e)),
                }
            },
            json = write_rx.recv() => {
                match json {
                    Some(text) => ws_sink.send(Message::Text(text.into())).await?,
                    None => return Ok(()),
                }
            },
            _ = shared.closed.cancelled() => {
                let _ = ws_sink.send(Message::Close(None)).await;
                return Ok(());
            },
        }
    }
}

/// Wait for the `hello-ok` response to our `connect` request.
async fn wait_for_hello(
    reader: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    connect_id: &str,
    timeout: Duration,
) -> Result<HelloOk, Error> {
    let result = tokio::time::timeout(timeout, async {
        while let Some(msg) = reader.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Ok(frame) = serde_json::from_str::<ResponseFrame>(&text)
                        && frame.id == connect_id
                    {
                        return parse_hello(frame);
                    }
                },
                Ok(Message::Close(_)) => {
                    return Err(Error::Connection(
                        "server closed connection during handshake".into(),
                    ));
                },
                Ok(_) => {},
                Err(e) => return Err(Error::WebSocket(e)),
            }
        }
        Err(Error::Connection("connection closed before handshake".into()))
    })
    .await;

    result.unwrap_or_else(|_| Err(Error::Connection("handshake timed out".into())))
}

fn parse_hello(frame: ResponseFrame) -> Result<HelloOk, Error> {
    if !frame.ok {
        let msg = frame
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "unknown error".into());
        return Err(Error::Auth(msg));
    }
    let payload = frame
        .payload
        .ok_or_else(|| Error::Protocol("hello-ok response missing payload".into()))?;
    let hello: HelloOk = serde_json::from_value(payload)?;
    if hello.protocol != PROTOCOL_VERSION {
        return Err(Error::Protocol(format!(
            "server speaks protocol {}, expected {PROTOCOL_VERSION}",
            hello.protocol
        )));
    }
    Ok(hello)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, dashlive_protocol::ErrorShape, serde_json::json};

    #[test]
    fn connect_params_carry_token_and_version() {
        let options = ConnectOptions::new("ws://localhost:3000/api/live/ws").with_token("glsa_x");
        let params = build_connect_params(&options, "inst-1");
        assert_eq!(params.min_protocol, PROTOCOL_VERSION);
        assert_eq!(params.max_protocol, PROTOCOL_VERSION);
        assert_eq!(params.client.id, "dashlive");
        assert_eq!(params.client.instance_id.as_deref(), Some("inst-1"));
        assert_eq!(params.token.as_deref(), Some("glsa_x"));

        let anonymous = build_connect_params(&ConnectOptions::new("ws://x"), "inst-2");
        assert!(anonymous.token.is_none());
        let json = serde_json::to_value(&anonymous).unwrap();
        assert!(json.get("token").is_none());
    }

    #[test]
    fn options_follow_config() {
        let mut config = DashliveConfig::default();
        config.server.url = "wss://grafana.example.com/api/live/ws".into();
        config.transport.max_backoff_ms = 1_000;
        let options = ConnectOptions::from_config(&config);
        assert_eq!(options.url, "wss://grafana.example.com/api/live/ws");
        assert_eq!(options.max_backoff, Duration::from_secs(1));
        assert!(options.token.is_none());
    }

    #[test]
    fn hello_is_validated() {
        let ok = ResponseFrame::ok(
            "1",
            json!({"type": "hello-ok", "protocol": 1, "server": {"version": "11", "connId": "c"}}),
        );
        assert_eq!(parse_hello(ok).unwrap().server.conn_id, "c");

        let rejected = ResponseFrame::err("1", ErrorShape::new("UNAUTHORIZED", "bad token"));
        assert!(matches!(parse_hello(rejected), Err(Error::Auth(msg)) if msg == "bad token"));

        let future = ResponseFrame::ok(
            "1",
            json!({"type": "hello-ok", "protocol": 9, "server": {"version": "99", "connId": "c"}}),
        );
        assert!(matches!(parse_hello(future), Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn handshake_skips_unrelated_frames() {
        let unrelated = ResponseFrame::ok("other", json!({}));
        let hello = ResponseFrame::ok(
            "conn-1",
            json!({"type": "hello-ok", "protocol": 1, "server": {"version": "11", "connId": "c9"}}),
        );
        let frames: Vec<Result<Message, tokio_tungstenite::tungstenite::Error>> = vec![
            Ok(Message::Text(serde_json::to_string(&unrelated).unwrap().into())),
            Ok(Message::Text(serde_json::to_string(&hello).unwrap().into())),
        ];
        let mut reader = futures::stream::iter(frames);
        let hello = wait_for_hello(&mut reader, "conn-1", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(hello.server.conn_id, "c9");
    }
}
