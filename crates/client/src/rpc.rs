use {
    crate::Error,
    dashlive_protocol::{RequestFrame, ResponseFrame},
    serde_json::Value,
    std::{collections::HashMap, time::Duration},
    tokio::sync::{Mutex, mpsc, oneshot},
    tracing::debug,
};

/// Correlates request/response pairs by id over the current connection.
pub struct RpcClient {
    /// Writer of the live connection; `None` while disconnected.
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<ResponseFrame>>>,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Point requests at a new connection, or at nothing.
    pub async fn set_writer(&self, writer: Option<mpsc::UnboundedSender<String>>) {
        *self.writer.lock().await = writer;
    }

    /// Send a request and wait for the matching response payload.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let Some(writer) = self.writer.lock().await.clone() else {
            return Err(Error::NotConnected);
        };
        let id = uuid::Uuid::new_v4().to_string();
        let json = serde_json::to_string(&RequestFrame::new(id.clone(), method, Some(params)))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if writer.send(json).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::NotConnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response_payload(response),
            Ok(Err(_)) => Err(Error::Connection(format!(
                "connection closed during '{method}'"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Connection(format!(
                    "'{method}' timed out after {}ms",
                    self.timeout.as_millis()
                )))
            },
        }
    }

    /// Route a response frame to its waiting caller.
    pub async fn resolve_response(&self, frame: ResponseFrame) {
        match self.pending.lock().await.remove(&frame.id) {
            // The caller may have timed out and dropped the receiver.
            Some(tx) => {
                let _ = tx.send(frame);
            },
            None => debug!(id = %frame.id, "response for unknown request"),
        }
    }

    /// Fail every in-flight request; used when the connection drops.
    pub async fn fail_all(&self) {
        let dropped = std::mem::take(&mut *self.pending.lock().await);
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "abandoning in-flight requests");
        }
    }
}

fn response_payload(response: ResponseFrame) -> Result<Value, Error> {
    if response.ok {
        return Ok(response.payload.unwrap_or(Value::Null));
    }
    match response.error {
        Some(shape) => Err(Error::Rejected(shape)),
        None => Err(Error::Protocol("error response without details".into())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, dashlive_protocol::ErrorShape, serde_json::json, std::sync::Arc};

    #[tokio::test]
    async fn call_without_connection_fails_fast() {
        let rpc = RpcClient::new(Duration::from_secs(1));
        let err = rpc.call("subscribe", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn response_is_routed_to_caller() {
        let rpc = Arc::new(RpcClient::new(Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        rpc.set_writer(Some(tx)).await;

        let caller = {
            let rpc = Arc::clone(&rpc);
            tokio::spawn(async move { rpc.call("publish", json!({"channel": "c"})).await })
        };
        let sent: RequestFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(sent.method, "publish");

        rpc.resolve_response(ResponseFrame::ok(sent.id, json!({"seq": 3})))
            .await;
        assert_eq!(caller.await.unwrap().unwrap(), json!({"seq": 3}));
    }

    #[tokio::test]
    async fn error_frames_become_rejections() {
        let rpc = Arc::new(RpcClient::new(Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        rpc.set_writer(Some(tx)).await;

        let caller = {
            let rpc = Arc::clone(&rpc);
            tokio::spawn(async move { rpc.call("subscribe", json!({})).await })
        };
        let sent: RequestFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        rpc.resolve_response(ResponseFrame::err(
            sent.id,
            ErrorShape::new("PERMISSION_DENIED", "nope"),
        ))
        .await;
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Rejected(shape) if shape.code == "PERMISSION_DENIED"));
    }

    #[tokio::test]
    async fn dropped_connection_fails_in_flight_calls() {
        let rpc = Arc::new(RpcClient::new(Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        rpc.set_writer(Some(tx)).await;

        let caller = {
            let rpc = Arc::clone(&rpc);
            tokio::spawn(async move { rpc.call("presence", json!({})).await })
        };
        rx.recv().await.unwrap();
        rpc.fail_all().await;
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn timeouts_clear_pending_entries() {
        let rpc = RpcClient::new(Duration::from_millis(10));
        let (tx, _rx) = mpsc::unbounded_channel();
        rpc.set_writer(Some(tx)).await;

        let err = rpc.call("subscribe", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(rpc.pending.lock().await.is_empty());
    }
}
