//! [`Transport`] over a single WebSocket connection.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use {
    async_trait::async_trait,
    dashlive_live::{
        PresenceInfo, PresenceSnapshot, Result as LiveResult, Subscription, SubscriptionEvent,
        SubscriptionId, Transport, TransportEvent,
    },
    dashlive_protocol::{
        ChannelParams, ClientPresence, EventFrameInner, PresencePayload, PresenceResult,
        PublicationPayload, PublishParams, ServerFrame, UnsubscribedPayload, events, methods,
    },
    serde::Serialize,
    serde_json::Value,
    tokio::sync::{broadcast, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    Error,
    connection::{ConnectOptions, connection_loop},
    rpc::RpcClient,
};

/// Current holder of a channel's server subscription.
struct SubscriptionEntry {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

type SubscriptionTable = HashMap<String, SubscriptionEntry>;

/// State shared between the public handle and the connection task.
pub(crate) struct Shared {
    pub(crate) options: ConnectOptions,
    pub(crate) instance_id: String,
    pub(crate) closed: CancellationToken,
    connected: AtomicBool,
    started: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
    rpc: RpcClient,
    subscriptions: Mutex<SubscriptionTable>,
    next_subscription: AtomicU64,
}

/// WebSocket transport: handshake, request correlation, reconnect with
/// backoff, and resubscription of every active channel after a reconnect.
#[derive(Clone)]
pub struct WsTransport {
    shared: Arc<Shared>,
}

impl WsTransport {
    pub fn new(options: ConnectOptions) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                rpc: RpcClient::new(options.request_timeout),
                options,
                instance_id: uuid::Uuid::new_v4().to_string(),
                closed: CancellationToken::new(),
                connected: AtomicBool::new(false),
                started: AtomicBool::new(false),
                events,
                subscriptions: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Stop reconnecting and close the socket.
    pub fn close(&self) {
        self.shared.closed.cancel();
    }

    async fn request(&self, method: &str, params: impl Serialize) -> Result<Value, Error> {
        self.shared
            .rpc
            .call(method, serde_json::to_value(params)?)
            .await
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn connect(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(connection_loop(Arc::clone(&self.shared)));
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    async fn subscribe(&self, channel: &str) -> LiveResult<Subscription> {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .lock_subscriptions()
            .insert(channel.to_string(), SubscriptionEntry { id, tx });

        if !self.is_connected() {
            // The resubscribe pass on the next connect announces `Subscribed`.
            debug!(channel, subscription = %id, "offline, subscription deferred");
            return Ok(Subscription::deferred(id, rx));
        }
        let params = ChannelParams {
            channel: channel.to_string(),
        };
        match self.request(methods::SUBSCRIBE, params).await {
            Ok(_) => {
                debug!(channel, subscription = %id, "subscribed");
                Ok(Subscription::new(id, rx))
            },
            Err(e) => {
                self.shared.release(channel, id);
                Err(e.into())
            },
        }
    }

    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> LiveResult<()> {
        if !self.shared.release(channel, id) || !self.is_connected() {
            return Ok(());
        }
        let params = ChannelParams {
            channel: channel.to_string(),
        };
        self.request(methods::UNSUBSCRIBE, params).await?;
        debug!(channel, subscription = %id, "unsubscribed");
        Ok(())
    }

    async fn publish(&self, channel: &str, data: Value) -> LiveResult<Value> {
        let params = PublishParams {
            channel: channel.to_string(),
            data,
        };
        Ok(self.request(methods::PUBLISH, params).await?)
    }

    async fn presence(&self, channel: &str) -> LiveResult<PresenceSnapshot> {
        let params = ChannelParams {
            channel: channel.to_string(),
        };
        let payload = self.request(methods::PRESENCE, params).await?;
        let result: PresenceResult = serde_json::from_value(payload).map_err(Error::Json)?;
        Ok(PresenceSnapshot {
            clients: result
                .clients
                .into_iter()
                .map(|(id, info)| (id, presence_info(info)))
                .collect(),
        })
    }
}

impl Shared {
    fn lock_subscriptions(&self) -> MutexGuard<'_, SubscriptionTable> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget `channel` if subscription `id` still holds it.
    fn release(&self, channel: &str, id: SubscriptionId) -> bool {
        let mut table = self.lock_subscriptions();
        match table.get(channel) {
            Some(entry) if entry.id == id => {
                table.remove(channel);
                true
            },
            Some(entry) => {
                debug!(channel, stale = %id, current = %entry.id, "ignoring stale unsubscribe");
                false
            },
            None => false,
        }
    }

    fn notify_all(&self, event: &SubscriptionEvent) {
        for entry in self.lock_subscriptions().values() {
            let _ = entry.tx.send(event.clone());
        }
    }

    /// Handshake finished: accept requests and restore every subscription.
    pub(crate) async fn on_connected(self: &Arc<Self>, writer: mpsc::UnboundedSender<String>) {
        self.rpc.set_writer(Some(writer)).await;
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Connected);
        tokio::spawn(resubscribe_all(Arc::clone(self)));
    }

    pub(crate) async fn on_disconnected(&self, reason: String) {
        self.rpc.set_writer(None).await;
        self.rpc.fail_all().await;
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.notify_all(&SubscriptionEvent::LinkLost {
            reason: reason.clone(),
        });
        let _ = self.events.send(TransportEvent::Disconnected { reason });
    }

    pub(crate) async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(ServerFrame::Response(frame)) => self.rpc.resolve_response(frame.into()).await,
            Ok(ServerFrame::Event(frame)) => self.dispatch(frame),
            Err(e) => debug!(error = %e, "ignoring unparseable frame"),
        }
    }

    fn dispatch(&self, frame: EventFrameInner) {
        let (channel, event) = match decode_event(&frame) {
            Ok(Some(routed)) => routed,
            Ok(None) => {
                debug!(event = %frame.event, "ignoring unknown event");
                return;
            },
            Err(e) => {
                warn!(event = %frame.event, error = %e, "malformed event payload");
                return;
            },
        };

        let mut table = self.lock_subscriptions();
        let Some(entry) = table.get(&channel) else {
            drop(table);
            if let SubscriptionEvent::Publication(data) = event {
                let _ = self.events.send(TransportEvent::Publication { channel, data });
            } else {
                debug!(channel = %channel, "dropping event for unsubscribed channel");
            }
            return;
        };
        let terminal = matches!(event, SubscriptionEvent::Unsubscribed { .. });
        if entry.tx.send(event).is_err() || terminal {
            table.remove(&channel);
        }
    }
}

/// Re-issue `subscribe` for every known channel after a (re)connect.
async fn resubscribe_all(shared: Arc<Shared>) {
    let channels: Vec<_> = shared.lock_subscriptions().keys().cloned().collect();
    if channels.is_empty() {
        return;
    }
    info!(count = channels.len(), "restoring subscriptions");
    for channel in channels {
        let params = ChannelParams {
            channel: channel.clone(),
        };
        let result = match serde_json::to_value(params) {
            Ok(params) => shared.rpc.call(methods::SUBSCRIBE, params).await,
            Err(e) => Err(Error::Json(e)),
        };
        let event = match result {
            Ok(_) => SubscriptionEvent::Subscribed,
            Err(e) => {
                warn!(channel = %channel, error = %e, "resubscribe failed");
                SubscriptionEvent::Error(e.to_string())
            },
        };
        if let Some(entry) = shared.lock_subscriptions().get(&channel) {
            let _ = entry.tx.send(event);
        }
    }
}

fn presence_info(info: ClientPresence) -> PresenceInfo {
    PresenceInfo {
        user: info.user,
        client: info.client,
        data: info.data,
    }
}

/// Map a server push to the channel it targets and the event to deliver.
/// `Ok(None)` for event kinds this client does not handle.
pub(crate) fn decode_event(
    frame: &EventFrameInner,
) -> Result<Option<(String, SubscriptionEvent)>, Error> {
    let payload = frame.payload.clone().unwrap_or(Value::Null);
    let routed = match frame.event.as_str() {
        events::PUBLICATION => {
            let p: PublicationPayload = serde_json::from_value(payload)?;
            (p.channel, SubscriptionEvent::Publication(p.data))
        },
        events::JOIN => {
            let p: PresencePayload = serde_json::from_value(payload)?;
            (p.channel, SubscriptionEvent::Join(presence_info(p.info)))
        },
        events::LEAVE => {
            let p: PresencePayload = serde_json::from_value(payload)?;
            (p.channel, SubscriptionEvent::Leave(presence_info(p.info)))
        },
        events::UNSUBSCRIBED => {
            let p: UnsubscribedPayload = serde_json::from_value(payload)?;
            let reason = p.reason.unwrap_or_else(|| "unsubscribed by server".into());
            (p.channel, SubscriptionEvent::Unsubscribed { reason })
        },
        _ => return Ok(None),
    };
    Ok(Some(routed))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, serde_json::json};

    fn event(name: &str, payload: Value) -> EventFrameInner {
        EventFrameInner {
            event: name.into(),
            payload: Some(payload),
            seq: None,
        }
    }

    fn transport() -> WsTransport {
        WsTransport::new(ConnectOptions::new("ws://127.0.0.1:1/api/live/ws"))
    }

    #[test]
    fn decodes_channel_pushes() {
        let (channel, ev) = decode_event(&event(
            events::PUBLICATION,
            json!({"channel": "grafana/broadcast/chat", "data": {"text": "hi"}}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(channel, "grafana/broadcast/chat");
        assert_eq!(ev, SubscriptionEvent::Publication(json!({"text": "hi"})));

        let (_, ev) = decode_event(&event(
            events::JOIN,
            json!({"channel": "grafana/dashboard/uid/a", "info": {"user": "u1", "client": "c1"}}),
        ))
        .unwrap()
        .unwrap();
        assert!(matches!(ev, SubscriptionEvent::Join(info) if info.user == "u1"));

        let (_, ev) = decode_event(&event(
            events::UNSUBSCRIBED,
            json!({"channel": "grafana/dashboard/uid/a"}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(ev, SubscriptionEvent::Unsubscribed {
            reason: "unsubscribed by server".into()
        });
    }

    #[test]
    fn unknown_and_malformed_events() {
        assert!(decode_event(&event("tick", json!({}))).unwrap().is_none());
        assert!(decode_event(&event(events::PUBLICATION, json!({"data": 1}))).is_err());
    }

    #[tokio::test]
    async fn pushes_route_to_subscribers_or_out_of_band() {
        let transport = transport();
        let mut out_of_band = transport.events();
        let mut sub = transport.subscribe("grafana/broadcast/chat").await.unwrap();
        assert!(!sub.established);

        transport
            .shared
            .handle_text(
                &json!({"type": "event", "event": "publication",
                        "payload": {"channel": "grafana/broadcast/chat", "data": 1}})
                .to_string(),
            )
            .await;
        assert_eq!(
            sub.events.recv().await,
            Some(SubscriptionEvent::Publication(json!(1)))
        );

        transport
            .shared
            .handle_text(
                &json!({"type": "event", "event": "publication",
                        "payload": {"channel": "grafana/broadcast/other", "data": 2}})
                .to_string(),
            )
            .await;
        assert_eq!(out_of_band.recv().await.unwrap(), TransportEvent::Publication {
            channel: "grafana/broadcast/other".into(),
            data: json!(2),
        });
    }

    #[tokio::test]
    async fn server_unsubscribe_forgets_channel() {
        let transport = transport();
        let mut sub = transport.subscribe("grafana/broadcast/chat").await.unwrap();

        transport
            .shared
            .handle_text(
                &json!({"type": "event", "event": "unsubscribed",
                        "payload": {"channel": "grafana/broadcast/chat", "reason": "revoked"}})
                .to_string(),
            )
            .await;
        assert_eq!(
            sub.events.recv().await,
            Some(SubscriptionEvent::Unsubscribed {
                reason: "revoked".into()
            })
        );
        assert!(transport.shared.lock_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn disconnect_notifies_subscriptions_once() {
        let transport = transport();
        let mut events = transport.events();
        let mut sub = transport.subscribe("grafana/broadcast/chat").await.unwrap();

        let (writer, _written) = mpsc::unbounded_channel();
        transport.shared.rpc.set_writer(Some(writer)).await;
        transport.shared.connected.store(true, Ordering::SeqCst);

        transport.shared.on_disconnected("reset".into()).await;
        transport.shared.on_disconnected("reset".into()).await;
        assert!(!transport.is_connected());
        assert_eq!(
            sub.events.recv().await,
            Some(SubscriptionEvent::LinkLost {
                reason: "reset".into()
            })
        );
        assert!(sub.events.try_recv().is_err());
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Disconnected {
            reason: "reset".into()
        });
    }

    #[tokio::test]
    async fn unsubscribe_while_offline_is_local() {
        let transport = transport();
        let sub = transport.subscribe("grafana/broadcast/chat").await.unwrap();
        transport
            .unsubscribe("grafana/broadcast/chat", sub.id)
            .await
            .unwrap();
        assert!(transport.shared.lock_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn offline_subscription_is_deferred_without_events() {
        let transport = transport();
        let mut sub = transport.subscribe("grafana/broadcast/chat").await.unwrap();
        assert!(!sub.established);
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_unsubscribe_keeps_newer_subscription() {
        let transport = transport();
        let old = transport.subscribe("grafana/broadcast/chat").await.unwrap();
        let mut fresh = transport.subscribe("grafana/broadcast/chat").await.unwrap();
        assert_ne!(old.id, fresh.id);

        transport
            .unsubscribe("grafana/broadcast/chat", old.id)
            .await
            .unwrap();
        assert_eq!(transport.shared.lock_subscriptions().len(), 1);

        transport
            .shared
            .handle_text(
                &json!({"type": "event", "event": "publication",
                        "payload": {"channel": "grafana/broadcast/chat", "data": 7}})
                .to_string(),
            )
            .await;
        assert_eq!(
            fresh.events.recv().await,
            Some(SubscriptionEvent::Publication(json!(7)))
        );

        transport
            .unsubscribe("grafana/broadcast/chat", fresh.id)
            .await
            .unwrap();
        assert!(transport.shared.lock_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn publish_while_offline_fails() {
        let err = transport()
            .publish("grafana/broadcast/chat", json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, dashlive_live::Error::Transport { .. }));
    }
}
