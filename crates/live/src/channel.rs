//! A single logical subscription and its state machine.
//!
//! ```text
//! Pending ──► Connected ◄──► Disconnected
//!    │            │               │
//!    ▼            ▼               ▼
//! Invalid      Shutdown ◄─────────┘
//! ```
//!
//! `Invalid` and `Shutdown` are terminal. Reaching either pushes one last
//! status event, closes every stream and removes the channel from its
//! registry.

use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    serde::Serialize,
    serde_json::Value,
    tokio::sync::{broadcast, mpsc},
    tokio_stream::{
        Stream, StreamExt,
        wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use {
    crate::metric_names::channels as channel_metrics,
    metrics::{counter, gauge},
};

use crate::{
    address::ChannelAddress,
    channel_config::ChannelConfig,
    error::{Error, Result},
    transport::{
        PresenceInfo, PresenceSnapshot, Subscription, SubscriptionEvent, SubscriptionId, Transport,
    },
};

/// Open channels keyed by id. Shared between the service and its channels.
pub(crate) type Registry = Mutex<HashMap<String, Arc<LiveChannel>>>;

/// Boxed stream of channel events.
pub type ChannelStream = Pin<Box<dyn Stream<Item = ChannelMessage> + Send>>;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Pending,
    Connected,
    Disconnected,
    Shutdown,
    Invalid,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Shutdown => "shutdown",
            Self::Invalid => "invalid",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Shutdown | Self::Invalid)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-known status of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub id: String,
    /// Unix milliseconds of the last change.
    pub timestamp: u64,
    pub state: ChannelState,
    /// Sticky: survives state changes until a message is delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Uniform event delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Message { data: Value },
    Join(PresenceInfo),
    Leave(PresenceInfo),
}

// ── Capabilities ─────────────────────────────────────────────────────────────

/// Which optional operations a channel offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelCapabilities {
    pub publish: bool,
    pub presence: bool,
}

/// Publish operation of a channel whose config allowed publishing.
#[derive(Clone)]
pub struct Publisher {
    channel: String,
    transport: Arc<dyn Transport>,
    closed: CancellationToken,
}

impl Publisher {
    /// Round-trips `data` through the transport and returns the server reply.
    pub async fn publish(&self, data: Value) -> Result<Value> {
        if self.closed.is_cancelled() {
            return Err(Error::closed(&self.channel));
        }
        self.transport.publish(&self.channel, data).await
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher").field("channel", &self.channel).finish()
    }
}

/// Presence query of a channel whose config declared presence support.
/// Join and leave deltas arrive on the channel stream.
#[derive(Clone)]
pub struct PresenceHandle {
    channel: String,
    transport: Arc<dyn Transport>,
    closed: CancellationToken,
}

impl PresenceHandle {
    pub async fn get(&self) -> Result<PresenceSnapshot> {
        if self.closed.is_cancelled() {
            return Err(Error::closed(&self.channel));
        }
        self.transport.presence(&self.channel).await
    }
}

impl fmt::Debug for PresenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceHandle").field("channel", &self.channel).finish()
    }
}

// ── Channel ──────────────────────────────────────────────────────────────────

struct Shared {
    status: ChannelStatus,
    /// `None` once terminal; dropping the sender ends every stream.
    tx: Option<broadcast::Sender<ChannelMessage>>,
    config: Option<ChannelConfig>,
    transport: Option<Arc<dyn Transport>>,
    publisher: Option<Publisher>,
    presence: Option<PresenceHandle>,
    /// Transport subscription owned by this channel, released on disconnect.
    subscription: Option<SubscriptionId>,
}

/// One open channel. Shared by reference with every caller that asked for
/// its address; lives until it reaches a terminal state.
pub struct LiveChannel {
    address: ChannelAddress,
    id: String,
    opened_at: u64,
    shared: Mutex<Shared>,
    closed: CancellationToken,
    registry: Weak<Registry>,
}

impl LiveChannel {
    pub(crate) fn new(address: ChannelAddress, registry: Weak<Registry>, buffer: usize) -> Self {
        let id = address.id();
        let opened_at = now_ms();
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            shared: Mutex::new(Shared {
                status: ChannelStatus {
                    id: id.clone(),
                    timestamp: opened_at,
                    state: ChannelState::Pending,
                    error: None,
                },
                tx: Some(tx),
                config: None,
                transport: None,
                publisher: None,
                presence: None,
                subscription: None,
            }),
            address,
            id,
            opened_at,
            closed: CancellationToken::new(),
            registry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unix milliseconds at creation.
    pub fn opened_at(&self) -> u64 {
        self.opened_at
    }

    pub fn status(&self) -> ChannelStatus {
        self.lock().status.clone()
    }

    pub fn state(&self) -> ChannelState {
        self.lock().status.state
    }

    /// Resolved config, once initialization got that far.
    pub fn config(&self) -> Option<ChannelConfig> {
        self.lock().config.clone()
    }

    pub fn capabilities(&self) -> ChannelCapabilities {
        let shared = self.lock();
        ChannelCapabilities {
            publish: shared.publisher.is_some(),
            presence: shared.presence.is_some(),
        }
    }

    /// Present only when the config allowed publishing at initialization.
    pub fn publisher(&self) -> Option<Publisher> {
        self.lock().publisher.clone()
    }

    /// Present only when the config declared presence support.
    pub fn presence(&self) -> Option<PresenceHandle> {
        self.lock().presence.clone()
    }

    /// Events from now on, starting with a snapshot of the current status.
    ///
    /// The stream ends after the terminal status event. Subscribing to a
    /// terminal channel yields only its final status.
    ///
    /// Delivery is bounded by `channels.buffer`: a subscriber that falls more
    /// than that many events behind loses the oldest ones and resumes with
    /// the newest. Skips are logged at `warn`.
    pub fn stream(&self) -> ChannelStream {
        let shared = self.lock();
        let snapshot = tokio_stream::once(ChannelMessage::Status(shared.status.clone()));
        let Some(tx) = shared.tx.as_ref() else {
            return Box::pin(snapshot);
        };
        let id = self.id.clone();
        let live = BroadcastStream::new(tx.subscribe()).filter_map(move |item| match item {
            Ok(message) => Some(message),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(channel = %id, skipped, "stream subscriber lagged, events dropped");
                None
            },
        });
        Box::pin(snapshot.chain(live))
    }

    /// Force `Shutdown` and release the transport subscription. Idempotent.
    pub async fn disconnect(&self) {
        let release = {
            let mut shared = self.lock();
            if shared.status.state.is_terminal() {
                return;
            }
            self.finish(&mut shared, ChannelState::Shutdown, None);
            shared
                .subscription
                .take()
                .zip(shared.transport.clone())
        };
        self.after_finish();
        if let Some((id, transport)) = release
            && let Err(e) = transport.unsubscribe(&self.id, id).await
        {
            warn!(channel = %self.id, error = %e, "unsubscribe failed");
        }
        info!(channel = %self.id, "channel disconnected");
    }

    // ── Lifecycle driven by the service ──────────────────────────────────────

    pub(crate) fn is_terminal(&self) -> bool {
        self.lock().status.state.is_terminal()
    }

    /// Store the resolved config and wire the capabilities it grants.
    pub(crate) fn bind(&self, config: &ChannelConfig, transport: Arc<dyn Transport>) -> bool {
        let mut shared = self.lock();
        if shared.status.state.is_terminal() {
            return false;
        }
        if config.can_publish() {
            shared.publisher = Some(Publisher {
                channel: self.id.clone(),
                transport: Arc::clone(&transport),
                closed: self.closed.clone(),
            });
        }
        if config.has_presence {
            shared.presence = Some(PresenceHandle {
                channel: self.id.clone(),
                transport: Arc::clone(&transport),
                closed: self.closed.clone(),
            });
        }
        shared.config = Some(config.clone());
        shared.transport = Some(transport);
        true
    }

    /// Take ownership of a transport subscription. An established one moves
    /// the channel to `Connected`; a deferred one leaves it `Pending` until
    /// the transport reports `Subscribed`.
    ///
    /// Returns `false` when the channel was shut down meanwhile; the caller
    /// then still owns the subscription and must release it.
    pub(crate) fn attach(
        self: &Arc<Self>,
        config: ChannelConfig,
        subscription: Subscription,
    ) -> bool {
        {
            let mut shared = self.lock();
            if shared.status.state.is_terminal() {
                return false;
            }
            shared.subscription = Some(subscription.id);
            if subscription.established {
                self.transition(&mut shared, ChannelState::Connected, None);
            } else {
                debug!(channel = %self.id, "transport offline, waiting for server subscription");
            }
        }
        tokio::spawn(Arc::clone(self).pump(config, subscription.events));
        true
    }

    /// End initialization with `error`. Config errors give `Invalid`,
    /// anything else `Shutdown`.
    pub(crate) fn fail(&self, error: &Error) {
        let state = if error.is_config_error() {
            ChannelState::Invalid
        } else {
            ChannelState::Shutdown
        };
        {
            let mut shared = self.lock();
            if shared.status.state.is_terminal() {
                return;
            }
            self.finish(&mut shared, state, Some(error.to_string()));
        }
        self.after_finish();
        warn!(channel = %self.id, state = %state, error = %error, "channel initialization failed");
    }

    pub(crate) fn set_state(&self, state: ChannelState, error: Option<String>) {
        let mut shared = self.lock();
        self.transition(&mut shared, state, error);
    }

    async fn pump(
        self: Arc<Self>,
        config: ChannelConfig,
        mut events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) {
        loop {
            let event = tokio::select! {
                _ = self.closed.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Some(SubscriptionEvent::Subscribed) => {
                    self.set_state(ChannelState::Connected, None);
                },
                Some(SubscriptionEvent::LinkLost { reason }) => {
                    // Never subscribed yet: stay Pending, but surface the reason.
                    let state = match self.state() {
                        ChannelState::Pending => ChannelState::Pending,
                        _ => ChannelState::Disconnected,
                    };
                    self.set_state(state, Some(reason));
                },
                Some(SubscriptionEvent::Publication(data)) => {
                    self.deliver(config.process_message(data));
                },
                Some(SubscriptionEvent::Join(info)) => self.emit(ChannelMessage::Join(info)),
                Some(SubscriptionEvent::Leave(info)) => self.emit(ChannelMessage::Leave(info)),
                Some(SubscriptionEvent::Error(message)) => {
                    warn!(channel = %self.id, error = %message, "subscription error");
                    let state = self.state();
                    self.set_state(state, Some(message));
                },
                Some(SubscriptionEvent::Unsubscribed { reason }) => {
                    self.close_remote(reason);
                    break;
                },
                None => {
                    self.close_remote("subscription feed closed".into());
                    break;
                },
            }
        }
        debug!(channel = %self.id, "subscription pump stopped");
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Apply a non-terminal transition. A repeated state is only re-announced
    /// when it carries a new error.
    fn transition(&self, shared: &mut Shared, state: ChannelState, error: Option<String>) {
        if shared.status.state.is_terminal() {
            return;
        }
        if shared.status.state == state && error.is_none() {
            return;
        }
        debug!(channel = %self.id, from = %shared.status.state, to = %state, "channel state");
        shared.status.state = state;
        shared.status.timestamp = now_ms();
        if error.is_some() {
            shared.status.error = error;
        }
        if let Some(tx) = shared.tx.as_ref() {
            let _ = tx.send(ChannelMessage::Status(shared.status.clone()));
        }
        #[cfg(feature = "metrics")]
        counter!(channel_metrics::TRANSITIONS_TOTAL, "state" => state.as_str()).increment(1);
    }

    /// Apply a terminal transition and drop everything that keeps the
    /// channel reachable. Caller checks the channel is not terminal yet.
    fn finish(&self, shared: &mut Shared, state: ChannelState, error: Option<String>) {
        self.transition(shared, state, error);
        shared.tx = None;
        shared.publisher = None;
        shared.presence = None;
    }

    fn after_finish(&self) {
        self.closed.cancel();
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut open = registry.lock().unwrap_or_else(|e| e.into_inner());
        if open
            .get(&self.id)
            .is_some_and(|c| std::ptr::eq(Arc::as_ptr(c), self))
        {
            open.remove(&self.id);
            debug!(channel = %self.id, "channel removed from registry");
        }
        #[cfg(feature = "metrics")]
        gauge!(channel_metrics::OPEN).set(open.len() as f64);
    }

    fn close_remote(&self, reason: String) {
        {
            let mut shared = self.lock();
            if shared.status.state.is_terminal() {
                return;
            }
            shared.subscription = None;
            self.finish(&mut shared, ChannelState::Shutdown, Some(reason));
        }
        self.after_finish();
        info!(channel = %self.id, "channel closed by server");
    }

    fn emit(&self, message: ChannelMessage) {
        if let Some(tx) = self.lock().tx.as_ref() {
            let _ = tx.send(message);
        }
    }

    /// Deliver a processed publication; clears the sticky error.
    fn deliver(&self, data: Value) {
        let mut shared = self.lock();
        let Some(tx) = shared.tx.clone() else {
            return;
        };
        shared.status.error = None;
        let _ = tx.send(ChannelMessage::Message { data });
    }
}

impl fmt::Debug for LiveChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveChannel")
            .field("id", &self.id)
            .field("opened_at", &self.opened_at)
            .field("status", &self.status())
            .finish()
    }
}
