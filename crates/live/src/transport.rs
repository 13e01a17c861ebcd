//! The seam between the registry and whatever carries channel traffic.
//!
//! A transport owns one persistent connection. It reports connection changes
//! and unrouted pushes on a broadcast feed, and hands every subscription its
//! own event queue so per-channel ordering is preserved.

use std::{collections::HashMap, fmt};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::sync::{broadcast, mpsc},
};

use crate::error::Result;

/// Connection-level notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    /// A push for a channel with no active subscription.
    Publication { channel: String, data: Value },
}

/// One participant reported by presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceInfo {
    pub user: String,
    pub client: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Participants currently joined to a channel, keyed by client id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub clients: HashMap<String, PresenceInfo>,
}

/// Events delivered to a single subscription, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// The subscription was (re)established after a reconnect.
    Subscribed,
    /// The link dropped; the transport will resubscribe on its own.
    LinkLost { reason: String },
    /// The server ended the subscription. Terminal.
    Unsubscribed { reason: String },
    Publication(Value),
    Join(PresenceInfo),
    Leave(PresenceInfo),
    Error(String),
}

/// Identity of one `subscribe` call. Ids are unique per transport, so a
/// stale holder can never release a newer subscription to the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle returned by [`Transport::subscribe`]. Dropping the receiver does
/// not unsubscribe; call [`Transport::unsubscribe`] with [`id`](Self::id).
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    /// `false` when the transport was offline: the server subscription is
    /// made on the next connect and announced with
    /// [`SubscriptionEvent::Subscribed`].
    pub established: bool,
    pub events: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, events: mpsc::UnboundedReceiver<SubscriptionEvent>) -> Self {
        Self {
            id,
            established: true,
            events,
        }
    }

    /// A subscription recorded while offline.
    pub fn deferred(
        id: SubscriptionId,
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) -> Self {
        Self {
            id,
            established: false,
            events,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting. Returns immediately; progress shows up on [`events`](Self::events).
    fn connect(&self);

    fn is_connected(&self) -> bool;

    /// Subscribe to connection-level events.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Subscribe to `channel`. Subscribing again replaces the previous feed
    /// for the same channel.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Release subscription `id`. A no-op when `channel` is now held by a
    /// different subscription.
    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<()>;

    /// Publish `data` and return the server's reply payload.
    async fn publish(&self, channel: &str, data: Value) -> Result<Value>;

    async fn presence(&self, channel: &str) -> Result<PresenceSnapshot>;
}
