//! Channel registry and connection service.
//!
//! [`LiveService`] owns the transport, keeps at most one [`LiveChannel`] per
//! channel id and initializes each new channel in the background:
//!
//! 1. resolve scope support for the namespace, else `Invalid`
//! 2. resolve the channel config for the path, else `Invalid`
//! 3. wait for the first transport connection (shared by every channel)
//! 4. bind publish/presence capabilities allowed by the config
//! 5. subscribe, which moves the channel to `Connected` once the server
//!    holds the subscription
//!
//! Any other failure shuts the channel down with the error. Either way the
//! channel leaves the registry, so asking for the same address again starts
//! a fresh attempt.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use {
    tokio::sync::{broadcast, watch},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use {
    crate::metric_names::channels as channel_metrics,
    metrics::{counter, gauge},
};

use {
    crate::{
        address::{ChannelAddress, LiveScope},
        channel::{ChannelStream, LiveChannel, Registry},
        error::{Error, Result},
        scope::{LiveScopes, NamespaceInfo},
        transport::{Transport, TransportEvent},
    },
    dashlive_config::ChannelsConfig,
};

struct Inner {
    transport: Arc<dyn Transport>,
    scopes: LiveScopes,
    channels: Arc<Registry>,
    /// Current link state, published to observers.
    connected: watch::Sender<bool>,
    /// Flips to `true` once and stays there.
    first_connect: watch::Sender<bool>,
    buffer: usize,
    /// Stops pending initializations.
    shutdown: CancellationToken,
    /// Stops the transport watcher. Outlives `shutdown` so link state stays live.
    watcher: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.watcher.cancel();
    }
}

/// Registry of open channels multiplexed over one transport. Cheap to clone.
#[derive(Clone)]
pub struct LiveService {
    inner: Arc<Inner>,
}

impl LiveService {
    /// Build the service and start connecting the transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, scopes: LiveScopes, config: &ChannelsConfig) -> Self {
        let events = transport.events();
        let connected_now = transport.is_connected();
        let inner = Arc::new(Inner {
            transport: Arc::clone(&transport),
            scopes,
            channels: Arc::new(Mutex::new(HashMap::new())),
            connected: watch::Sender::new(connected_now),
            first_connect: watch::Sender::new(connected_now),
            buffer: config.buffer,
            shutdown: CancellationToken::new(),
            watcher: CancellationToken::new(),
        });
        tokio::spawn(watch_transport(
            Arc::downgrade(&inner),
            events,
            inner.watcher.clone(),
        ));
        transport.connect();
        Self { inner }
    }

    /// Open (or reuse) the channel at `scope/namespace/path`.
    ///
    /// Fails only on a malformed address. Everything after that is reported
    /// through the channel's status.
    pub fn get_channel(
        &self,
        scope: LiveScope,
        namespace: &str,
        path: &str,
    ) -> Result<Arc<LiveChannel>> {
        let address = ChannelAddress::new(scope, namespace, path)?;
        Ok(self.get_channel_at(&address))
    }

    /// Like [`get_channel`](Self::get_channel) for a full `scope/namespace/path` id.
    pub fn get_channel_by_id(&self, id: &str) -> Result<Arc<LiveChannel>> {
        let address = ChannelAddress::parse(id)?;
        Ok(self.get_channel_at(&address))
    }

    /// Return the open channel for `address`, or register a new `Pending`
    /// one and start initializing it.
    pub fn get_channel_at(&self, address: &ChannelAddress) -> Arc<LiveChannel> {
        let id = address.id();
        let channel = {
            let mut open = self.inner.lock_channels();
            if let Some(existing) = open.get(&id)
                && !existing.is_terminal()
            {
                return Arc::clone(existing);
            }
            let channel = Arc::new(LiveChannel::new(
                address.clone(),
                Arc::downgrade(&self.inner.channels),
                self.inner.buffer,
            ));
            open.insert(id, Arc::clone(&channel));
            #[cfg(feature = "metrics")]
            gauge!(channel_metrics::OPEN).set(open.len() as f64);
            channel
        };
        debug!(channel = %channel.id(), "channel opened");
        tokio::spawn(Arc::clone(&self.inner).initialize(Arc::clone(&channel)));
        channel
    }

    /// Event stream of the channel at `address`, opening it if needed.
    pub fn stream(&self, address: &ChannelAddress) -> ChannelStream {
        self.get_channel_at(address).stream()
    }

    /// Channels currently registered, sorted by id.
    pub fn open_channels(&self) -> Vec<Arc<LiveChannel>> {
        let mut open: Vec<_> = self.inner.lock_channels().values().cloned().collect();
        open.sort_by(|a, b| a.id().cmp(b.id()));
        open
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Observe the transport link state. Independent of channel states.
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    pub fn scopes(&self) -> Vec<LiveScope> {
        self.inner.scopes.scopes()
    }

    /// Namespaces with channel support in `scope`. Empty when no resolver
    /// is registered for it.
    pub async fn list_namespaces(&self, scope: LiveScope) -> Result<Vec<NamespaceInfo>> {
        match self.inner.scopes.get(scope) {
            Some(resolver) => resolver.list_namespaces().await,
            None => Ok(Vec::new()),
        }
    }

    /// Disconnect every open channel and fail initializations still waiting
    /// for the first connection.
    ///
    /// Link state keeps following the transport afterwards:
    /// [`is_connected`](Self::is_connected) and
    /// [`connection_state`](Self::connection_state) stay live until the
    /// transport closes its event feed or the last service handle drops.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let open = self.open_channels();
        info!(channels = open.len(), "shutting down live service");
        for channel in open {
            channel.disconnect().await;
        }
    }
}

impl Inner {
    fn lock_channels(&self) -> MutexGuard<'_, HashMap<String, Arc<LiveChannel>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn initialize(self: Arc<Self>, channel: Arc<LiveChannel>) {
        if let Err(e) = self.try_initialize(&channel).await {
            channel.fail(&e);
        }
    }

    async fn try_initialize(&self, channel: &Arc<LiveChannel>) -> Result<()> {
        let address = channel.address();
        let unsupported =
            || Error::unsupported_namespace(address.scope().as_str(), address.namespace());

        let resolver = self.scopes.get(address.scope()).ok_or_else(unsupported)?;
        let support = resolver
            .channel_support(address.namespace())
            .await?
            .ok_or_else(unsupported)?;
        let config = support
            .channel_config(address.path())
            .ok_or_else(|| Error::unknown_path(address.path()))?;

        self.wait_for_first_connect().await?;

        if !channel.bind(&config, Arc::clone(&self.transport)) {
            debug!(channel = %channel.id(), "channel closed before subscribing");
            return Ok(());
        }
        let subscription = self.transport.subscribe(channel.id()).await?;
        let id = subscription.id;
        if !channel.attach(config, subscription) {
            debug!(
                channel = %channel.id(),
                subscription = %id,
                "releasing subscription of closed channel"
            );
            if let Err(e) = self.transport.unsubscribe(channel.id(), id).await {
                warn!(channel = %channel.id(), error = %e, "unsubscribe failed");
            }
        }
        Ok(())
    }

    async fn wait_for_first_connect(&self) -> Result<()> {
        let mut first_connect = self.first_connect.subscribe();
        tokio::select! {
            ready = async { first_connect.wait_for(|connected| *connected).await.is_ok() } => {
                if !ready {
                    return Err(Error::transport("transport gone before connecting"));
                }
                Ok(())
            },
            _ = self.shutdown.cancelled() => Err(Error::transport("live service shut down")),
        }
    }
}

/// Mirror transport events into the service's connection state.
async fn watch_transport(
    inner: Weak<Inner>,
    mut events: broadcast::Receiver<TransportEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            Ok(TransportEvent::Connected) => {
                info!("transport connected");
                inner.connected.send_replace(true);
                inner.first_connect.send_replace(true);
            },
            Ok(TransportEvent::Disconnected { reason }) => {
                info!(reason = %reason, "transport disconnected");
                inner.connected.send_replace(false);
            },
            Ok(TransportEvent::Publication { channel, .. }) => {
                debug!(channel = %channel, "dropping publication for channel without subscription");
                #[cfg(feature = "metrics")]
                counter!(channel_metrics::OUT_OF_BAND_TOTAL).increment(1);
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "transport events lagged, resyncing link state");
                let connected = inner.transport.is_connected();
                inner.connected.send_replace(connected);
                if connected {
                    inner.first_connect.send_replace(true);
                }
            },
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("transport watcher stopped");
}
