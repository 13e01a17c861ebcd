//! Live channel registry for dashboards.
//!
//! Channels are addressed as `{scope}/{namespace}/{path}` and multiplexed over
//! a single [`Transport`]. [`LiveService`] hands out one [`LiveChannel`] per
//! address and drives its lifecycle; scope resolvers decide which addresses
//! exist and what they allow.

pub mod address;
pub mod channel;
pub mod channel_config;
pub mod error;
#[cfg(feature = "metrics")]
mod metric_names;
pub mod scope;
pub mod service;
pub mod transport;

pub use {
    address::{ChannelAddress, LiveScope, SEPARATOR},
    channel::{
        ChannelCapabilities, ChannelMessage, ChannelState, ChannelStatus, ChannelStream,
        LiveChannel, PresenceHandle, Publisher,
    },
    channel_config::{ChannelConfig, ChannelHandler, PathPattern, VariableDescriptor},
    error::{Error, Result},
    scope::{
        ChannelSupport, DataSourceLookup, DataSourceMeta, DataSourceScope, GrafanaScope,
        LiveScopes, NamespaceInfo, PluginScope, ScopeResolver, StaticChannelSupport,
    },
    service::LiveService,
    transport::{
        PresenceInfo, PresenceSnapshot, Subscription, SubscriptionEvent, SubscriptionId, Transport,
        TransportEvent,
    },
};
