//! Scope resolvers: map a namespace to the channel configs it supports.
//!
//! One resolver exists per [`LiveScope`]. Resolution is async because some
//! scopes (data sources) need to fetch metadata first. A missing namespace
//! or path is `None`, not an error.

pub mod datasource;
pub mod grafana;
pub mod plugin;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    address::LiveScope,
    channel_config::{ChannelConfig, best_match},
    error::Result,
};

pub use {
    datasource::{DataSourceLookup, DataSourceMeta, DataSourceScope},
    grafana::GrafanaScope,
    plugin::PluginScope,
};

/// Channel capabilities of one namespace.
pub trait ChannelSupport: Send + Sync {
    /// Config for a concrete path, if any pattern matches it.
    fn channel_config(&self, path: &str) -> Option<ChannelConfig>;

    /// Every declared path pattern.
    fn supported_paths(&self) -> Vec<ChannelConfig>;
}

/// A namespace available within a scope.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NamespaceInfo {
    pub namespace: String,
    pub description: Option<String>,
}

/// Resolves namespaces for one scope.
#[async_trait]
pub trait ScopeResolver: Send + Sync {
    fn scope(&self) -> LiveScope;

    /// Channel support for `namespace`, or `None` when the namespace is unknown
    /// or does not stream.
    async fn channel_support(&self, namespace: &str) -> Result<Option<Arc<dyn ChannelSupport>>>;

    /// Namespaces that currently have channel support.
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>>;
}

/// Channel support backed by a fixed list of configs.
#[derive(Debug, Clone, Default)]
pub struct StaticChannelSupport {
    configs: Vec<ChannelConfig>,
}

impl StaticChannelSupport {
    pub fn new(configs: Vec<ChannelConfig>) -> Self {
        Self { configs }
    }

    #[must_use]
    pub fn with(mut self, config: ChannelConfig) -> Self {
        self.configs.push(config);
        self
    }
}

impl ChannelSupport for StaticChannelSupport {
    fn channel_config(&self, path: &str) -> Option<ChannelConfig> {
        best_match(&self.configs, path).cloned()
    }

    fn supported_paths(&self) -> Vec<ChannelConfig> {
        self.configs.clone()
    }
}

/// The set of scope resolvers a [`LiveService`](crate::LiveService) consults.
#[derive(Clone, Default)]
pub struct LiveScopes {
    resolvers: HashMap<LiveScope, Arc<dyn ScopeResolver>>,
}

impl LiveScopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver, replacing any previous one for the same scope.
    #[must_use]
    pub fn with(mut self, resolver: Arc<dyn ScopeResolver>) -> Self {
        self.register(resolver);
        self
    }

    pub fn register(&mut self, resolver: Arc<dyn ScopeResolver>) {
        self.resolvers.insert(resolver.scope(), resolver);
    }

    pub fn get(&self, scope: LiveScope) -> Option<&Arc<dyn ScopeResolver>> {
        self.resolvers.get(&scope)
    }

    pub fn scopes(&self) -> Vec<LiveScope> {
        let mut scopes: Vec<_> = self.resolvers.keys().copied().collect();
        scopes.sort();
        scopes
    }
}
