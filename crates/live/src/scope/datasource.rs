//! Data source namespaces under the `ds` scope.

use std::sync::Arc;

use {async_trait::async_trait, tracing::debug};

use crate::{
    address::LiveScope,
    channel_config::ChannelConfig,
    error::Result,
    scope::{ChannelSupport, NamespaceInfo, ScopeResolver, StaticChannelSupport},
};

/// What the scope needs to know about a data source.
#[derive(Clone)]
pub struct DataSourceMeta {
    pub uid: String,
    pub name: String,
    pub plugin_type: String,
    /// Whether the data source backend can stream at all.
    pub streaming: bool,
    /// Channel support declared by the data source plugin. Streaming data
    /// sources without one get a catch-all `{path}` config.
    pub channel_support: Option<Arc<dyn ChannelSupport>>,
}

/// Fetches data source metadata, typically from the server's data source API.
#[async_trait]
pub trait DataSourceLookup: Send + Sync {
    async fn get(&self, uid: &str) -> Result<Option<DataSourceMeta>>;
    async fn list(&self) -> Result<Vec<DataSourceMeta>>;
}

/// Resolver for the `ds` scope.
pub struct DataSourceScope {
    lookup: Arc<dyn DataSourceLookup>,
    default_support: Arc<dyn ChannelSupport>,
}

impl DataSourceScope {
    pub fn new(lookup: Arc<dyn DataSourceLookup>) -> Self {
        Self {
            lookup,
            default_support: Arc::new(StaticChannelSupport::new(vec![
                ChannelConfig::new("{path}").with_description("Data source stream"),
            ])),
        }
    }

    fn support_for(&self, meta: &DataSourceMeta) -> Option<Arc<dyn ChannelSupport>> {
        match meta.channel_support {
            Some(ref support) => Some(Arc::clone(support)),
            None if meta.streaming => Some(Arc::clone(&self.default_support)),
            None => None,
        }
    }
}

#[async_trait]
impl ScopeResolver for DataSourceScope {
    fn scope(&self) -> LiveScope {
        LiveScope::DataSource
    }

    async fn channel_support(&self, namespace: &str) -> Result<Option<Arc<dyn ChannelSupport>>> {
        let Some(meta) = self.lookup.get(namespace).await? else {
            debug!(uid = namespace, "data source not found");
            return Ok(None);
        };
        let support = self.support_for(&meta);
        if support.is_none() {
            debug!(uid = namespace, plugin = %meta.plugin_type, "data source does not stream");
        }
        Ok(support)
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        Ok(self
            .lookup
            .list()
            .await?
            .into_iter()
            .filter(|meta| self.support_for(meta).is_some())
            .map(|meta| NamespaceInfo {
                namespace: meta.uid,
                description: Some(format!("{} ({})", meta.name, meta.plugin_type)),
            })
            .collect())
    }
}
