//! Plugin namespaces under the `plugin` scope.

use std::{collections::HashMap, sync::Arc};

use {async_trait::async_trait, tokio::sync::RwLock, tracing::info};

use crate::{
    address::LiveScope,
    error::Result,
    scope::{ChannelSupport, NamespaceInfo, ScopeResolver},
};

/// Resolver for the `plugin` scope. Plugins register their channel support
/// when they load; lookups for unregistered plugins resolve to `None`.
#[derive(Default)]
pub struct PluginScope {
    plugins: RwLock<HashMap<String, Arc<dyn ChannelSupport>>>,
}

impl PluginScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, plugin_id: impl Into<String>, support: Arc<dyn ChannelSupport>) {
        let plugin_id = plugin_id.into();
        info!(plugin = %plugin_id, "registered plugin channel support");
        self.plugins.write().await.insert(plugin_id, support);
    }

    pub async fn unregister(&self, plugin_id: &str) -> bool {
        self.plugins.write().await.remove(plugin_id).is_some()
    }
}

#[async_trait]
impl ScopeResolver for PluginScope {
    fn scope(&self) -> LiveScope {
        LiveScope::Plugin
    }

    async fn channel_support(&self, namespace: &str) -> Result<Option<Arc<dyn ChannelSupport>>> {
        Ok(self.plugins.read().await.get(namespace).cloned())
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        let plugins = self.plugins.read().await;
        let mut names: Vec<_> = plugins
            .keys()
            .map(|id| NamespaceInfo {
                namespace: id.clone(),
                description: None,
            })
            .collect();
        names.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        Ok(names)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::{channel_config::ChannelConfig, scope::StaticChannelSupport},
    };

    #[tokio::test]
    async fn registered_plugins_resolve() {
        let scope = PluginScope::new();
        assert!(scope.channel_support("grafana-iot-app").await.unwrap().is_none());

        scope
            .register(
                "grafana-iot-app",
                Arc::new(StaticChannelSupport::new(vec![ChannelConfig::new("device/{id}")])),
            )
            .await;
        let support = scope.channel_support("grafana-iot-app").await.unwrap().unwrap();
        assert!(support.channel_config("device/42").is_some());

        assert!(scope.unregister("grafana-iot-app").await);
        assert!(scope.list_namespaces().await.unwrap().is_empty());
    }
}
