//! Built-in feature namespaces under the `grafana` scope.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    address::LiveScope,
    channel_config::{ChannelConfig, ChannelHandler},
    error::Result,
    scope::{ChannelSupport, NamespaceInfo, ScopeResolver, StaticChannelSupport},
};

/// Allows publishing; payloads pass through untouched.
struct Publishable;

impl ChannelHandler for Publishable {
    fn can_publish(&self) -> bool {
        true
    }
}

struct Feature {
    description: &'static str,
    support: Arc<dyn ChannelSupport>,
}

/// Resolver for built-in features (`testdata`, `broadcast`, `dashboard`,
/// `stream`). Extra features can be registered at construction time.
pub struct GrafanaScope {
    features: BTreeMap<String, Feature>,
}

impl Default for GrafanaScope {
    fn default() -> Self {
        Self::new()
    }
}

impl GrafanaScope {
    pub fn new() -> Self {
        let publishable: Arc<dyn ChannelHandler> = Arc::new(Publishable);

        let testdata = StaticChannelSupport::new(vec![
            ChannelConfig::new("random-2s-stream")
                .with_description("Random stream with points every 2s"),
            ChannelConfig::new("random-flakey-stream")
                .with_description("Random stream with flakey data points"),
            ChannelConfig::new("random-labeled-stream")
                .with_description("Value with moving labels"),
            ChannelConfig::new("random-20Hz-stream")
                .with_description("Random stream with points in 20Hz"),
        ]);
        let broadcast = StaticChannelSupport::new(vec![
            ChannelConfig::new("{path}")
                .with_description("Broadcast any message to every subscriber")
                .with_handler(Arc::clone(&publishable)),
        ]);
        let dashboard = StaticChannelSupport::new(vec![
            ChannelConfig::new("uid/{uid}")
                .with_description("Dashboard change events")
                .describe_variable("uid", "dashboard uid")
                .with_presence()
                .with_handler(Arc::clone(&publishable)),
        ]);
        let stream = StaticChannelSupport::new(vec![
            ChannelConfig::new("{stream}").with_description("Measurements pushed over HTTP"),
        ]);

        Self::empty()
            .with_feature("testdata", "Test data generators", Arc::new(testdata))
            .with_feature("broadcast", "Client-to-client messages", Arc::new(broadcast))
            .with_feature("dashboard", "Dashboard activity", Arc::new(dashboard))
            .with_feature("stream", "Pushed measurement streams", Arc::new(stream))
    }

    /// A resolver with no features registered.
    pub fn empty() -> Self {
        Self {
            features: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_feature(
        mut self,
        namespace: impl Into<String>,
        description: &'static str,
        support: Arc<dyn ChannelSupport>,
    ) -> Self {
        self.features.insert(namespace.into(), Feature {
            description,
            support,
        });
        self
    }
}

#[async_trait]
impl ScopeResolver for GrafanaScope {
    fn scope(&self) -> LiveScope {
        LiveScope::Grafana
    }

    async fn channel_support(&self, namespace: &str) -> Result<Option<Arc<dyn ChannelSupport>>> {
        Ok(self
            .features
            .get(namespace)
            .map(|f| Arc::clone(&f.support)))
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        Ok(self
            .features
            .iter()
            .map(|(name, f)| NamespaceInfo {
                namespace: name.clone(),
                description: Some(f.description.to_string()),
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn testdata_streams_are_read_only() {
        let scope = GrafanaScope::new();
        let support = scope.channel_support("testdata").await.unwrap().unwrap();
        let cfg = support.channel_config("random-2s-stream").unwrap();
        assert!(!cfg.can_publish());
        assert!(!cfg.has_presence);
        assert!(support.channel_config("random-3s-stream").is_none());
        assert_eq!(support.supported_paths().len(), 4);
    }

    #[tokio::test]
    async fn dashboard_channels_have_presence_and_publish() {
        let scope = GrafanaScope::new();
        let support = scope.channel_support("dashboard").await.unwrap().unwrap();
        let cfg = support.channel_config("uid/abc").unwrap();
        assert!(cfg.has_presence);
        assert!(cfg.can_publish());
        assert!(support.channel_config("abc").is_none());
    }

    #[tokio::test]
    async fn unknown_feature_is_unsupported() {
        let scope = GrafanaScope::new();
        assert!(scope.channel_support("alerting").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_features_sorted() {
        let names: Vec<_> = GrafanaScope::new()
            .list_namespaces()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.namespace)
            .collect();
        assert_eq!(names, ["broadcast", "dashboard", "stream", "testdata"]);
    }
}
