use std::collections::BTreeMap;

use {
    async_trait::async_trait,
    dashlive_config::DataSourceEntry,
    dashlive_live::{DataSourceLookup, DataSourceMeta, Result},
};

/// Data source lookup backed by the `[[datasources]]` config entries.
///
/// Entries carry no plugin-declared channel support, so streaming ones get
/// the scope's catch-all path.
pub struct ConfiguredDataSources {
    entries: BTreeMap<String, DataSourceEntry>,
}

impl ConfiguredDataSources {
    pub fn new(entries: &[DataSourceEntry]) -> Self {
        // Later duplicates win.
        let entries = entries
            .iter()
            .map(|e| (e.uid.clone(), e.clone()))
            .collect();
        Self { entries }
    }
}

fn to_meta(entry: &DataSourceEntry) -> DataSourceMeta {
    DataSourceMeta {
        uid: entry.uid.clone(),
        name: if entry.name.is_empty() {
            entry.uid.clone()
        } else {
            entry.name.clone()
        },
        plugin_type: entry.plugin_type.clone(),
        streaming: entry.streaming,
        channel_support: None,
    }
}

#[async_trait]
impl DataSourceLookup for ConfiguredDataSources {
    async fn get(&self, uid: &str) -> Result<Option<DataSourceMeta>> {
        Ok(self.entries.get(uid).map(to_meta))
    }

    async fn list(&self) -> Result<Vec<DataSourceMeta>> {
        Ok(self.entries.values().map(to_meta).collect())
    }
}
