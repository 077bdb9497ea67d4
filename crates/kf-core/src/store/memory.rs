//! In-memory Config Store

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{next_id, ConfigStore};
use crate::error::StoreError;
use crate::types::{ConfigId, Configuration};

/// Config Store held in memory, used by tests and ephemeral daemons
#[derive(Default)]
pub struct MemoryStore {
    configs: RwLock<BTreeMap<ConfigId, Configuration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with configurations, keeping their ids
    pub fn with_configs(configs: impl IntoIterator<Item = Configuration>) -> Self {
        Self {
            configs: RwLock::new(configs.into_iter().map(|c| (c.id, c)).collect()),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn list(&self) -> Result<Vec<Configuration>, StoreError> {
        Ok(self.configs.read().await.values().cloned().collect())
    }

    async fn get(&self, id: ConfigId) -> Result<Option<Configuration>, StoreError> {
        Ok(self.configs.read().await.get(&id).cloned())
    }

    async fn save(&self, mut config: Configuration) -> Result<ConfigId, StoreError> {
        let mut configs = self.configs.write().await;
        if config.id.is_unassigned() {
            config.id = next_id(configs.values());
        }
        let id = config.id;
        configs.insert(id, config);
        Ok(id)
    }

    async fn delete(&self, id: ConfigId) -> Result<(), StoreError> {
        self.configs
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
