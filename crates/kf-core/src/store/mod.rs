//! Config Store: durable table of forwarding configurations
//!
//! The orchestrator only reads from the store; the CLI and desktop client
//! write through the IPC config commands.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{ConfigId, Configuration};

/// CRUD plus import/export over stored configurations
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// All configurations, ordered by id
    async fn list(&self) -> Result<Vec<Configuration>, StoreError>;

    /// One configuration, if present
    async fn get(&self, id: ConfigId) -> Result<Option<Configuration>, StoreError>;

    /// Insert or update; id 0 assigns the next free id. Returns the stored id.
    async fn save(&self, config: Configuration) -> Result<ConfigId, StoreError>;

    /// Remove a configuration; missing ids are an error
    async fn delete(&self, id: ConfigId) -> Result<(), StoreError>;

    /// Append configurations from a JSON array, assigning fresh ids
    async fn import(&self, json: &str) -> Result<Vec<ConfigId>, StoreError> {
        let configs: Vec<Configuration> = serde_json::from_str(json)
            .map_err(|e| StoreError::InvalidImport(e.to_string()))?;

        let mut ids = Vec::with_capacity(configs.len());
        for mut config in configs {
            config.id = ConfigId::default();
            ids.push(self.save(config).await?);
        }
        Ok(ids)
    }

    /// All configurations as a pretty-printed JSON array
    async fn export(&self) -> Result<String, StoreError> {
        let configs = self.list().await?;
        Ok(serde_json::to_string_pretty(&configs)?)
    }
}

/// Next id after the highest one in use
fn next_id<'a>(configs: impl Iterator<Item = &'a Configuration>) -> ConfigId {
    ConfigId(configs.map(|c| c.id.0).max().unwrap_or(0) + 1)
}
