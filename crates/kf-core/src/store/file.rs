//! JSON file backed Config Store

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{next_id, ConfigStore};
use crate::error::StoreError;
use crate::types::{ConfigId, Configuration};

/// Config Store persisted as a JSON array on disk
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so readers never observe a half-written file.
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Configuration>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => {
                let mut configs: Vec<Configuration> = serde_json::from_str(&content)?;
                configs.sort_by_key(|c| c.id);
                Ok(configs)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, configs: &[Configuration]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(configs)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn list(&self) -> Result<Vec<Configuration>, StoreError> {
        self.load().await
    }

    async fn get(&self, id: ConfigId) -> Result<Option<Configuration>, StoreError> {
        Ok(self.load().await?.into_iter().find(|c| c.id == id))
    }

    async fn save(&self, mut config: Configuration) -> Result<ConfigId, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut configs = self.load().await?;

        if config.id.is_unassigned() {
            config.id = next_id(configs.iter());
        }
        let id = config.id;

        match configs.iter_mut().find(|c| c.id == id) {
            Some(existing) => *existing = config,
            None => configs.push(config),
        }
        configs.sort_by_key(|c| c.id);

        self.persist(&configs).await?;
        tracing::debug!("Saved config {} to {:?}", id, self.path);
        Ok(id)
    }

    async fn delete(&self, id: ConfigId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut configs = self.load().await?;

        let before = configs.len();
        configs.retain(|c| c.id != id);
        if configs.len() == before {
            return Err(StoreError::NotFound(id));
        }

        self.persist(&configs).await?;
        tracing::debug!("Deleted config {} from {:?}", id, self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("configs.json"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("configs.json");

        let store = JsonFileStore::new(&path);
        let id = store
            .save(Configuration {
                target: "postgres".into(),
                remote_port: 5432,
                ..Default::default()
            })
            .await
            .unwrap();

        let reopened = JsonFileStore::new(&path);
        let config = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(config.target, "postgres");
        assert!(!path.with_extension("json.tmp").exists());

        reopened.delete(id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
