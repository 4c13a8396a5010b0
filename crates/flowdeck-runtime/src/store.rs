//! State stores
//!
//! A state store keeps `FlowState` snapshots of instances whose flow has
//! `settings.persist_state` set. The engine saves after every change and
//! deletes on completion or cancellation.

use async_trait::async_trait;
use dashmap::DashMap;
use flowdeck_core::{FlowError, FlowResult, FlowState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Snapshot of one instance as written to a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredInstance {
    pub instance_id: String,

    /// The flow's persistence key at save time
    pub persistence_key: String,

    pub state: FlowState,
}

/// Persistence backend for instance snapshots
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, record: &StoredInstance) -> FlowResult<()>;

    async fn load(&self, instance_id: &str) -> FlowResult<Option<StoredInstance>>;

    async fn delete(&self, instance_id: &str) -> FlowResult<()>;

    /// Ids of every stored instance, sorted
    async fn list(&self) -> FlowResult<Vec<String>>;
}

/// Process-local store, mostly for tests
#[derive(Default)]
pub struct InMemoryStateStore {
    records: DashMap<String, StoredInstance>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, record: &StoredInstance) -> FlowResult<()> {
        self.records
            .insert(record.instance_id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> FlowResult<Option<StoredInstance>> {
        Ok(self.records.get(instance_id).map(|r| r.value().clone()))
    }

    async fn delete(&self, instance_id: &str) -> FlowResult<()> {
        self.records.remove(instance_id);
        Ok(())
    }

    async fn list(&self) -> FlowResult<Vec<String>> {
        let mut ids: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

/// One pretty-printed JSON file per instance in a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open (and create if needed) a store directory
    pub async fn new(dir: impl Into<PathBuf>) -> FlowResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            FlowError::store(format!("failed to create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, instance_id: &str) -> PathBuf {
        let name: String = instance_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    async fn read_record(path: &Path) -> FlowResult<StoredInstance> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            FlowError::store(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            FlowError::store(format!("failed to parse {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, record: &StoredInstance) -> FlowResult<()> {
        let path = self.path_for(&record.instance_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record)?;

        tokio::fs::write(&tmp, content).await.map_err(|e| {
            FlowError::store(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            FlowError::store(format!("failed to replace {}: {}", path.display(), e))
        })?;

        debug!("Saved instance {} to {}", record.instance_id, path.display());
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> FlowResult<Option<StoredInstance>> {
        let path = self.path_for(instance_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let record = Self::read_record(&path).await?;
        // Sanitized file names can collide; the record carries the real id
        if record.instance_id != instance_id {
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn delete(&self, instance_id: &str) -> FlowResult<()> {
        let path = self.path_for(instance_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FlowError::store(format!(
                "failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn list(&self) -> FlowResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            FlowError::store(format!("failed to read {}: {}", self.dir.display(), e))
        })?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                ids.push(Self::read_record(&path).await?.instance_id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeck_core::FlowData;

    fn record(id: &str, step: &str) -> StoredInstance {
        StoredInstance {
            instance_id: id.into(),
            persistence_key: "onboarding".into(),
            state: FlowState::new("onboarding", step, 0, FlowData::new()),
        }
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryStateStore::new();
        assert!(store.load("a").await.unwrap().is_none());

        store.save(&record("a", "s1")).await.unwrap();
        store.save(&record("a", "s2")).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load("a").await.unwrap().unwrap().state.current_step_id, "s2");

        store.delete("a").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("states")).await.unwrap();

        let saved = record("flow-1-onboarding-1700000000000", "profile");
        store.save(&saved).await.unwrap();

        let loaded = store.load(&saved.instance_id).await.unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(store.list().await.unwrap(), vec![saved.instance_id.clone()]);

        store.delete(&saved.instance_id).await.unwrap();
        assert!(store.load(&saved.instance_id).await.unwrap().is_none());
        // Deleting twice is fine
        store.delete(&saved.instance_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_sanitizes_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).await.unwrap();

        store.save(&record("a/b", "s1")).await.unwrap();
        assert!(dir.path().join("a_b.json").exists());
        assert!(store.load("a/b").await.unwrap().is_some());
        assert!(store.load("a_b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let err = store.load("broken").await.unwrap_err();
        assert!(matches!(err, FlowError::Store(_)));
    }
}
