//! Persistence for [`InstanceState`].
//!
//! The orchestrator saves after every milestone, so a crash mid-deploy leaves
//! a record of exactly what was created.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::InstanceState;
use crate::errors::DeployError;

/// Storage backend for instance state, keyed by instance key.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads state; a missing entry is an empty state.
    async fn load(&self, key: &str) -> Result<InstanceState, DeployError>;

    /// Persists state, replacing any previous value.
    async fn save(&self, key: &str, state: &InstanceState) -> Result<(), DeployError>;

    /// Deletes state.
    async fn clear(&self, key: &str) -> Result<(), DeployError>;
}

/// In-memory state store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStateStore {
    entries: Arc<Mutex<HashMap<String, InstanceState>>>,
    saves: Arc<Mutex<usize>>,
}

impl InMemoryStateStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored state without going through the trait.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<InstanceState> {
        self.entries.lock().get(key).cloned()
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, key: &str) -> Result<InstanceState, DeployError> {
        Ok(self.entries.lock().get(key).cloned().unwrap_or_default())
    }

    async fn save(&self, key: &str, state: &InstanceState) -> Result<(), DeployError> {
        self.entries.lock().insert(key.to_string(), state.clone());
        *self.saves.lock() += 1;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), DeployError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// File-backed state store.
///
/// Each instance is stored as `{dir}/{key}.json`, written to a temporary file
/// first and renamed into place.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, DeployError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DeployError::storage(format!("failed to create state dir: {e}")))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, key: &str) -> Result<InstanceState, DeployError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| DeployError::storage(format!("failed to parse state: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InstanceState::default()),
            Err(e) => Err(DeployError::storage(format!("failed to read state: {e}"))),
        }
    }

    async fn save(&self, key: &str, state: &InstanceState) -> Result<(), DeployError> {
        let content = serde_json::to_string_pretty(state)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| DeployError::storage(format!("failed to write state: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| DeployError::storage(format!("failed to replace state: {e}")))?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), DeployError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::storage(format!("failed to delete state: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RoleRecord;
    use pretty_assertions::assert_eq;

    fn sample_state() -> InstanceState {
        InstanceState {
            name: Some("express-abc12345".to_string()),
            region: Some("us-east-1".to_string()),
            role: Some(RoleRecord {
                name: "express-abc12345-lambda-role".to_string(),
                arn: "arn:aws:iam::123456789012:role/express-abc12345-lambda-role".to_string(),
                created: true,
            }),
            ..InstanceState::default()
        }
    }

    #[tokio::test]
    async fn test_in_memory_store_lifecycle() {
        let store = InMemoryStateStore::new();
        assert!(store.load("dev").await.unwrap().is_empty());

        store.save("dev", &sample_state()).await.unwrap();
        assert_eq!(store.load("dev").await.unwrap(), sample_state());
        assert_eq!(store.save_count(), 1);

        store.clear("dev").await.unwrap();
        assert!(store.snapshot("dev").is_none());
    }

    #[tokio::test]
    async fn test_file_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state")).await.unwrap();

        assert!(store.load("app/dev").await.unwrap().is_empty());

        store.save("app/dev", &sample_state()).await.unwrap();
        let reopened = FileStateStore::new(dir.path().join("state")).await.unwrap();
        assert_eq!(reopened.load("app/dev").await.unwrap(), sample_state());
        assert!(dir.path().join("state").join("app_dev.json").exists());

        reopened.clear("app/dev").await.unwrap();
        reopened.clear("app/dev").await.unwrap();
        assert!(reopened.load("app/dev").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), "{not json")
            .await
            .unwrap();

        let result = store.load("broken").await;
        assert!(matches!(result, Err(DeployError::Storage(_))));
    }
}
