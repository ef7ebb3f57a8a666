//! Durable checkpoint persistence for resumable pipeline runs.
//!
//! One record per job id: the index of the last fully-completed stage plus
//! the accumulated results up to that point. The file-backed store keeps
//! one JSON file per job under a configurable directory.

use crate::errors::EngineError;
use crate::result::StageResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default directory for file-backed checkpoints.
pub const DEFAULT_CHECKPOINT_DIR: &str = "checkpoints";

/// A persisted record of pipeline progress for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the last fully-completed stage (-1 means none).
    pub last_completed_stage_index: i64,
    /// ISO 8601 timestamp of when the checkpoint was written.
    pub timestamp: String,
    /// Accumulated per-stage results up to the checkpoint.
    pub results: HashMap<String, StageResult>,
}

/// Storage backend for checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the checkpoint for a job id, if one exists.
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, EngineError>;

    /// Saves (creates or overwrites) the checkpoint for a job id.
    async fn save(&self, job_id: &str, checkpoint: &Checkpoint) -> Result<(), EngineError>;

    /// Deletes the checkpoint for a job id. Deleting a missing checkpoint
    /// is not an error.
    async fn delete(&self, job_id: &str) -> Result<(), EngineError>;
}

/// In-memory checkpoint store for tests.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: Arc<Mutex<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no checkpoints are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        Ok(self.entries.lock().get(job_id).cloned())
    }

    async fn save(&self, job_id: &str, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        self.entries.lock().insert(job_id.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<(), EngineError> {
        self.entries.lock().remove(job_id);
        Ok(())
    }
}

/// File-backed checkpoint store: one JSON file per job id.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at the given directory.
    ///
    /// The directory is created lazily on the first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the checkpoint directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file path for a job id.
    ///
    /// Job ids are arbitrary strings, so the file name is the hex SHA-256
    /// of the id rather than the id itself.
    #[must_use]
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(job_id.as_bytes());
        let digest = hasher.finalize();
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }
}

impl Default for FileCheckpointStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_DIR)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        let path = self.path_for(job_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(EngineError::Io(err)),
        };

        let checkpoint = serde_json::from_slice(&bytes)?;
        Ok(Some(checkpoint))
    }

    async fn save(&self, job_id: &str, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(self.path_for(job_id), json).await?;
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<(), EngineError> {
        match tokio::fs::remove_file(self.path_for(job_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EngineError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::iso_timestamp;
    use pretty_assertions::assert_eq;

    fn sample_checkpoint() -> Checkpoint {
        let mut results = HashMap::new();
        results.insert(
            "analyze".to_string(),
            StageResult::ok_value("report", serde_json::json!({"nested": [1, 2, {"k": "v"}]})),
        );
        Checkpoint {
            last_completed_stage_index: 0,
            timestamp: iso_timestamp(),
            results,
        }
    }

    #[test]
    fn test_in_memory_store_round_trip() {
        tokio_test::block_on(async {
            let store = InMemoryCheckpointStore::new();
            assert!(store.is_empty());

            store.save("card-1", &sample_checkpoint()).await.unwrap();
            assert_eq!(store.len(), 1);

            let loaded = store.load("card-1").await.unwrap().unwrap();
            assert_eq!(loaded.last_completed_stage_index, 0);

            store.delete("card-1").await.unwrap();
            assert!(store.load("card-1").await.unwrap().is_none());
        });
    }

    #[tokio::test]
    async fn test_file_store_round_trip_preserves_nested_values() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(tmp.path());

        let checkpoint = sample_checkpoint();
        store.save("card/with:odd ids", &checkpoint).await.unwrap();

        let loaded = store.load("card/with:odd ids").await.unwrap().unwrap();
        assert_eq!(
            loaded.results["analyze"].get("report"),
            checkpoint.results["analyze"].get("report")
        );
    }

    #[tokio::test]
    async fn test_file_store_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(tmp.path());

        assert!(store.load("never-saved").await.unwrap().is_none());
        // Deleting a missing checkpoint is fine.
        store.delete("never-saved").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(tmp.path());

        let mut checkpoint = sample_checkpoint();
        store.save("card-1", &checkpoint).await.unwrap();

        checkpoint.last_completed_stage_index = 3;
        store.save("card-1", &checkpoint).await.unwrap();

        let loaded = store.load("card-1").await.unwrap().unwrap();
        assert_eq!(loaded.last_completed_stage_index, 3);
    }

    #[test]
    fn test_path_for_is_stable_and_safe() {
        let store = FileCheckpointStore::new("checkpoints");
        let a = store.path_for("card-1");
        let b = store.path_for("card-1");
        let c = store.path_for("card-2");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.to_string_lossy().ends_with(".json"));
    }
}
