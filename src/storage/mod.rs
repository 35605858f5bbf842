//! Shared filesystem layout every concrete store builds on: directory
//! initialization, id/hash generation, JSON/binary I/O, metadata
//! sidecars, and `StorageRef` creation.

pub mod checkpoint_store;
pub mod console_store;
pub mod dom_store;
pub mod screenshot_store;

use crate::error::EngineError;
use crate::types::{StorageCategory, StorageRef};
use crate::utils::content_hash;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Base directory plus namespace, with a single-writer lock guarding
/// index read-modify-write cycles so concurrent stores sharing one
/// namespace don't lose index entries.
pub struct StorageBase {
    base_dir: PathBuf,
    namespace: &'static str,
    index_lock: Mutex<()>,
}

impl StorageBase {
    pub fn new(base_dir: impl Into<PathBuf>, namespace: &'static str) -> Self {
        Self {
            base_dir: base_dir.into(),
            namespace,
            index_lock: Mutex::new(()),
        }
    }

    pub fn namespace_dir(&self) -> PathBuf {
        self.base_dir.join(self.namespace)
    }

    pub async fn initialize(&self) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(self.namespace_dir())
            .await
            .map_err(|e| self.storage_err(self.namespace_dir(), e))?;
        Ok(())
    }

    pub fn generate_id(&self, prefix: &str) -> String {
        crate::utils::generate_id(prefix)
    }

    pub fn item_path(&self, id: &str, ext: &str) -> PathBuf {
        self.namespace_dir().join(format!("{id}.{ext}"))
    }

    fn storage_err(&self, path: impl Into<PathBuf>, e: impl std::fmt::Display) -> EngineError {
        EngineError::StorageError {
            path: path.into(),
            reason: e.to_string(),
        }
    }

    pub async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<u64, EngineError> {
        let json = serde_json::to_string_pretty(value).map_err(EngineError::SerializationError)?;
        tokio::fs::write(path, &json)
            .await
            .map_err(|e| self.storage_err(path, e))?;
        Ok(json.len() as u64)
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, EngineError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| self.storage_err(path, e))?;
        serde_json::from_slice(&bytes).map_err(EngineError::SerializationError)
    }

    pub async fn write_binary(&self, path: &Path, bytes: &[u8]) -> Result<u64, EngineError> {
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| self.storage_err(path, e))?;
        Ok(bytes.len() as u64)
    }

    pub async fn read_binary(&self, path: &Path) -> Result<Vec<u8>, EngineError> {
        tokio::fs::read(path)
            .await
            .map_err(|e| self.storage_err(path, e))
    }

    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    pub async fn delete(&self, path: &Path) -> Result<(), EngineError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| self.storage_err(path, e))
    }

    /// Non-dotfile entries directly under the namespace directory.
    pub async fn list(&self) -> Result<Vec<PathBuf>, EngineError> {
        let dir = self.namespace_dir();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| self.storage_err(&dir, e))?;
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.storage_err(&dir, e))?
        {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with('.') {
                out.push(entry.path());
            }
        }
        Ok(out)
    }

    pub async fn store_metadata<T: Serialize>(&self, id: &str, meta: &T) -> Result<(), EngineError> {
        let path = self.item_path(id, "meta.json");
        self.write_json(&path, meta).await?;
        Ok(())
    }

    pub async fn get_metadata<T: DeserializeOwned>(&self, id: &str) -> Result<T, EngineError> {
        let path = self.item_path(id, "meta.json");
        self.read_json(&path).await
    }

    /// Acquire the single-writer lock for an index read-modify-write
    /// cycle. Callers hold the guard for the duration of the update.
    pub async fn lock_index(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.index_lock.lock().await
    }

    pub fn create_ref(
        &self,
        category: StorageCategory,
        test_id: &str,
        step_id: Option<&str>,
        path: &Path,
        size: u64,
        hash_source: &[u8],
        tags: HashMap<String, String>,
    ) -> StorageRef {
        StorageRef {
            category,
            test_id: test_id.to_string(),
            step_id: step_id.map(|s| s.to_string()),
            path: path.to_string_lossy().to_string(),
            size,
            hash: content_hash(hash_source),
            timestamp: Utc::now(),
            compressed: false,
            tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_creates_namespace_dir() {
        let dir = tempdir();
        let base = StorageBase::new(dir.path(), "screenshots");
        base.initialize().await.unwrap();
        assert!(base.namespace_dir().is_dir());
    }

    #[tokio::test]
    async fn json_round_trips() {
        let dir = tempdir();
        let base = StorageBase::new(dir.path(), "checkpoints");
        base.initialize().await.unwrap();
        let path = base.item_path("abc", "json");
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Sample {
            value: u32,
        }
        base.write_json(&path, &Sample { value: 7 }).await.unwrap();
        let read: Sample = base.read_json(&path).await.unwrap();
        assert_eq!(read, Sample { value: 7 });
    }

    fn tempdir() -> TempDirGuard {
        TempDirGuard::new()
    }

    /// Minimal scratch-directory helper, avoids a `tempfile` dev-dependency
    /// for what's otherwise a handful of store tests.
    struct TempDirGuard {
        path: PathBuf,
    }

    impl TempDirGuard {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "smoke-oracle-test-{}",
                crate::utils::generate_id("dir")
            ));
            std::fs::create_dir_all(&path).unwrap();
            Self { path }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
