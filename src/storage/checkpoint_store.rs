//! Persists `CheckpointState` records and supports lookup-by-name and
//! pairwise comparison between two checkpoints.

use super::console_store::ConsoleStore;
use super::screenshot_store::ScreenshotStore;
use super::StorageBase;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::types::{CheckpointState, StorageCategory, StorageRef};
use std::collections::HashMap;

pub struct CheckpointStore {
    base: StorageBase,
}

#[derive(Debug, Clone)]
pub struct CheckpointComparison {
    pub screenshot_diff_percentage: Option<f64>,
    pub html_changed: Option<bool>,
    pub console_error_count_delta: Option<i64>,
}

impl CheckpointStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            base: StorageBase::new(&config.storage_base_dir, "checkpoints"),
        }
    }

    pub async fn initialize(&self) -> Result<(), EngineError> {
        self.base.initialize().await
    }

    pub async fn store(&self, state: &CheckpointState) -> Result<StorageRef, EngineError> {
        let id = state.checkpoint_id.clone();
        let path = self.base.item_path(&id, "json");
        let size = self.base.write_json(&path, state).await?;

        let mut tags = HashMap::new();
        tags.insert("name".to_string(), state.name.clone());
        tags.insert("runId".to_string(), state.run_id.clone());
        tags.insert("status".to_string(), format!("{:?}", state.status));

        let guard = self.base.lock_index().await;
        self.append_index(&id, &state.name, &state.run_id).await?;
        drop(guard);

        let bytes = serde_json::to_vec(state).unwrap_or_default();
        Ok(self.base.create_ref(
            StorageCategory::Checkpoint,
            &state.test_id,
            None,
            &path,
            size,
            &bytes,
            tags,
        ))
    }

    pub async fn retrieve(&self, reference: &StorageRef) -> Result<CheckpointState, EngineError> {
        self.base
            .read_json(std::path::Path::new(&reference.path))
            .await
    }

    pub async fn update(
        &self,
        reference: &StorageRef,
        updated: &CheckpointState,
    ) -> Result<(), EngineError> {
        self.base
            .write_json(std::path::Path::new(&reference.path), updated)
            .await?;
        Ok(())
    }

    pub async fn get_by_name(
        &self,
        run_id: &str,
        name: &str,
    ) -> Result<Option<CheckpointState>, EngineError> {
        let index_path = self.base.namespace_dir().join("by_name.json");
        if !self.base.exists(&index_path).await {
            return Ok(None);
        }
        let index: HashMap<String, String> = self.base.read_json(&index_path).await?;
        let key = format!("{run_id}::{name}");
        match index.get(&key) {
            Some(id) => {
                let path = self.base.item_path(id, "json");
                Ok(Some(self.base.read_json(&path).await?))
            }
            None => Ok(None),
        }
    }

    /// Delegates to the screenshot comparer when both checkpoints have
    /// a screenshot, and separately flags HTML/console drift by byte
    /// and error-count comparison.
    pub async fn compare(
        &self,
        screenshot_store: &ScreenshotStore,
        console_store: &ConsoleStore,
        a: &CheckpointState,
        b: &CheckpointState,
    ) -> Result<CheckpointComparison, EngineError> {
        let screenshot_diff_percentage = match (&a.refs.screenshot, &b.refs.screenshot) {
            (Some(ref_a), Some(ref_b)) => {
                let buf_a = screenshot_store.retrieve(ref_a).await?;
                let buf_b = screenshot_store.retrieve(ref_b).await?;
                Some(ScreenshotStore::compare(&buf_a, &buf_b, 0.1)?.diff_percentage)
            }
            _ => None,
        };

        let html_changed = match (&a.refs.html, &b.refs.html) {
            (Some(ref_a), Some(ref_b)) => Some(ref_a.hash != ref_b.hash),
            _ => None,
        };

        let console_error_count_delta = match (&a.refs.console, &b.refs.console) {
            (Some(ref_a), Some(ref_b)) => {
                let summary_a = console_store.get_summary(ref_a).await?;
                let summary_b = console_store.get_summary(ref_b).await?;
                Some(summary_b.error_count as i64 - summary_a.error_count as i64)
            }
            _ => None,
        };

        Ok(CheckpointComparison {
            screenshot_diff_percentage,
            html_changed,
            console_error_count_delta,
        })
    }

    async fn append_index(&self, id: &str, name: &str, run_id: &str) -> Result<(), EngineError> {
        let index_path = self.base.namespace_dir().join("index.json");
        let mut index: Vec<serde_json::Value> = if self.base.exists(&index_path).await {
            self.base.read_json(&index_path).await.unwrap_or_default()
        } else {
            Vec::new()
        };
        index.push(serde_json::json!({ "id": id, "name": name, "runId": run_id }));
        self.base.write_json(&index_path, &index).await?;

        let by_name_path = self.base.namespace_dir().join("by_name.json");
        let mut by_name: HashMap<String, String> = if self.base.exists(&by_name_path).await {
            self.base.read_json(&by_name_path).await.unwrap_or_default()
        } else {
            HashMap::new()
        };
        by_name.insert(format!("{run_id}::{name}"), id.to_string());
        self.base.write_json(&by_name_path, &by_name).await?;
        Ok(())
    }
}
