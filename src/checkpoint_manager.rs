//! At a checkpoint, captures the requested artifact set via the
//! browser driver, persists each artifact through its store, populates
//! the checkpoint's refs, and drives the validator.

use crate::config::EngineConfig;
use crate::driver::BrowserDriver;
use crate::error::EngineError;
use crate::storage::checkpoint_store::{CheckpointComparison, CheckpointStore};
use crate::storage::console_store::ConsoleStore;
use crate::storage::dom_store::DomStore;
use crate::storage::screenshot_store::ScreenshotStore;
use crate::types::{CheckpointDefinition, CheckpointRefs, CheckpointState, CheckpointStatus, StorageRef};
use crate::validator;
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, error, info};

pub struct CheckpointManager {
    screenshot_store: ScreenshotStore,
    dom_store: DomStore,
    console_store: ConsoleStore,
    checkpoint_store: CheckpointStore,
}

impl CheckpointManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            screenshot_store: ScreenshotStore::new(config),
            dom_store: DomStore::new(config),
            console_store: ConsoleStore::new(config),
            checkpoint_store: CheckpointStore::new(config),
        }
    }

    pub async fn initialize(&self) -> Result<(), EngineError> {
        self.screenshot_store.initialize().await?;
        self.dom_store.initialize().await?;
        self.console_store.initialize().await?;
        self.checkpoint_store.initialize().await?;
        Ok(())
    }

    /// Captures, persists, validates, and stores a single checkpoint.
    /// Returns the resulting `CheckpointState` plus the flat list of
    /// artifact refs the orchestrator should fold into the run's
    /// artifact list. Capture failures propagate wrapped with the
    /// checkpoint's name, as a `CaptureFailed` error.
    pub async fn capture(
        &self,
        test_id: &str,
        run_id: &str,
        driver: &dyn BrowserDriver,
        checkpoint: &CheckpointDefinition,
    ) -> Result<(CheckpointState, Vec<StorageRef>), EngineError> {
        let start = Instant::now();
        let url = driver.get_url().await?;
        let mut refs = CheckpointRefs::default();
        let mut artifacts = Vec::new();
        let mut html: Option<String> = None;
        let mut console_entries: Option<Vec<crate::types::ConsoleLogEntry>> = None;

        if checkpoint.capture.screenshot {
            let png = driver.capture_screenshot(true).await.map_err(|e| wrap(checkpoint, e))?;
            let reference = self
                .screenshot_store
                .store(test_id, Some(&checkpoint.id), &png, &url)
                .await
                .map_err(|e| wrap(checkpoint, e))?;
            artifacts.push(reference.clone());
            refs.screenshot = Some(reference);
        }

        if checkpoint.capture.html {
            let captured = driver.get_dom().await.map_err(|e| wrap(checkpoint, e))?;
            let reference = self
                .dom_store
                .store(test_id, Some(&checkpoint.id), &captured, &url, None)
                .await
                .map_err(|e| wrap(checkpoint, e))?;
            artifacts.push(reference.clone());
            refs.html = Some(reference);
            html = Some(captured);
        }

        if checkpoint.capture.console {
            let entries = driver.get_console_logs().await.map_err(|e| wrap(checkpoint, e))?;
            let reference = self
                .console_store
                .store(test_id, Some(&checkpoint.id), &url, entries.clone())
                .await
                .map_err(|e| wrap(checkpoint, e))?;
            artifacts.push(reference.clone());
            refs.console = Some(reference);
            console_entries = Some(entries);
        }

        let (status, validations) = match &checkpoint.validations {
            Some(v) => {
                let outcome = validator::validate(v, html.as_deref(), console_entries.as_deref())
                    .map_err(|e| wrap(checkpoint, e))?;
                let status = if outcome.passed { CheckpointStatus::Passed } else { CheckpointStatus::Failed };
                (status, outcome.validations)
            }
            None => (CheckpointStatus::Passed, Vec::new()),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(checkpoint = %checkpoint.name, duration_ms, "checkpoint captured");
        if status == CheckpointStatus::Failed {
            info!(checkpoint = %checkpoint.name, "checkpoint validations failed");
        }

        let state = CheckpointState {
            checkpoint_id: checkpoint.id.clone(),
            test_id: test_id.to_string(),
            run_id: run_id.to_string(),
            name: checkpoint.name.clone(),
            timestamp: Utc::now(),
            refs,
            status,
            duration_ms,
            validations,
        };

        self.checkpoint_store.store(&state).await?;
        Ok((state, artifacts))
    }

    pub async fn retrieve_checkpoint(&self, reference: &StorageRef) -> Result<CheckpointState, EngineError> {
        self.checkpoint_store.retrieve(reference).await
    }

    pub async fn update_checkpoint(
        &self,
        reference: &StorageRef,
        updated: &CheckpointState,
    ) -> Result<(), EngineError> {
        self.checkpoint_store.update(reference, updated).await
    }

    pub async fn get_checkpoint_by_name(
        &self,
        run_id: &str,
        name: &str,
    ) -> Result<Option<CheckpointState>, EngineError> {
        self.checkpoint_store.get_by_name(run_id, name).await
    }

    pub async fn compare_checkpoints(
        &self,
        a: &CheckpointState,
        b: &CheckpointState,
    ) -> Result<CheckpointComparison, EngineError> {
        self.checkpoint_store
            .compare(&self.screenshot_store, &self.console_store, a, b)
            .await
    }
}

fn wrap(checkpoint: &CheckpointDefinition, e: EngineError) -> EngineError {
    match e {
        EngineError::CaptureFailed { .. } => e,
        other => {
            error!(checkpoint = %checkpoint.name, error = %other, "checkpoint capture failed");
            EngineError::CaptureFailed {
                checkpoint: checkpoint.name.clone(),
                reason: other.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ScriptedDriver;
    use crate::types::{CaptureFlags, DomAssertion, Validations};

    fn tmp_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.storage_base_dir = std::env::temp_dir().join(format!(
            "smoke-oracle-checkpoint-test-{}",
            crate::utils::generate_id("dir")
        ));
        config
    }

    #[tokio::test]
    async fn captures_requested_artifacts_and_stamps_passed() {
        let config = tmp_config();
        let manager = CheckpointManager::new(&config);
        manager.initialize().await.unwrap();
        let driver = ScriptedDriver::new("<html><body><h1>hi</h1></body></html>", vec![], vec![]);
        driver.navigate("https://example.test/").await.unwrap();

        let checkpoint = CheckpointDefinition {
            id: "c1".into(),
            name: "home".into(),
            description: None,
            capture: CaptureFlags {
                screenshot: false,
                html: true,
                console: true,
                network: false,
                performance: false,
            },
            validations: Some(Validations {
                dom: vec![DomAssertion::Exists { selector: "h1".into() }],
                console: None,
            }),
        };

        let (state, artifacts) = manager
            .capture("t1", "r1", &driver, &checkpoint)
            .await
            .unwrap();
        assert_eq!(state.status, CheckpointStatus::Passed);
        assert!(state.refs.html.is_some());
        assert!(state.refs.console.is_some());
        assert_eq!(artifacts.len(), 2);

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }
}
