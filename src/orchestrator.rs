//! Drives one end-to-end run: mints the run's UUID, executes
//! `beforeAll` → `steps` → `afterAll`, routing checkpoint steps to the
//! checkpoint manager and everything else to the runner, and produces
//! the final `TestResult`.

use crate::browser_pool::BrowserPool;
use crate::checkpoint_manager::CheckpointManager;
use crate::config::EngineConfig;
use crate::driver::BrowserDriver;
use crate::error::{CircuitBreaker, CircuitState, EngineError};
use crate::metrics::Metrics;
use crate::runner;
use crate::types::{
    CheckpointState, RunError, RunStatus, StorageRef, TestDefinition, TestResult, TestStep,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Failure threshold and recovery window for the run-level circuit
/// breaker.
const CIRCUIT_FAILURE_THRESHOLD: usize = 3;
const CIRCUIT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Carries whatever checkpoints/artifacts `execute_sequence` had already
/// captured and durably persisted before the step or capture that failed,
/// so a partial run's already-written artifacts aren't orphaned from the
/// final `TestResult`.
struct SequenceFailure {
    error: EngineError,
    checkpoints: Vec<CheckpointState>,
    artifacts: Vec<StorageRef>,
}

pub struct Orchestrator {
    config: EngineConfig,
    browser_pool: Option<Arc<BrowserPool>>,
    checkpoint_manager: CheckpointManager,
    circuit_breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    /// Production constructor: owns a browser pool so `run()` can check
    /// out a fresh `BrowserHandle` per attempt.
    pub async fn new(config: EngineConfig, browser_pool: Arc<BrowserPool>) -> Result<Self, EngineError> {
        Self::with_metrics(config, Some(browser_pool), Arc::new(Metrics::new())).await
    }

    /// Same as `new`, but shares the caller's `Metrics` handle instead of
    /// minting a fresh noop-recorder set.
    pub async fn with_metrics(
        config: EngineConfig,
        browser_pool: Option<Arc<BrowserPool>>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, EngineError> {
        let checkpoint_manager = CheckpointManager::new(&config);
        checkpoint_manager.initialize().await?;
        Ok(Self {
            config,
            browser_pool,
            checkpoint_manager,
            circuit_breaker: CircuitBreaker::new(CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_RECOVERY_TIMEOUT),
            metrics,
        })
    }

    /// Test/tooling constructor: no browser pool, drives a caller-supplied
    /// driver via `run_with_driver` instead of `run`.
    pub async fn without_pool(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_metrics(config, None, Arc::new(Metrics::new())).await
    }

    /// Checks out one `BrowserHandle` per attempt from the pool, retries
    /// the whole sequence through the circuit breaker when
    /// `definition.retry_count > 0`, and guarantees the handle (and thus
    /// the underlying page) is released back to the pool on every path.
    pub async fn run(&self, definition: &TestDefinition) -> Result<TestResult, EngineError> {
        definition.validate().map_err(EngineError::ConfigurationError)?;

        let pool = self
            .browser_pool
            .as_ref()
            .ok_or_else(|| EngineError::ConfigurationError("orchestrator has no browser pool".into()))?;

        let attempts = 1 + definition.retry_count;
        let mut last_result: Option<TestResult> = None;

        for attempt in 0..attempts {
            if !self.circuit_breaker.can_execute().await {
                warn!(test_id = %definition.id, "circuit breaker open, refusing run attempt");
                return Err(EngineError::BrowserUnavailable("circuit breaker open".into()));
            }

            let handle = pool.get_browser().await?;
            let stats = pool.get_stats().await;
            self.metrics.record_browser_usage(stats.busy_instances, stats.total_instances);
            let driver = handle.new_driver().await?;
            let _ = driver
                .set_viewport(definition.viewport.width, definition.viewport.height)
                .await;

            let result = self.run_with_driver(definition, &driver).await;
            let _ = driver.close().await;
            drop(handle);

            match result.status {
                RunStatus::Error => {
                    self.circuit_breaker.record_failure().await;
                    if self.circuit_breaker.get_state().await == CircuitState::Open {
                        self.metrics.record_circuit_trip();
                    }
                    last_result = Some(result);
                    if attempt + 1 < attempts {
                        info!(test_id = %definition.id, attempt, "run errored, retrying");
                        continue;
                    }
                }
                _ => {
                    self.circuit_breaker.record_success().await;
                    return Ok(result);
                }
            }
        }

        Ok(last_result.expect("attempts is always >= 1"))
    }

    /// The shared single-attempt execution path: mints a run id, races
    /// the sequence against the per-test timeout when declared, and
    /// builds the final `TestResult`. Used directly by callers that
    /// already hold a driver (tests, the `inspect`/scripted paths) and
    /// internally by `run`'s retry loop.
    pub async fn run_with_driver(&self, definition: &TestDefinition, driver: &dyn BrowserDriver) -> TestResult {
        if let Err(e) = definition.validate().map_err(EngineError::ConfigurationError) {
            let now = Utc::now();
            return TestResult {
                test_id: definition.id.clone(),
                run_id: uuid::Uuid::new_v4().to_string(),
                status: RunStatus::Error,
                started_at: now,
                ended_at: now,
                duration_ms: 0,
                checkpoints: Vec::new(),
                artifacts: Vec::new(),
                error: Some(RunError { message: e.to_string(), stack: None }),
            };
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();

        let outcome = match definition.timeout_ms {
            Some(ms) => {
                let bound = Duration::from_millis(ms);
                match tokio::time::timeout(bound, self.execute_sequence(definition, &run_id, driver)).await {
                    Ok(inner) => inner,
                    Err(_) => Err(SequenceFailure {
                        error: EngineError::Timeout(bound),
                        checkpoints: Vec::new(),
                        artifacts: Vec::new(),
                    }),
                }
            }
            None => self.execute_sequence(definition, &run_id, driver).await,
        };

        self.finish(definition, run_id, started_at, outcome)
    }

    async fn execute_sequence(
        &self,
        definition: &TestDefinition,
        run_id: &str,
        driver: &dyn BrowserDriver,
    ) -> Result<(Vec<CheckpointState>, Vec<StorageRef>), SequenceFailure> {
        let wait_timeout = self.config.default_wait_timeout;
        let mut checkpoints = Vec::new();
        let mut artifacts = Vec::new();

        for step in definition
            .before_all
            .iter()
            .chain(definition.steps.iter())
            .chain(definition.after_all.iter())
        {
            match step {
                TestStep::Checkpoint { checkpoint, .. } => {
                    let captured = self
                        .checkpoint_manager
                        .capture(&definition.id, run_id, driver, checkpoint)
                        .await;
                    self.metrics.record_storage_write(captured.is_ok());
                    let (state, refs) = match captured {
                        Ok(pair) => pair,
                        Err(error) => return Err(SequenceFailure { error, checkpoints, artifacts }),
                    };
                    self.metrics.record_checkpoint(
                        Duration::from_millis(state.duration_ms),
                        state.status == crate::types::CheckpointStatus::Passed,
                    );
                    for validation in &state.validations {
                        self.metrics.record_validation(validation.passed);
                    }
                    artifacts.extend(refs);
                    checkpoints.push(state);
                }
                other => {
                    let outcome = runner::execute_step(driver, other, wait_timeout).await;
                    if !outcome.success {
                        let error = EngineError::StepFailed {
                            verb: other.verb().to_string(),
                            locator: other.id().to_string(),
                            reason: outcome.error.unwrap_or_else(|| "step failed".to_string()),
                        };
                        return Err(SequenceFailure { error, checkpoints, artifacts });
                    }
                }
            }
        }

        Ok((checkpoints, artifacts))
    }

    fn finish(
        &self,
        definition: &TestDefinition,
        run_id: String,
        started_at: chrono::DateTime<Utc>,
        outcome: Result<(Vec<CheckpointState>, Vec<StorageRef>), SequenceFailure>,
    ) -> TestResult {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

        match outcome {
            Ok((checkpoints, artifacts)) => {
                let status = if checkpoints
                    .iter()
                    .any(|c| c.status == crate::types::CheckpointStatus::Failed)
                {
                    RunStatus::Failed
                } else {
                    RunStatus::Passed
                };
                info!(test_id = %definition.id, run_id = %run_id, ?status, duration_ms, "run finished");
                TestResult {
                    test_id: definition.id.clone(),
                    run_id,
                    status,
                    started_at,
                    ended_at,
                    duration_ms,
                    checkpoints,
                    artifacts,
                    error: None,
                }
            }
            Err(SequenceFailure { error, checkpoints, artifacts }) => {
                error!(test_id = %definition.id, run_id = %run_id, error = %error, "run failed");
                TestResult {
                    test_id: definition.id.clone(),
                    run_id,
                    status: RunStatus::Error,
                    started_at,
                    ended_at,
                    duration_ms,
                    checkpoints,
                    artifacts,
                    error: Some(RunError { message: error.to_string(), stack: None }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ScriptedDriver;
    use crate::types::{
        CaptureFlags, CheckpointDefinition, DomAssertion, NavigateOptions, Validations, Viewport,
    };
    use std::collections::HashMap;

    fn tmp_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.storage_base_dir = std::env::temp_dir().join(format!(
            "smoke-oracle-orchestrator-test-{}",
            crate::utils::generate_id("dir")
        ));
        config
    }

    fn definition_with_steps(steps: Vec<TestStep>) -> TestDefinition {
        TestDefinition {
            id: "t1".into(),
            name: "smoke".into(),
            description: None,
            tags: vec![],
            timeout_ms: None,
            viewport: Viewport::default(),
            headless: true,
            retry_count: 0,
            environment: HashMap::new(),
            steps,
            before_all: vec![],
            after_all: vec![],
        }
    }

    #[tokio::test]
    async fn smoke_navigation_produces_passed_result_with_three_refs() {
        let config = tmp_config();
        let orchestrator = Orchestrator::without_pool(config.clone()).await.unwrap();
        let driver = ScriptedDriver::new("<html><body><h1>hi</h1></body></html>", vec![], vec![0u8; 1]);

        let definition = definition_with_steps(vec![
            TestStep::Navigate {
                id: "s1".into(),
                url: "https://example.test/".into(),
                options: NavigateOptions::default(),
            },
            TestStep::Checkpoint {
                id: "s2".into(),
                checkpoint: CheckpointDefinition {
                    id: "c1".into(),
                    name: "home".into(),
                    description: None,
                    capture: CaptureFlags { screenshot: false, html: true, console: true, network: false, performance: false },
                    validations: None,
                },
            },
        ]);

        let result = orchestrator.run_with_driver(&definition, &driver).await;
        assert_eq!(result.status, RunStatus::Passed);
        assert_eq!(result.checkpoints.len(), 1);
        assert_eq!(result.artifacts.len(), 2);

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }

    #[tokio::test]
    async fn failing_validation_marks_run_failed_not_error() {
        let config = tmp_config();
        let orchestrator = Orchestrator::without_pool(config.clone()).await.unwrap();
        let driver = ScriptedDriver::new("<html><head><title>Real</title></head></html>", vec![], vec![]);

        let definition = definition_with_steps(vec![TestStep::Checkpoint {
            id: "s1".into(),
            checkpoint: CheckpointDefinition {
                id: "c1".into(),
                name: "home".into(),
                description: None,
                capture: CaptureFlags { screenshot: false, html: true, console: false, network: false, performance: false },
                validations: Some(Validations {
                    dom: vec![DomAssertion::TextEquals { selector: "title".into(), value: "NotThisTitle".into() }],
                    console: None,
                }),
            },
        }]);

        let result = orchestrator.run_with_driver(&definition, &driver).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.checkpoints[0].validations.len(), 1);
        assert!(!result.checkpoints[0].validations[0].passed);

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }

    #[tokio::test]
    async fn step_failure_produces_error_status() {
        let config = tmp_config();
        let orchestrator = Orchestrator::without_pool(config.clone()).await.unwrap();
        let driver = ScriptedDriver::new("<html></html>", vec![], vec![]);

        let definition = definition_with_steps(vec![TestStep::Wait {
            id: "s1".into(),
            condition: crate::types::WaitCondition::Selector { selector: "#missing".into(), visible: true },
        }]);

        let result = orchestrator.run_with_driver(&definition, &driver).await;
        assert_eq!(result.status, RunStatus::Error);
        assert!(result.error.is_some());

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }

    #[tokio::test]
    async fn step_failure_after_a_checkpoint_keeps_its_already_persisted_artifacts() {
        let config = tmp_config();
        let orchestrator = Orchestrator::without_pool(config.clone()).await.unwrap();
        let driver = ScriptedDriver::new("<html><body><h1>hi</h1></body></html>", vec![], vec![]);

        let definition = definition_with_steps(vec![
            TestStep::Checkpoint {
                id: "s1".into(),
                checkpoint: CheckpointDefinition {
                    id: "c1".into(),
                    name: "home".into(),
                    description: None,
                    capture: CaptureFlags { screenshot: false, html: true, console: false, network: false, performance: false },
                    validations: None,
                },
            },
            TestStep::Wait {
                id: "s2".into(),
                condition: crate::types::WaitCondition::Selector { selector: "#missing".into(), visible: true },
            },
        ]);

        let result = orchestrator.run_with_driver(&definition, &driver).await;
        assert_eq!(result.status, RunStatus::Error);
        assert_eq!(result.checkpoints.len(), 1);
        assert_eq!(result.checkpoints[0].name, "home");
        assert_eq!(result.artifacts.len(), 1);

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }
}
