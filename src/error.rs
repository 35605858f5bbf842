//! Structured error taxonomy for the smoke-test engine.
//!
//! Mirrors the shape of a typical browser-automation error enum: one
//! `thiserror` type covering driver failures, storage failures, step
//! failures and configuration mistakes, each classified by retryability
//! and severity so the orchestrator's retry loop and the health checker
//! can reason about them without matching on display strings.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("browser unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("chrome process error: {0}")]
    ChromeError(String),

    #[error("capture failed for checkpoint '{checkpoint}': {reason}")]
    CaptureFailed { checkpoint: String, reason: String },

    #[error("storage error at {path}: {reason}")]
    StorageError { path: PathBuf, reason: String },

    #[error("step '{verb}' failed at locator '{locator}': {reason}")]
    StepFailed {
        verb: String,
        locator: String,
        reason: String,
    },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("validation engine error: {0}")]
    ValidationEngineError(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("semaphore error: {0}")]
    SemaphoreError(#[from] tokio::sync::AcquireError),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl EngineError {
    /// Whether the orchestrator's run-level retry loop should attempt
    /// this run again. Configuration and validation-engine errors are
    /// never retryable; driver hiccups and timeouts usually are.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::BrowserUnavailable(_)
            | EngineError::BrowserLaunchFailed(_)
            | EngineError::ChromeError(_)
            | EngineError::Timeout(_)
            | EngineError::StepFailed { .. }
            | EngineError::CaptureFailed { .. } => true,
            EngineError::ConfigurationError(_)
            | EngineError::ValidationEngineError(_)
            | EngineError::InvalidUrl(_)
            | EngineError::ElementNotFound(_) => false,
            EngineError::StorageError { .. } => false,
            EngineError::IoError(_)
            | EngineError::SerializationError(_)
            | EngineError::ImageError(_)
            | EngineError::SemaphoreError(_) => false,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EngineError::BrowserLaunchFailed(_) | EngineError::ChromeError(_) => {
                ErrorSeverity::Critical
            }
            EngineError::BrowserUnavailable(_) | EngineError::Timeout(_) => ErrorSeverity::High,
            EngineError::CaptureFailed { .. } | EngineError::StepFailed { .. } => {
                ErrorSeverity::High
            }
            EngineError::StorageError { .. } => ErrorSeverity::Medium,
            EngineError::ConfigurationError(_) | EngineError::ValidationEngineError(_) => {
                ErrorSeverity::Medium
            }
            EngineError::ElementNotFound(_) | EngineError::InvalidUrl(_) => ErrorSeverity::Low,
            EngineError::IoError(_)
            | EngineError::SerializationError(_)
            | EngineError::ImageError(_)
            | EngineError::SemaphoreError(_) => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Guards the orchestrator's run-level retry loop against hammering a
/// browser that has gone unhealthy. Trips open after `failure_threshold`
/// consecutive failures, half-opens after `recovery_timeout`, and closes
/// again on the first success.
pub struct CircuitBreaker {
    state: Arc<Mutex<CircuitState>>,
    failure_threshold: usize,
    recovery_timeout: Duration,
    failure_count: AtomicUsize,
    last_failure_time: Arc<Mutex<Option<Instant>>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CircuitState::Closed)),
            failure_threshold,
            recovery_timeout,
            failure_count: AtomicUsize::new(0),
            last_failure_time: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn can_execute(&self) -> bool {
        let mut state = self.state.lock().await;
        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let last_failure = self.last_failure_time.lock().await;
                if let Some(t) = *last_failure {
                    if t.elapsed() >= self.recovery_timeout {
                        *state = CircuitState::HalfOpen;
                        true
                    } else {
                        false
                    }
                } else {
                    true
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub async fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        *state = CircuitState::Closed;
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_failure_time.lock().await = Some(Instant::now());
        if count >= self.failure_threshold {
            let mut state = self.state.lock().await;
            *state = CircuitState::Open;
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        *self.state.lock().await
    }

    pub fn get_failure_count(&self) -> usize {
        self.failure_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(EngineError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!EngineError::ConfigurationError("bad".into()).is_retryable());
    }

    #[test]
    fn severity_classification() {
        assert_eq!(
            EngineError::BrowserLaunchFailed("x".into()).severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            EngineError::ElementNotFound("x".into()).severity(),
            ErrorSeverity::Low
        );
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(50));
        assert!(breaker.can_execute().await);
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.get_state().await, CircuitState::Open);
        assert!(!breaker.can_execute().await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(breaker.can_execute().await);
        breaker.record_success().await;
        assert_eq!(breaker.get_state().await, CircuitState::Closed);
    }
}
