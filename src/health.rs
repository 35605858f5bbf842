//! Tri-level health rollup over the browser pool, the storage directory,
//! and the run backlog.

use crate::browser_pool::BrowserPool;
use crate::config::EngineConfig;
use crate::metrics::Metrics;
use crate::utils::read_process_rss_bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub overall: HealthLevel,
    pub browser_pool: HealthLevel,
    pub storage: HealthLevel,
    pub queue: HealthLevel,
    pub timestamp: std::time::SystemTime,
}

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub min_available_browsers: usize,
    pub max_memory_usage: u64,
    pub max_pending_runs: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_available_browsers: 1,
            max_memory_usage: 1024 * 1024 * 1024,
            max_pending_runs: 50,
        }
    }
}

/// Checks browser-pool health, storage-directory writability, and
/// run-backlog size rolled into one overall level.
pub struct SystemHealthChecker {
    browser_pool: Arc<BrowserPool>,
    storage_base_dir: std::path::PathBuf,
    thresholds: HealthThresholds,
    pending_runs: Arc<AtomicUsize>,
    last_check: Option<Instant>,
    metrics: Arc<Metrics>,
}

impl SystemHealthChecker {
    pub fn new(browser_pool: Arc<BrowserPool>, config: &EngineConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            browser_pool,
            storage_base_dir: config.storage_base_dir.clone(),
            thresholds: HealthThresholds::default(),
            pending_runs: Arc::new(AtomicUsize::new(0)),
            last_check: None,
            metrics,
        }
    }

    pub async fn check_system_health(&mut self) -> HealthStatus {
        let start = Instant::now();

        let browser_health = self.check_browser_pool_health().await;
        let storage_health = self.check_storage_health().await;
        let memory_health = self.check_memory_health();
        let queue_health = self.check_queue_health();

        let overall = determine_overall(&[browser_health, storage_health, memory_health, queue_health]);
        self.last_check = Some(start);

        info!(elapsed_ms = start.elapsed().as_millis() as u64, ?overall, "health check completed");

        HealthStatus {
            overall,
            browser_pool: browser_health,
            storage: storage_health,
            queue: queue_health,
            timestamp: std::time::SystemTime::now(),
        }
    }

    async fn check_browser_pool_health(&self) -> HealthLevel {
        let stats = self.browser_pool.get_stats().await;

        if stats.healthy_instances < self.thresholds.min_available_browsers {
            warn!(healthy = stats.healthy_instances, "browser pool health critical: too few healthy instances");
            return HealthLevel::Critical;
        }

        let failure_rate = if stats.total_instances > 0 {
            stats.failed_instances as f64 / stats.total_instances as f64
        } else {
            0.0
        };

        if failure_rate > 0.5 {
            error!(failure_rate, "browser pool health critical: high failure rate");
            HealthLevel::Critical
        } else if failure_rate > 0.2 {
            warn!(failure_rate, "browser pool health warning: elevated failure rate");
            HealthLevel::Warning
        } else {
            HealthLevel::Healthy
        }
    }

    async fn check_storage_health(&self) -> HealthLevel {
        check_storage_writable(&self.storage_base_dir).await
    }

    fn check_memory_health(&self) -> HealthLevel {
        match read_process_rss_bytes() {
            Some(rss) => {
                self.metrics.record_memory_usage(rss);
                if rss > self.thresholds.max_memory_usage {
                    error!(rss_bytes = rss, "memory health critical: usage over threshold");
                    HealthLevel::Critical
                } else if rss > self.thresholds.max_memory_usage * 8 / 10 {
                    warn!(rss_bytes = rss, "memory health warning: usage elevated");
                    HealthLevel::Warning
                } else {
                    HealthLevel::Healthy
                }
            }
            None => HealthLevel::Healthy,
        }
    }

    fn check_queue_health(&self) -> HealthLevel {
        let pending = self.pending_runs.load(Ordering::SeqCst);
        if pending > self.thresholds.max_pending_runs {
            error!(pending, "queue health critical: run backlog too large");
            HealthLevel::Critical
        } else if pending > self.thresholds.max_pending_runs / 2 {
            warn!(pending, "queue health warning: run backlog building up");
            HealthLevel::Warning
        } else {
            HealthLevel::Healthy
        }
    }
}

async fn check_storage_writable(base_dir: &std::path::Path) -> HealthLevel {
    let probe = base_dir.join(".health-probe");
    match tokio::fs::create_dir_all(base_dir).await {
        Ok(()) => match tokio::fs::write(&probe, b"ok").await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&probe).await;
                HealthLevel::Healthy
            }
            Err(e) => {
                error!(error = %e, "storage health critical: base directory not writable");
                HealthLevel::Critical
            }
        },
        Err(e) => {
            error!(error = %e, "storage health critical: base directory not creatable");
            HealthLevel::Critical
        }
    }
}

fn determine_overall(levels: &[HealthLevel]) -> HealthLevel {
    if levels.contains(&HealthLevel::Critical) {
        HealthLevel::Critical
    } else if levels.contains(&HealthLevel::Warning) {
        HealthLevel::Warning
    } else {
        HealthLevel::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_health_fails_when_base_dir_is_unwritable() {
        let tmp = std::env::temp_dir().join(format!(
            "smoke-oracle-health-test-{}",
            crate::utils::generate_id("file")
        ));
        std::fs::write(&tmp, b"not a directory").unwrap();

        let level = check_storage_writable(&tmp.join("nested")).await;
        assert_eq!(level, HealthLevel::Critical);

        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn overall_health_takes_the_worst_tier() {
        assert_eq!(
            determine_overall(&[HealthLevel::Healthy, HealthLevel::Warning, HealthLevel::Healthy]),
            HealthLevel::Warning
        );
        assert_eq!(
            determine_overall(&[HealthLevel::Critical, HealthLevel::Healthy]),
            HealthLevel::Critical
        );
    }
}
