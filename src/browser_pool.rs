//! Pool of warm Chrome instances amortizing launch cost across a batch
//! of runs while preserving the
//! one-run/one-browser-session invariant: the orchestrator checks out
//! exactly one `BrowserHandle` per run and it is returned to the pool
//! automatically when dropped.

use crate::config::EngineConfig;
use crate::driver::ChromiumDriver;
use crate::error::EngineError;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;
use tracing::{error, info, warn};

fn create_browser_config(config: &EngineConfig, instance_id: usize) -> Result<BrowserConfig, EngineError> {
    let mut builder = BrowserConfig::builder().args(config.get_chrome_args(instance_id));
    if let Some(path) = &config.chrome_path {
        builder = builder.chrome_executable(path);
    }
    builder
        .build()
        .map_err(EngineError::BrowserLaunchFailed)
}

#[derive(Debug, Clone, Copy)]
pub enum InstanceStatus {
    Healthy,
    Busy,
    Unresponsive,
    Restarting,
    Failed,
}

#[derive(Debug)]
pub struct BrowserInstance {
    pub id: usize,
    pub browser: Arc<Mutex<Browser>>,
    pub handler: tokio::task::JoinHandle<Result<(), chromiumoxide::error::CdpError>>,
    pub last_used: Instant,
    pub session_count: usize,
    pub status: InstanceStatus,
    pub created_at: Instant,
    pub failure_count: usize,
}

impl BrowserInstance {
    pub fn new(
        id: usize,
        browser: Browser,
        handler: tokio::task::JoinHandle<Result<(), chromiumoxide::error::CdpError>>,
    ) -> Self {
        Self {
            id,
            browser: Arc::new(Mutex::new(browser)),
            handler,
            last_used: Instant::now(),
            session_count: 0,
            status: InstanceStatus::Healthy,
            created_at: Instant::now(),
            failure_count: 0,
        }
    }

    pub fn mark_used(&mut self) {
        self.last_used = Instant::now();
        self.session_count += 1;
        self.status = InstanceStatus::Busy;
    }

    pub fn mark_available(&mut self) {
        self.status = InstanceStatus::Healthy;
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, InstanceStatus::Healthy)
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_time(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub async fn shutdown(self) {
        let _ = self.browser.lock().await.close().await;
        self.handler.abort();
    }
}

/// RAII checkout from the pool. Dropping it spawns a task that returns
/// the instance to the `available` queue.
pub struct BrowserHandle {
    pub browser: Arc<Mutex<Browser>>,
    pub instance_id: usize,
    pool: Arc<BrowserPool>,
}

impl BrowserHandle {
    fn new(browser: Arc<Mutex<Browser>>, instance_id: usize, pool: Arc<BrowserPool>) -> Self {
        Self {
            browser,
            instance_id,
            pool,
        }
    }

    /// Opens a fresh page and wraps it in a `ChromiumDriver` for one run.
    pub async fn new_driver(&self) -> Result<ChromiumDriver, EngineError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| EngineError::BrowserUnavailable(e.to_string()))?;
        ChromiumDriver::new(page).await
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let instance_id = self.instance_id;
        tokio::spawn(async move {
            pool.return_browser(instance_id).await;
        });
    }
}

pub struct BrowserPool {
    instances: Arc<Mutex<Vec<BrowserInstance>>>,
    available: Arc<Mutex<VecDeque<usize>>>,
    semaphore: Arc<Semaphore>,
    config: EngineConfig,
    is_shutting_down: Arc<std::sync::atomic::AtomicBool>,
}

impl BrowserPool {
    pub async fn new(config: EngineConfig) -> Result<Arc<Self>, EngineError> {
        let pool = Self {
            instances: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(Mutex::new(VecDeque::new())),
            semaphore: Arc::new(Semaphore::new(config.browser_pool_size)),
            config: config.clone(),
            is_shutting_down: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };

        pool.initialize_instances().await?;
        let pool = Arc::new(pool);
        pool.clone().start_health_check_task();
        Ok(pool)
    }

    async fn initialize_instances(&self) -> Result<(), EngineError> {
        let mut instances = self.instances.lock().await;
        let mut available = self.available.lock().await;

        for i in 0..self.config.browser_pool_size {
            if i > 0 {
                sleep(Duration::from_millis(500)).await;
            }
            let instance = self.create_browser_instance(i).await?;
            instances.push(instance);
            available.push_back(i);
            info!("browser instance {} created", i);
        }

        info!("browser pool initialized with {} instances", instances.len());
        Ok(())
    }

    async fn create_browser_instance(&self, id: usize) -> Result<BrowserInstance, EngineError> {
        let browser_config = create_browser_config(&self.config, id)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| EngineError::BrowserLaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("browser handler error: {}", e);
                        return Err(e);
                    }
                    None => {
                        info!("browser handler stream ended");
                        break;
                    }
                }
            }
            Ok(())
        });

        Ok(BrowserInstance::new(id, browser, handler_task))
    }

    pub async fn get_browser(self: &Arc<Self>) -> Result<BrowserHandle, EngineError> {
        if self.is_shutting_down.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(EngineError::BrowserUnavailable("pool shutting down".into()));
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(EngineError::SemaphoreError)?;

        for attempt in 0..3 {
            let instance_id = {
                let mut available = self.available.lock().await;
                match available.pop_front() {
                    Some(id) => id,
                    None => {
                        return Err(EngineError::BrowserUnavailable(
                            "no available instances".into(),
                        ))
                    }
                }
            };

            // Check health and drop the guard before any call that might need
            // to re-acquire `self.instances` (restart_instance_internal does),
            // since tokio's Mutex is not reentrant.
            let is_healthy = {
                let instances = self.instances.lock().await;
                let instance = instances
                    .get(instance_id)
                    .ok_or_else(|| EngineError::BrowserUnavailable("instance vanished".into()))?;
                instance.is_healthy() && !instance.handler.is_finished()
            };

            let browser_result = if !is_healthy {
                warn!(
                    "browser instance {} unhealthy (attempt {}), restarting",
                    instance_id,
                    attempt + 1
                );
                match self.restart_instance_internal(instance_id).await {
                    Ok(()) => {
                        let instances = self.instances.lock().await;
                        let instance = &instances[instance_id];
                        Ok(instance.browser.clone())
                    }
                    Err(e) => {
                        self.available.lock().await.push_back(instance_id);
                        Err(e)
                    }
                }
            } else {
                let mut instances = self.instances.lock().await;
                let instance = instances
                    .get_mut(instance_id)
                    .ok_or_else(|| EngineError::BrowserUnavailable("instance vanished".into()))?;
                instance.mark_used();
                Ok(instance.browser.clone())
            };

            match browser_result {
                Ok(browser) => {
                    return Ok(BrowserHandle::new(browser, instance_id, self.clone()));
                }
                Err(_) if attempt < 2 => continue,
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::BrowserUnavailable(
            "exhausted restart attempts".into(),
        ))
    }

    pub async fn return_browser(&self, instance_id: usize) {
        let mut instances = self.instances.lock().await;
        let mut available = self.available.lock().await;
        if let Some(instance) = instances.get_mut(instance_id) {
            instance.mark_available();
            available.push_back(instance_id);
        }
    }

    pub async fn restart_instance(&self, instance_id: usize) -> Result<(), EngineError> {
        self.restart_instance_internal(instance_id).await
    }

    async fn restart_instance_internal(&self, instance_id: usize) -> Result<(), EngineError> {
        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances.get_mut(instance_id) {
            instance.status = InstanceStatus::Restarting;
            let _ = instance.browser.lock().await.close().await;
            instance.handler.abort();

            match self.create_browser_instance(instance_id).await {
                Ok(new_instance) => {
                    *instance = new_instance;
                    info!("browser instance {} restarted", instance_id);
                    Ok(())
                }
                Err(e) => {
                    instance.status = InstanceStatus::Failed;
                    error!("failed to restart browser instance {}: {}", instance_id, e);
                    Err(e)
                }
            }
        } else {
            Err(EngineError::BrowserUnavailable("no such instance".into()))
        }
    }

    fn start_health_check_task(self: Arc<Self>) {
        let is_shutting_down = self.is_shutting_down.clone();
        tokio::spawn(async move {
            let mut quick_interval = tokio::time::interval(Duration::from_secs(15));
            let mut deep_interval = tokio::time::interval(Duration::from_secs(60));
            while !is_shutting_down.load(std::sync::atomic::Ordering::Relaxed) {
                tokio::select! {
                    _ = quick_interval.tick() => { self.quick_health_check().await; }
                    _ = deep_interval.tick() => { self.deep_health_check().await; }
                }
            }
        });
    }

    async fn quick_health_check(&self) {
        let instances = self.instances.lock().await;
        for instance in instances.iter() {
            if instance.handler.is_finished() {
                warn!("browser instance {} handler crashed", instance.id);
            }
            if instance.idle_time() > Duration::from_secs(300)
                && matches!(instance.status, InstanceStatus::Busy)
            {
                warn!(
                    "browser instance {} unresponsive for {}s",
                    instance.id,
                    instance.idle_time().as_secs()
                );
            }
        }
    }

    async fn deep_health_check(&self) {
        let instances_to_restart = {
            let instances = self.instances.lock().await;
            instances
                .iter()
                .filter(|instance| {
                    instance.age() > Duration::from_secs(3600)
                        || instance.failure_count > 10
                        || instance.handler.is_finished()
                        || (instance.idle_time() > Duration::from_secs(600)
                            && matches!(instance.status, InstanceStatus::Busy))
                })
                .map(|instance| instance.id)
                .collect::<Vec<_>>()
        };

        for instance_id in instances_to_restart {
            if let Err(e) = self.restart_instance(instance_id).await {
                error!(
                    "failed to restart browser instance {} during health check: {}",
                    instance_id, e
                );
            }
        }
    }

    pub async fn shutdown(&self) {
        info!("shutting down browser pool");
        self.is_shutting_down
            .store(true, std::sync::atomic::Ordering::Relaxed);

        let mut retries = 0;
        while retries < 10 {
            let available_count = self.available.lock().await.len();
            if available_count == self.config.browser_pool_size {
                break;
            }
            sleep(Duration::from_millis(100)).await;
            retries += 1;
        }

        let mut instances = self.instances.lock().await;
        for instance in instances.drain(..) {
            instance.shutdown().await;
        }
        info!("browser pool shutdown complete");
    }

    pub async fn get_stats(&self) -> BrowserPoolStats {
        let instances = self.instances.lock().await;
        let available = self.available.lock().await;

        let mut healthy_count = 0;
        let mut busy_count = 0;
        let mut failed_count = 0;
        let mut total_sessions = 0;

        for instance in instances.iter() {
            total_sessions += instance.session_count;
            match instance.status {
                InstanceStatus::Healthy => healthy_count += 1,
                InstanceStatus::Busy => busy_count += 1,
                InstanceStatus::Failed => failed_count += 1,
                _ => {}
            }
        }

        BrowserPoolStats {
            total_instances: instances.len(),
            healthy_instances: healthy_count,
            busy_instances: busy_count,
            failed_instances: failed_count,
            available_instances: available.len(),
            total_sessions,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserPoolStats {
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub busy_instances: usize,
    pub failed_instances: usize,
    pub available_instances: usize,
    pub total_sessions: usize,
}
