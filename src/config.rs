//! Ambient, process-wide configuration, layered default -> JSON file ->
//! CLI override, distinct from a per-test `TestDefinition` (see `types.rs`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of warm Chrome instances the `BrowserPool` keeps ready.
    pub browser_pool_size: usize,
    /// Root directory under which every store's namespace lives.
    pub storage_base_dir: PathBuf,
    /// Default bound for `wait{selector}`/`wait{function}` steps.
    #[serde(with = "duration_millis")]
    pub default_wait_timeout: Duration,
    /// Thumbnail dimensions the screenshot store resizes into.
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    /// Default DOM-chunking size when a capture doesn't override it.
    pub default_chunk_size: usize,
    pub chrome_path: Option<String>,
    pub user_agent: Option<String>,
    pub memory_limit: u64,
    /// Number of whole-run retries the orchestrator attempts when a
    /// `TestDefinition` declares `retry_count > 0` and the circuit
    /// breaker is closed.
    pub retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            browser_pool_size: 4,
            storage_base_dir: PathBuf::from("./artifacts"),
            default_wait_timeout: Duration::from_secs(30),
            thumbnail_width: 320,
            thumbnail_height: 240,
            default_chunk_size: 1000,
            chrome_path: None,
            user_agent: None,
            memory_limit: 1024 * 1024 * 1024,
            retry_attempts: 3,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.browser_pool_size == 0 {
            return Err("browser_pool_size must be > 0".to_string());
        }
        if self.default_wait_timeout.is_zero() {
            return Err("default_wait_timeout must be > 0".to_string());
        }
        if self.thumbnail_width == 0 || self.thumbnail_height == 0 {
            return Err("thumbnail dimensions must be > 0".to_string());
        }
        if self.default_chunk_size == 0 {
            return Err("default_chunk_size must be > 0".to_string());
        }
        Ok(())
    }

    /// Chrome launch flags, same headless/sandboxing posture the
    /// browser pool uses for every pooled instance, with a unique
    /// user-data directory per instance so pooled Chromes don't collide.
    pub fn get_chrome_args(&self, instance_id: usize) -> Vec<String> {
        let mut args = vec![
            "--headless=new".to_string(),
            "--no-sandbox".to_string(),
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-extensions".to_string(),
            format!(
                "--user-data-dir=/tmp/smoke-oracle-profile-{instance_id}-{}",
                std::process::id()
            ),
            format!("--remote-debugging-port={}", 9222 + instance_id),
        ];
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={ua}"));
        }
        args
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.browser_pool_size > 0);
        assert!(config.default_wait_timeout.as_secs() > 0);
    }

    #[test]
    fn chrome_args_include_unique_profile() {
        let config = EngineConfig::default();
        let a = config.get_chrome_args(0);
        let b = config.get_chrome_args(1);
        assert_ne!(a, b);
        assert!(a.iter().any(|arg| arg.starts_with("--user-data-dir=")));
    }
}
