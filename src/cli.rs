//! Command-line entry surface: `run` executes a `TestDefinition` against a
//! pooled browser, `validate` checks one without launching Chrome,
//! `inspect` dumps a store namespace's index, and `health` reports the
//! browser-pool/storage/backlog rollup.

use crate::browser_pool::BrowserPool;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::SystemHealthChecker;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::types::{TestDefinition, TestStep};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "smoke-oracle")]
#[command(about = "Scriptable browser smoke-test oracle")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to an `EngineConfig` JSON file; fields present there override the defaults.
    #[arg(long, help = "Engine configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Overrides storage_base_dir")]
    pub storage_dir: Option<PathBuf>,

    #[arg(long, help = "Overrides browser_pool_size")]
    pub pool_size: Option<usize>,

    #[arg(long, help = "Overrides chrome_path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test definition against a pooled browser
    Run {
        #[arg(short, long, help = "Path to a TestDefinition JSON file")]
        definition: PathBuf,

        #[arg(short, long, help = "Write the TestResult JSON here instead of stdout")]
        output: Option<PathBuf>,
    },

    /// Validate a test definition without launching a browser
    Validate {
        #[arg(short, long, help = "Path to a TestDefinition JSON file")]
        definition: PathBuf,
    },

    /// Inspect a store namespace's index (screenshots, dom, console, checkpoints)
    Inspect {
        #[arg(short, long, help = "Store namespace to inspect")]
        namespace: String,

        #[arg(short, long, help = "Limit the number of entries printed")]
        limit: Option<usize>,
    },

    /// Show browser pool, storage, and backlog health
    Health {
        #[arg(long, help = "Show detailed browser pool statistics")]
        detailed: bool,
    },
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    Ok(())
}

/// Layers CLI flags over a JSON config file over `EngineConfig::default()`.
pub fn load_config(args: &Cli) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw)?
        }
        None => EngineConfig::default(),
    };

    if let Some(dir) = &args.storage_dir {
        config.storage_base_dir = dir.clone();
    }
    if let Some(size) = args.pool_size {
        config.browser_pool_size = size;
    }
    if let Some(path) = &args.chrome_path {
        config.chrome_path = Some(path.clone());
    }

    config.validate().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    Ok(config)
}

fn count_checkpoints(definition: &TestDefinition) -> usize {
    definition
        .before_all
        .iter()
        .chain(definition.steps.iter())
        .chain(definition.after_all.iter())
        .filter(|s| matches!(s, TestStep::Checkpoint { .. }))
        .count()
}

/// Dispatches a parsed `Commands` against a loaded `EngineConfig`.
pub struct EngineCliRunner {
    pub config: EngineConfig,
}

impl EngineCliRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Run { definition, output } => self.run_definition(definition, output).await,
            Commands::Validate { definition } => self.validate_definition(definition).await,
            Commands::Inspect { namespace, limit } => self.inspect_namespace(namespace, limit).await,
            Commands::Health { detailed } => self.show_health(detailed).await,
        }
    }

    async fn read_definition(&self, path: &PathBuf) -> Result<TestDefinition, Box<dyn std::error::Error>> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn run_definition(
        &self,
        definition_path: PathBuf,
        output: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let definition = self.read_definition(&definition_path).await?;
        definition.validate().map_err(EngineError::ConfigurationError)?;

        info!(test = %definition.name, "starting run");
        let pool = BrowserPool::new(self.config.clone()).await?;
        let orchestrator = Orchestrator::new(self.config.clone(), pool.clone()).await?;
        let result = orchestrator.run(&definition).await;
        pool.shutdown().await;
        let result = result?;

        let rendered = serde_json::to_string_pretty(&result)?;
        match output {
            Some(path) => tokio::fs::write(&path, &rendered).await?,
            None => println!("{rendered}"),
        }

        info!(
            status = ?result.status,
            run_id = %result.run_id,
            elapsed = %crate::utils::format_duration(Duration::from_millis(result.duration_ms)),
            "run finished"
        );
        Ok(())
    }

    async fn validate_definition(&self, definition_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let definition = self.read_definition(&definition_path).await?;

        match definition.validate() {
            Ok(()) => {
                println!("'{}' is valid:", definition.name);
                println!("  steps: {}", definition.steps.len());
                println!("  before_all: {}", definition.before_all.len());
                println!("  after_all: {}", definition.after_all.len());
                println!("  checkpoints: {}", count_checkpoints(&definition));
                Ok(())
            }
            Err(e) => {
                eprintln!("'{}' is invalid: {e}", definition.name);
                Err(format!("validation failed: {e}").into())
            }
        }
    }

    /// Reads `<storage_base_dir>/<namespace>/index.json` directly rather
    /// than through a typed store, since the index is a rebuildable cache.
    async fn inspect_namespace(&self, namespace: String, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
        let index_path = self.config.storage_base_dir.join(&namespace).join("index.json");

        if !tokio::fs::try_exists(&index_path).await.unwrap_or(false) {
            println!("no index found at {}", index_path.display());
            return Ok(());
        }

        let raw = tokio::fs::read_to_string(&index_path).await?;
        let mut value: serde_json::Value = serde_json::from_str(&raw)?;

        if let (Some(limit), serde_json::Value::Array(items)) = (limit, &mut value) {
            items.truncate(limit);
        }

        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok(())
    }

    async fn show_health(&self, detailed: bool) -> Result<(), Box<dyn std::error::Error>> {
        println!("System Health Check");
        println!("==================");

        let pool = BrowserPool::new(self.config.clone()).await?;
        let metrics = Arc::new(Metrics::new());
        let mut checker = SystemHealthChecker::new(pool.clone(), &self.config, metrics);
        let status = checker.check_system_health().await;

        println!("Overall:      {:?}", status.overall);
        println!("Browser pool: {:?}", status.browser_pool);
        println!("Storage:      {:?}", status.storage);
        println!("Queue:        {:?}", status.queue);

        if let Some(rss) = crate::utils::read_process_rss_bytes() {
            println!("Memory:       {}", crate::utils::format_bytes(rss));
        }

        if detailed {
            let stats = pool.get_stats().await;
            println!("\nBrowser Pool Detail:");
            println!("  Total instances: {}", stats.total_instances);
            println!("  Healthy instances: {}", stats.healthy_instances);
            println!("  Busy instances: {}", stats.busy_instances);
            println!("  Failed instances: {}", stats.failed_instances);
            println!("  Available instances: {}", stats.available_instances);
            println!("  Total sessions: {}", stats.total_sessions);
        }

        pool.shutdown().await;
        Ok(())
    }
}
