//! # smoke-oracle
//!
//! A scriptable browser smoke-test oracle: drives a Chromium-class browser
//! through a declared sequence of steps, pauses at named checkpoints to
//! capture screenshot/DOM/console artifacts, validates them against
//! declarative assertions, and persists everything in content-addressable,
//! queryable stores so later runs can compare and diff against a baseline.
//!
//! ## Data flow
//!
//! `TestBuilder` → `TestDefinition` → `Orchestrator` → (`runner` | `CheckpointManager`) → stores.
//! Stores are queried and compared independently of a live run via their own
//! `query`/`compare` APIs.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use smoke_oracle::config::EngineConfig;
//! use smoke_oracle::test_builder::TestBuilder;
//! use smoke_oracle::types::CaptureFlags;
//! use smoke_oracle::browser_pool::BrowserPool;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let pool = BrowserPool::new(config.clone()).await?;
//!
//!     let result = TestBuilder::new("homepage smoke")
//!         .navigate("https://example.com")
//!         .checkpoint("home", CaptureFlags { screenshot: true, html: true, console: true, network: false, performance: false })
//!         .run(config, pool)
//!         .await?;
//!
//!     println!("run {} finished: {:?}", result.run_id, result.status);
//!     Ok(())
//! }
//! ```
//!
//! ## CLI usage
//!
//! ```bash
//! smoke-oracle run --definition test.json
//! smoke-oracle validate --definition test.json
//! smoke-oracle inspect --store ./artifacts --namespace checkpoints
//! smoke-oracle health
//! ```

/// Layered configuration: defaults, JSON file, CLI overrides.
pub mod config;

/// Structured error taxonomy, retryability, and the run-level circuit breaker.
pub mod error;

/// Pool of warm Chrome sessions handed to the orchestrator one-per-run.
pub mod browser_pool;

/// `BrowserDriver` trait plus the production (`chromiumoxide`) and scripted
/// (test double) implementations.
pub mod driver;

/// Content-addressable, tag-indexed artifact stores (screenshot/DOM/console/checkpoint).
pub mod storage;

/// Core data model: `TestDefinition`, `TestStep`, `CheckpointState`, and friends.
pub mod types;

/// Evaluates DOM and console assertions against captured artifacts.
pub mod assertions;

/// Classifies and filters console log entries by level and pattern.
pub mod error_filter;

/// Drives the assertion engine over a checkpoint's declared validations.
pub mod validator;

/// Executes a single non-checkpoint step against the browser driver.
pub mod runner;

/// Captures a checkpoint's requested artifacts, persists them, and validates.
pub mod checkpoint_manager;

/// Drives a full run: beforeAll → steps → afterAll, with retry and circuit breaking.
pub mod orchestrator;

/// Fluent author-facing constructor for `TestDefinition`.
pub mod test_builder;

/// Command-line interface implementation.
pub mod cli;

/// Performance metrics collection and monitoring.
pub mod metrics;

/// Health checking system for the browser pool, storage, and run backlog.
pub mod health;

/// Utility functions and helpers.
pub mod utils;

#[cfg(test)]
mod tests;

pub use browser_pool::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use health::*;
pub use metrics::*;
pub use utils::*;
