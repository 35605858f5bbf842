//! Fluent, author-facing constructor that yields a validated
//! `TestDefinition` and can hand it straight to the orchestrator.
//!
//! Rust has no first-class overloading, so the conceptually overloaded
//! `wait(number | selector-string | condition-object)` becomes one
//! `wait(impl Into<WaitCondition>)` entry point —
//! `WaitCondition`'s `From<u64>`/`From<&str>` impls (types.rs) let call
//! sites keep writing `builder.wait(2000)` / `builder.wait("#ready")`.

use crate::browser_pool::BrowserPool;
use crate::config::EngineConfig;
use crate::driver::BrowserDriver;
use crate::error::EngineError;
use crate::orchestrator::Orchestrator;
use crate::types::{
    CaptureFlags, CheckpointDefinition, ClickOptions, NavigateOptions, ScrollBehavior, TestDefinition,
    TestResult, TestStep, TypeOptions, Validations, Viewport, WaitCondition,
};
use std::collections::HashMap;
use std::sync::Arc;

pub struct TestBuilder {
    id: String,
    name: String,
    description: Option<String>,
    tags: Vec<String>,
    timeout_ms: Option<u64>,
    viewport: Viewport,
    headless: bool,
    retry_count: u32,
    environment: HashMap<String, String>,
    steps: Vec<TestStep>,
    before_all: Vec<TestStep>,
    after_all: Vec<TestStep>,
}

impl TestBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: crate::utils::generate_id("test"),
            name: name.into(),
            description: None,
            tags: Vec::new(),
            timeout_ms: None,
            viewport: Viewport::default(),
            headless: true,
            retry_count: 0,
            environment: HashMap::new(),
            steps: Vec::new(),
            before_all: Vec::new(),
            after_all: Vec::new(),
        }
    }

    /// Recovers a builder from an existing definition so it can be
    /// extended and re-run.
    pub fn from_definition(def: TestDefinition) -> Self {
        Self {
            id: def.id,
            name: def.name,
            description: def.description,
            tags: def.tags,
            timeout_ms: def.timeout_ms,
            viewport: def.viewport,
            headless: def.headless,
            retry_count: def.retry_count,
            environment: def.environment,
            steps: def.steps,
            before_all: def.before_all,
            after_all: def.after_all,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport { width, height, device_scale_factor: None };
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn navigate(mut self, url: impl Into<String>) -> Self {
        self.steps.push(TestStep::Navigate {
            id: TestStep::new_id(),
            url: url.into(),
            options: NavigateOptions::default(),
        });
        self
    }

    pub fn navigate_with(mut self, url: impl Into<String>, options: NavigateOptions) -> Self {
        self.steps.push(TestStep::Navigate { id: TestStep::new_id(), url: url.into(), options });
        self
    }

    pub fn click(mut self, selector: impl Into<String>) -> Self {
        self.steps.push(TestStep::Click {
            id: TestStep::new_id(),
            selector: selector.into(),
            options: ClickOptions::default(),
        });
        self
    }

    pub fn click_with(mut self, selector: impl Into<String>, options: ClickOptions) -> Self {
        self.steps.push(TestStep::Click { id: TestStep::new_id(), selector: selector.into(), options });
        self
    }

    pub fn type_text(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.steps.push(TestStep::Type {
            id: TestStep::new_id(),
            selector: selector.into(),
            text: text.into(),
            options: TypeOptions::default(),
        });
        self
    }

    pub fn type_with(mut self, selector: impl Into<String>, text: impl Into<String>, options: TypeOptions) -> Self {
        self.steps.push(TestStep::Type {
            id: TestStep::new_id(),
            selector: selector.into(),
            text: text.into(),
            options,
        });
        self
    }

    /// `wait(2000)` waits a fixed duration; `wait("#ready")` waits for a
    /// visible selector; `wait(WaitCondition::Function{..})` waits for an
    /// arbitrary condition.
    pub fn wait(mut self, condition: impl Into<WaitCondition>) -> Self {
        self.steps.push(TestStep::Wait { id: TestStep::new_id(), condition: condition.into() });
        self
    }

    pub fn scroll_to(mut self, selector: impl Into<String>) -> Self {
        self.steps.push(TestStep::Scroll {
            id: TestStep::new_id(),
            selector: Some(selector.into()),
            x: None,
            y: None,
            behavior: Some(ScrollBehavior::Smooth),
        });
        self
    }

    pub fn scroll_to_offset(mut self, x: i64, y: i64) -> Self {
        self.steps.push(TestStep::Scroll {
            id: TestStep::new_id(),
            selector: None,
            x: Some(x),
            y: Some(y),
            behavior: Some(ScrollBehavior::Auto),
        });
        self
    }

    pub fn select(mut self, selector: impl Into<String>, values: Vec<String>) -> Self {
        self.steps.push(TestStep::Select { id: TestStep::new_id(), selector: selector.into(), values });
        self
    }

    pub fn hover(mut self, selector: impl Into<String>) -> Self {
        self.steps.push(TestStep::Hover { id: TestStep::new_id(), selector: selector.into() });
        self
    }

    pub fn press(mut self, key: impl Into<String>) -> Self {
        self.steps.push(TestStep::Press { id: TestStep::new_id(), key: key.into(), delay_ms: None });
        self
    }

    pub fn checkpoint(mut self, name: impl Into<String>, capture: CaptureFlags) -> Self {
        self.steps.push(TestStep::Checkpoint {
            id: TestStep::new_id(),
            checkpoint: CheckpointDefinition {
                id: crate::utils::generate_id("checkpoint"),
                name: name.into(),
                description: None,
                capture,
                validations: None,
            },
        });
        self
    }

    pub fn checkpoint_with_validations(
        mut self,
        name: impl Into<String>,
        capture: CaptureFlags,
        validations: Validations,
    ) -> Self {
        self.steps.push(TestStep::Checkpoint {
            id: TestStep::new_id(),
            checkpoint: CheckpointDefinition {
                id: crate::utils::generate_id("checkpoint"),
                name: name.into(),
                description: None,
                capture,
                validations: Some(validations),
            },
        });
        self
    }

    /// Hands a nested builder to `cb`, then splices its steps onto this
    /// definition's `beforeAll` sequence.
    pub fn before_all(mut self, cb: impl FnOnce(TestBuilder) -> TestBuilder) -> Self {
        let nested = cb(TestBuilder::new(format!("{}__before_all", self.name)));
        self.before_all.extend(nested.steps);
        self
    }

    /// Hands a nested builder to `cb`, then splices its steps onto this
    /// definition's `afterAll` sequence.
    pub fn after_all(mut self, cb: impl FnOnce(TestBuilder) -> TestBuilder) -> Self {
        let nested = cb(TestBuilder::new(format!("{}__after_all", self.name)));
        self.after_all.extend(nested.steps);
        self
    }

    /// Yields the immutable `TestDefinition`, rejecting an empty or
    /// otherwise malformed definition before it ever reaches a browser
    /// (surfaced as `ConfigurationError`).
    pub fn build(self) -> Result<TestDefinition, EngineError> {
        let definition = TestDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            tags: self.tags,
            timeout_ms: self.timeout_ms,
            viewport: self.viewport,
            headless: self.headless,
            retry_count: self.retry_count,
            environment: self.environment,
            steps: self.steps,
            before_all: self.before_all,
            after_all: self.after_all,
        };
        definition.validate().map_err(EngineError::ConfigurationError)?;
        Ok(definition)
    }

    /// Builds the definition and runs it through a caller-supplied
    /// browser pool, guaranteeing the pool's own cleanup semantics
    /// (`BrowserHandle::Drop`) regardless of outcome.
    pub async fn run(self, config: EngineConfig, browser_pool: Arc<BrowserPool>) -> Result<TestResult, EngineError> {
        let definition = self.build()?;
        let orchestrator = Orchestrator::new(config, browser_pool).await?;
        orchestrator.run(&definition).await
    }

    /// Builds the definition and runs it directly against a
    /// caller-supplied driver (tests, `inspect`-style tooling) without a
    /// pool checkout.
    pub async fn run_with_driver(self, config: EngineConfig, driver: &dyn BrowserDriver) -> Result<TestResult, EngineError> {
        let definition = self.build()?;
        let orchestrator = Orchestrator::without_pool(config).await?;
        Ok(orchestrator.run_with_driver(&definition, driver).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ScriptedDriver;
    use crate::types::{DomAssertion, RunStatus};

    fn tmp_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.storage_base_dir = std::env::temp_dir().join(format!(
            "smoke-oracle-builder-test-{}",
            crate::utils::generate_id("dir")
        ));
        config
    }

    #[test]
    fn build_rejects_empty_definition() {
        let result = TestBuilder::new("empty").build();
        assert!(result.is_err());
    }

    #[test]
    fn wait_accepts_both_number_and_selector_overloads() {
        let definition = TestBuilder::new("waits")
            .navigate("https://example.test/")
            .wait(2000)
            .wait("#ready")
            .build()
            .unwrap();
        assert_eq!(definition.steps.len(), 3);
    }

    #[test]
    fn before_all_splices_nested_steps_into_parent() {
        let definition = TestBuilder::new("with-setup")
            .before_all(|b| b.navigate("https://example.test/login"))
            .navigate("https://example.test/dashboard")
            .build()
            .unwrap();
        assert_eq!(definition.before_all.len(), 1);
        assert_eq!(definition.steps.len(), 1);
    }

    #[tokio::test]
    async fn run_with_driver_drives_a_scripted_navigation_and_checkpoint() {
        let config = tmp_config();
        let driver = ScriptedDriver::new("<html><body><h1>hi</h1></body></html>", vec![], vec![0u8; 1]);

        let result = TestBuilder::new("smoke")
            .navigate("https://example.test/")
            .checkpoint_with_validations(
                "home",
                CaptureFlags { screenshot: false, html: true, console: true, network: false, performance: false },
                Validations { dom: vec![DomAssertion::Exists { selector: "h1".into() }], console: None },
            )
            .run_with_driver(config.clone(), &driver)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Passed);
        assert_eq!(result.checkpoints.len(), 1);

        let _ = std::fs::remove_dir_all(&config.storage_base_dir);
    }
}
