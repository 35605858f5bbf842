//! The data model an author writes and the engine executes: test
//! definitions, steps, checkpoints, and the results/artifacts a run
//! produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn new_step_id() -> String {
    format!("step_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub device_scale_factor: Option<f64>,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_scale_factor: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    pub steps: Vec<TestStep>,
    #[serde(default)]
    pub before_all: Vec<TestStep>,
    #[serde(default)]
    pub after_all: Vec<TestStep>,
}

fn default_true() -> bool {
    true
}

impl TestDefinition {
    /// Rejects a definition before any browser is launched: no
    /// steps, or a checkpoint name reused within the same run.
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() && self.before_all.is_empty() && self.after_all.is_empty() {
            return Err("test definition has no steps".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for step in self
            .before_all
            .iter()
            .chain(self.steps.iter())
            .chain(self.after_all.iter())
        {
            match step {
                TestStep::Checkpoint { checkpoint, .. } => {
                    if !seen.insert(checkpoint.name.clone()) {
                        return Err(format!("duplicate checkpoint name '{}'", checkpoint.name));
                    }
                    if checkpoint.capture.network || checkpoint.capture.performance {
                        return Err(format!(
                            "checkpoint '{}' requests unsupported capture (network/performance)",
                            checkpoint.name
                        ));
                    }
                }
                TestStep::Navigate { url, .. } => {
                    crate::utils::validate_url(url)
                        .map_err(|e| format!("navigate step has invalid url '{url}': {e}"))?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClickOptions {
    #[serde(default)]
    pub button: Option<MouseButton>,
    #[serde(default)]
    pub click_count: Option<u32>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeOptions {
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub clear_first: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavigateOptions {
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub wait_until: Option<WaitUntil>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitCondition {
    Timeout { ms: u64 },
    Selector { selector: String, visible: bool },
    Function { body: String, args: Vec<String> },
    Navigation,
    NetworkIdle { timeout_ms: Option<u64> },
}

impl From<u64> for WaitCondition {
    fn from(ms: u64) -> Self {
        WaitCondition::Timeout { ms }
    }
}

impl From<&str> for WaitCondition {
    fn from(selector: &str) -> Self {
        WaitCondition::Selector {
            selector: selector.to_string(),
            visible: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollBehavior {
    Auto,
    Smooth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum TestStep {
    Navigate {
        id: String,
        url: String,
        #[serde(default)]
        options: NavigateOptions,
    },
    Click {
        id: String,
        selector: String,
        #[serde(default)]
        options: ClickOptions,
    },
    Type {
        id: String,
        selector: String,
        text: String,
        #[serde(default)]
        options: TypeOptions,
    },
    Wait {
        id: String,
        condition: WaitCondition,
    },
    Scroll {
        id: String,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        x: Option<i64>,
        #[serde(default)]
        y: Option<i64>,
        #[serde(default)]
        behavior: Option<ScrollBehavior>,
    },
    Select {
        id: String,
        selector: String,
        values: Vec<String>,
    },
    Hover {
        id: String,
        selector: String,
    },
    Press {
        id: String,
        key: String,
        #[serde(default)]
        delay_ms: Option<u64>,
    },
    Checkpoint {
        id: String,
        checkpoint: CheckpointDefinition,
    },
}

impl TestStep {
    pub fn id(&self) -> &str {
        match self {
            TestStep::Navigate { id, .. }
            | TestStep::Click { id, .. }
            | TestStep::Type { id, .. }
            | TestStep::Wait { id, .. }
            | TestStep::Scroll { id, .. }
            | TestStep::Select { id, .. }
            | TestStep::Hover { id, .. }
            | TestStep::Press { id, .. }
            | TestStep::Checkpoint { id, .. } => id,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            TestStep::Navigate { .. } => "navigate",
            TestStep::Click { .. } => "click",
            TestStep::Type { .. } => "type",
            TestStep::Wait { .. } => "wait",
            TestStep::Scroll { .. } => "scroll",
            TestStep::Select { .. } => "select",
            TestStep::Hover { .. } => "hover",
            TestStep::Press { .. } => "press",
            TestStep::Checkpoint { .. } => "checkpoint",
        }
    }

    pub fn new_id() -> String {
        new_step_id()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureFlags {
    #[serde(default)]
    pub screenshot: bool,
    #[serde(default)]
    pub html: bool,
    #[serde(default)]
    pub console: bool,
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub performance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomAssertion {
    Exists { selector: String },
    NotExists { selector: String },
    TextEquals { selector: String, value: String },
    TextContains { selector: String, value: String },
    AttributeEquals {
        selector: String,
        attribute: String,
        value: String,
    },
    Count {
        selector: String,
        op: String,
        n: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConsoleAssertions {
    #[serde(default)]
    pub no_errors: bool,
    #[serde(default)]
    pub no_warnings: bool,
    #[serde(default)]
    pub max_errors: Option<usize>,
    #[serde(default)]
    pub max_warnings: Option<usize>,
    #[serde(default)]
    pub forbidden: Vec<String>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub allowed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Validations {
    #[serde(default)]
    pub dom: Vec<DomAssertion>,
    #[serde(default)]
    pub console: Option<ConsoleAssertions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capture: CaptureFlags,
    #[serde(default)]
    pub validations: Option<Validations>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageCategory {
    Screenshot,
    Html,
    ConsoleLog,
    Checkpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRef {
    pub category: StorageCategory,
    pub test_id: String,
    #[serde(default)]
    pub step_id: Option<String>,
    pub path: String,
    pub size: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointRefs {
    #[serde(default)]
    pub screenshot: Option<StorageRef>,
    #[serde(default)]
    pub html: Option<StorageRef>,
    #[serde(default)]
    pub console: Option<StorageRef>,
    #[serde(default)]
    pub network: Option<StorageRef>,
    #[serde(default)]
    pub performance: Option<StorageRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub assertion: String,
    pub passed: bool,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub actual: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub checkpoint_id: String,
    pub test_id: String,
    pub run_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub refs: CheckpointRefs,
    pub status: CheckpointStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub validations: Vec<ValidationResult>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl ConsoleLevel {
    pub fn all() -> [ConsoleLevel; 5] {
        [
            ConsoleLevel::Log,
            ConsoleLevel::Info,
            ConsoleLevel::Warn,
            ConsoleLevel::Error,
            ConsoleLevel::Debug,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
            ConsoleLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleSource {
    pub url: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ConsoleLevel,
    pub message: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub source: Option<ConsoleSource>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Passed,
    Failed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub checkpoints: Vec<CheckpointState>,
    pub artifacts: Vec<StorageRef>,
    #[serde(default)]
    pub error: Option<RunError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definition() -> TestDefinition {
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
            steps: vec![TestStep::Navigate {
                id: "s1".into(),
                url: "https://example.test/".into(),
                options: NavigateOptions::default(),
            }],
            before_all: vec![],
            after_all: vec![],
        }
    }

    #[test]
    fn rejects_empty_definition() {
        let mut def = sample_definition();
        def.steps.clear();
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_checkpoint_names() {
        let mut def = sample_definition();
        let checkpoint = CheckpointDefinition {
            id: "c1".into(),
            name: "home".into(),
            description: None,
            capture: CaptureFlags::default(),
            validations: None,
        };
        def.steps.push(TestStep::Checkpoint {
            id: "s2".into(),
            checkpoint: checkpoint.clone(),
        });
        def.steps.push(TestStep::Checkpoint {
            id: "s3".into(),
            checkpoint,
        });
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_unsupported_capture_flags() {
        let mut def = sample_definition();
        def.steps.push(TestStep::Checkpoint {
            id: "s2".into(),
            checkpoint: CheckpointDefinition {
                id: "c1".into(),
                name: "home".into(),
                description: None,
                capture: CaptureFlags {
                    network: true,
                    ..Default::default()
                },
                validations: None,
            },
        });
        assert!(def.validate().is_err());
    }
}
