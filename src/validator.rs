//! Drives the assertion engine over a checkpoint's declared
//! `Validations` block and reports whether the checkpoint as a whole
//! passed.

use crate::assertions::{evaluate_console, evaluate_dom};
use crate::error::EngineError;
use crate::types::{ConsoleLogEntry, ValidationResult, Validations};

pub struct CheckpointOutcome {
    pub passed: bool,
    pub validations: Vec<ValidationResult>,
}

/// `html`/`console` are `None` when the checkpoint didn't request that
/// capture; a declared DOM or console assertion against a missing
/// capture fails rather than silently passing.
pub fn validate(
    validations: &Validations,
    html: Option<&str>,
    console: Option<&[ConsoleLogEntry]>,
) -> Result<CheckpointOutcome, EngineError> {
    let mut results = Vec::new();

    for assertion in &validations.dom {
        match html {
            Some(html) => results.push(evaluate_dom(html, assertion)?),
            None => results.push(ValidationResult {
                assertion: format!("dom.{assertion:?}"),
                passed: false,
                expected: None,
                actual: None,
                message: "checkpoint did not capture html".to_string(),
            }),
        }
    }

    if let Some(console_assertions) = &validations.console {
        match console {
            Some(entries) => results.extend(evaluate_console(entries, console_assertions)),
            None => results.push(ValidationResult {
                assertion: "console".to_string(),
                passed: false,
                expected: None,
                actual: None,
                message: "checkpoint did not capture console logs".to_string(),
            }),
        }
    }

    let passed = results.iter().all(|r| r.passed);
    Ok(CheckpointOutcome { passed, validations: results })
}
