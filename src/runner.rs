//! Executes one non-checkpoint `TestStep` against a `BrowserDriver` and
//! reports a structured outcome; never persists artifacts.

use crate::driver::BrowserDriver;
use crate::types::{ScrollBehavior, TestStep, WaitCondition};
use std::time::{Duration, Instant};

const FUNCTION_POLL_INTERVAL: Duration = Duration::from_millis(100);
const FUNCTION_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const NAVIGATION_SLEEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step_id: String,
    pub success: bool,
    pub duration_ms: u64,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

fn js_string(raw: &str) -> String {
    serde_json::to_string(raw).unwrap_or_else(|_| "\"\"".to_string())
}

fn ok(step_id: &str, start: Instant, data: Option<serde_json::Value>) -> StepOutcome {
    StepOutcome {
        step_id: step_id.to_string(),
        success: true,
        duration_ms: start.elapsed().as_millis() as u64,
        data,
        error: None,
    }
}

fn err(step_id: &str, start: Instant, verb: &str, locator: &str, reason: impl std::fmt::Display) -> StepOutcome {
    StepOutcome {
        step_id: step_id.to_string(),
        success: false,
        duration_ms: start.elapsed().as_millis() as u64,
        data: None,
        error: Some(format!("step '{verb}' failed at locator '{locator}': {reason}")),
    }
}

/// Executes a single step. `default_wait_timeout` bounds `selector`
/// waits that don't specify their own; checkpoint steps are not handled
/// here — see `checkpoint_manager.rs`.
pub async fn execute_step(
    driver: &dyn BrowserDriver,
    step: &TestStep,
    default_wait_timeout: Duration,
) -> StepOutcome {
    let start = Instant::now();
    let step_id = step.id();
    let verb = step.verb();

    match step {
        TestStep::Navigate { url, options, .. } => match driver.navigate(url).await {
            Ok(outcome) => ok(
                step_id,
                start,
                Some(serde_json::json!({"url": outcome.url, "status": outcome.status})),
            ),
            Err(e) => err(step_id, start, verb, &locator_or(options.referer.as_deref(), url), e),
        },

        TestStep::Click { selector, .. } => match driver.click(selector).await {
            Ok(()) => ok(step_id, start, None),
            Err(e) => err(step_id, start, verb, selector, e),
        },

        TestStep::Type { selector, text, options, .. } => {
            if options.clear_first {
                let clear_script = format!(
                    "(function(){{ var el = document.querySelector({}); if (el) el.value = ''; }})()",
                    js_string(selector)
                );
                if let Err(e) = driver.evaluate(&clear_script).await {
                    return err(step_id, start, verb, selector, e);
                }
            }
            match driver.type_text(selector, text).await {
                Ok(()) => ok(step_id, start, None),
                Err(e) => err(step_id, start, verb, selector, e),
            }
        }

        TestStep::Wait { condition, .. } => execute_wait(driver, step_id, condition, default_wait_timeout, start).await,

        TestStep::Scroll { selector, x, y, behavior, .. } => {
            let script = scroll_script(selector.as_deref(), *x, *y, *behavior);
            match driver.evaluate(&script).await {
                Ok(_) => ok(step_id, start, None),
                Err(e) => err(step_id, start, verb, selector.as_deref().unwrap_or("<window>"), e),
            }
        }

        TestStep::Select { selector, values, .. } => {
            let script = select_script(selector, values);
            match driver.evaluate(&script).await {
                Ok(_) => ok(step_id, start, None),
                Err(e) => err(step_id, start, verb, selector, e),
            }
        }

        TestStep::Hover { selector, .. } => {
            let script = format!(
                "(function(){{ var el = document.querySelector({}); if (el) el.dispatchEvent(new MouseEvent('mouseover', {{bubbles: true}})); }})()",
                js_string(selector)
            );
            match driver.evaluate(&script).await {
                Ok(_) => ok(step_id, start, None),
                Err(e) => err(step_id, start, verb, selector, e),
            }
        }

        TestStep::Press { key, .. } => {
            let script = format!(
                "(function(){{ var el = document.activeElement || document.body; el.dispatchEvent(new KeyboardEvent('keydown', {{key: {}, bubbles: true}})); }})()",
                js_string(key)
            );
            match driver.evaluate(&script).await {
                Ok(_) => ok(step_id, start, None),
                Err(e) => err(step_id, start, verb, key, e),
            }
        }

        TestStep::Checkpoint { checkpoint, .. } => {
            // The orchestrator routes checkpoint steps to the checkpoint
            // manager before they ever reach the runner; reaching here
            // is a caller bug, not a driver failure.
            err(
                step_id,
                start,
                verb,
                &checkpoint.name,
                "checkpoint steps must be executed by the checkpoint manager",
            )
        }
    }
}

fn locator_or<'a>(preferred: Option<&'a str>, fallback: &'a str) -> String {
    preferred.unwrap_or(fallback).to_string()
}

async fn execute_wait(
    driver: &dyn BrowserDriver,
    step_id: &str,
    condition: &WaitCondition,
    default_wait_timeout: Duration,
    start: Instant,
) -> StepOutcome {
    match condition {
        WaitCondition::Timeout { ms } => {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            ok(step_id, start, None)
        }

        WaitCondition::Selector { selector, .. } => {
            match driver.wait_for_selector(selector, default_wait_timeout).await {
                Ok(()) => ok(step_id, start, None),
                Err(e) => err(step_id, start, "wait", selector, e),
            }
        }

        WaitCondition::Function { body, args } => {
            let script = format!("(function(){{ {body} }})({})", args.join(", "));
            let deadline = Instant::now() + FUNCTION_POLL_TIMEOUT;
            loop {
                match driver.evaluate(&script).await {
                    Ok(value) if is_truthy(&value) => return ok(step_id, start, Some(value)),
                    Ok(_) => {}
                    Err(e) => return err(step_id, start, "wait", body, e),
                }
                if Instant::now() >= deadline {
                    return err(step_id, start, "wait", body, "function wait timed out after 30s");
                }
                tokio::time::sleep(FUNCTION_POLL_INTERVAL).await;
            }
        }

        // Coarse placeholders: a real implementation
        // would subscribe to driver lifecycle/network events.
        WaitCondition::Navigation => {
            tokio::time::sleep(NAVIGATION_SLEEP).await;
            ok(step_id, start, None)
        }
        WaitCondition::NetworkIdle { timeout_ms } => {
            let bound = timeout_ms.map(Duration::from_millis).unwrap_or(NAVIGATION_SLEEP);
            tokio::time::sleep(bound.min(default_wait_timeout)).await;
            ok(step_id, start, None)
        }
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(_) => true,
    }
}

fn scroll_script(selector: Option<&str>, x: Option<i64>, y: Option<i64>, behavior: Option<ScrollBehavior>) -> String {
    let behavior = match behavior {
        Some(ScrollBehavior::Smooth) => "smooth",
        _ => "auto",
    };
    match selector {
        Some(sel) => format!(
            "(function(){{ var el = document.querySelector({}); if (el) el.scrollIntoView({{behavior: '{behavior}'}}); }})()",
            js_string(sel)
        ),
        None => format!(
            "window.scrollTo({{left: {}, top: {}, behavior: '{behavior}'}})",
            x.unwrap_or(0),
            y.unwrap_or(0)
        ),
    }
}

fn select_script(selector: &str, values: &[String]) -> String {
    let values_json = serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string());
    format!(
        "(function(){{ var el = document.querySelector({}); var values = {values_json}; if (!el) return; for (var i = 0; i < el.options.length; i++) {{ el.options[i].selected = values.indexOf(el.options[i].value) !== -1; }} el.dispatchEvent(new Event('change', {{bubbles: true}})); }})()",
        js_string(selector)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ScriptedDriver;
    use crate::types::{NavigateOptions, TypeOptions};

    fn driver() -> ScriptedDriver {
        ScriptedDriver::new("<html><body><h1>hi</h1></body></html>", vec![], vec![])
    }

    #[tokio::test]
    async fn navigate_reports_driver_url() {
        let d = driver();
        let step = TestStep::Navigate {
            id: "s1".into(),
            url: "https://example.test/".into(),
            options: NavigateOptions::default(),
        };
        let outcome = execute_step(&d, &step, Duration::from_secs(1)).await;
        assert!(outcome.success);
        assert_eq!(outcome.data.unwrap()["url"], "https://example.test/");
    }

    #[tokio::test]
    async fn selector_wait_fails_with_verb_and_locator_in_message() {
        let d = driver();
        let step = TestStep::Wait {
            id: "s2".into(),
            condition: WaitCondition::Selector {
                selector: "#missing".into(),
                visible: true,
            },
        };
        let outcome = execute_step(&d, &step, Duration::from_millis(50)).await;
        assert!(!outcome.success);
        let message = outcome.error.unwrap();
        assert!(message.contains("wait"));
        assert!(message.contains("#missing"));
    }

    #[tokio::test]
    async fn type_with_clear_first_calls_evaluate_then_type() {
        let d = driver();
        let step = TestStep::Type {
            id: "s3".into(),
            selector: "#q".into(),
            text: "hello".into(),
            options: TypeOptions {
                delay_ms: None,
                clear_first: true,
            },
        };
        let outcome = execute_step(&d, &step, Duration::from_secs(1)).await;
        assert!(outcome.success);
        let calls = d.calls.lock().await;
        assert!(calls.iter().any(|c| c.starts_with("evaluate:")));
        assert!(calls.iter().any(|c| c.starts_with("type:#q:hello")));
    }

    #[tokio::test]
    async fn timeout_wait_sleeps_for_requested_duration() {
        let d = driver();
        let step = TestStep::Wait {
            id: "s4".into(),
            condition: WaitCondition::Timeout { ms: 10 },
        };
        let start = Instant::now();
        let outcome = execute_step(&d, &step, Duration::from_secs(1)).await;
        assert!(outcome.success);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
