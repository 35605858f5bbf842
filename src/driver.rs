//! The `BrowserDriver` trait abstracts the engine away from any one
//! browser-automation backend. `ChromiumDriver` wraps a pooled
//! `chromiumoxide::Page`; `ScriptedDriver` is an in-memory fake used by
//! the module tests and `src/tests.rs` so the suite runs without a
//! live Chrome process.

use crate::error::EngineError;
use crate::types::{ConsoleLevel, ConsoleLogEntry, ConsoleSource};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::log as cdp_log;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::{self as cdp_runtime, ConsoleApiCalledType};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct NavigateOutcome {
    pub success: bool,
    pub url: String,
    pub status: Option<u16>,
}

/// The minimal contract the engine needs from a browser session.
/// Every method suspends; implementors decide how.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<NavigateOutcome, EngineError>;
    async fn click(&self, selector: &str) -> Result<(), EngineError>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), EngineError>;
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, EngineError>;
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), EngineError>;
    async fn capture_screenshot(&self, full_page: bool) -> Result<Vec<u8>, EngineError>;
    async fn get_dom(&self) -> Result<String, EngineError>;
    async fn get_console_logs(&self) -> Result<Vec<ConsoleLogEntry>, EngineError>;
    async fn get_url(&self) -> Result<String, EngineError>;
    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), EngineError>;
    async fn close(&self) -> Result<(), EngineError>;
}

/// Production driver: one `chromiumoxide::Page` per run, obtained from
/// a `BrowserHandle` (see `browser_pool.rs`). `new` enables the CDP
/// `Runtime`/`Log` domains and spawns a task that subscribes to
/// `Runtime.consoleAPICalled` and `Log.entryAdded`, forwarding every
/// event into `console_buffer` via `push_console_entry` for the
/// lifetime of the page.
pub struct ChromiumDriver {
    page: Page,
    console_buffer: Arc<tokio::sync::Mutex<Vec<ConsoleLogEntry>>>,
    console_task: tokio::task::JoinHandle<()>,
}

impl ChromiumDriver {
    pub async fn new(page: Page) -> Result<Self, EngineError> {
        let console_buffer = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let console_task = spawn_console_listener(page.clone(), console_buffer.clone()).await?;
        Ok(Self {
            page,
            console_buffer,
            console_task,
        })
    }

    pub async fn push_console_entry(&self, entry: ConsoleLogEntry) {
        self.console_buffer.lock().await.push(entry);
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        self.console_task.abort();
    }
}

fn console_level_from_api_type(kind: &ConsoleApiCalledType) -> ConsoleLevel {
    match kind {
        ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => ConsoleLevel::Error,
        ConsoleApiCalledType::Warning => ConsoleLevel::Warn,
        ConsoleApiCalledType::Info => ConsoleLevel::Info,
        ConsoleApiCalledType::Debug | ConsoleApiCalledType::Trace => ConsoleLevel::Debug,
        _ => ConsoleLevel::Log,
    }
}

fn console_level_from_log_entry(level: &cdp_log::LogEntryLevel) -> ConsoleLevel {
    match level {
        cdp_log::LogEntryLevel::Error => ConsoleLevel::Error,
        cdp_log::LogEntryLevel::Warning => ConsoleLevel::Warn,
        cdp_log::LogEntryLevel::Info => ConsoleLevel::Info,
        cdp_log::LogEntryLevel::Verbose => ConsoleLevel::Debug,
    }
}

/// Enables `Runtime`/`Log` and spawns the task that forwards both
/// event streams into `buffer`. Best-effort: a domain that fails to
/// enable is skipped rather than failing page construction, mirroring
/// how flaky CDP domain setup is handled elsewhere in this codebase.
async fn spawn_console_listener(
    page: Page,
    buffer: Arc<tokio::sync::Mutex<Vec<ConsoleLogEntry>>>,
) -> Result<tokio::task::JoinHandle<()>, EngineError> {
    let _ = page.execute(cdp_runtime::EnableParams::default()).await;
    let _ = page.execute(cdp_log::EnableParams::default()).await;

    let mut console_events = page
        .event_listener::<cdp_runtime::EventConsoleApiCalled>()
        .await
        .map_err(|e| EngineError::BrowserUnavailable(e.to_string()))?;
    let mut log_events = page
        .event_listener::<cdp_log::EventEntryAdded>()
        .await
        .map_err(|e| EngineError::BrowserUnavailable(e.to_string()))?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                event = console_events.next() => {
                    let Some(event) = event else { break };
                    let args = event
                        .args
                        .iter()
                        .filter_map(|arg| arg.description.clone().or_else(|| arg.value.as_ref().map(|v| v.to_string())))
                        .collect::<Vec<_>>();
                    let message = args.join(" ");
                    buffer.lock().await.push(ConsoleLogEntry {
                        timestamp: chrono::Utc::now(),
                        level: console_level_from_api_type(&event.r#type),
                        message,
                        args,
                        stack: None,
                        source: None,
                    });
                }
                event = log_events.next() => {
                    let Some(event) = event else { break };
                    let entry = &event.entry;
                    buffer.lock().await.push(ConsoleLogEntry {
                        timestamp: chrono::Utc::now(),
                        level: console_level_from_log_entry(&entry.level),
                        message: entry.text.clone(),
                        args: vec![],
                        stack: None,
                        source: Some(ConsoleSource {
                            url: entry.url.clone(),
                            line: entry.line_number.map(|n| n as u32),
                            column: None,
                        }),
                    });
                }
                else => break,
            }
        }
        warn!("console event streams ended");
    }))
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&self, url: &str) -> Result<NavigateOutcome, EngineError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| EngineError::StepFailed {
                verb: "navigate".into(),
                locator: url.into(),
                reason: e.to_string(),
            })?;
        let current_url = self.page.url().await.ok().flatten().unwrap_or_default();
        Ok(NavigateOutcome {
            success: true,
            url: current_url,
            status: None,
        })
    }

    async fn click(&self, selector: &str) -> Result<(), EngineError> {
        self.page
            .find_element(selector)
            .await
            .map_err(|e| EngineError::ElementNotFound(format!("{selector}: {e}")))?
            .click()
            .await
            .map_err(|e| EngineError::StepFailed {
                verb: "click".into(),
                locator: selector.into(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), EngineError> {
        self.page
            .find_element(selector)
            .await
            .map_err(|e| EngineError::ElementNotFound(format!("{selector}: {e}")))?
            .type_str(text)
            .await
            .map_err(|e| EngineError::StepFailed {
                verb: "type".into(),
                locator: selector.into(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, EngineError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| EngineError::StepFailed {
                verb: "evaluate".into(),
                locator: script.chars().take(40).collect(),
                reason: e.to_string(),
            })?
            .into_value()
            .map_err(|e| EngineError::ValidationEngineError(e.to_string()))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        tokio::time::timeout(timeout, self.page.find_element(selector))
            .await
            .map_err(|_| EngineError::Timeout(timeout))?
            .map_err(|e| EngineError::ElementNotFound(format!("{selector}: {e}")))?;
        Ok(())
    }

    async fn capture_screenshot(&self, full_page: bool) -> Result<Vec<u8>, EngineError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| EngineError::CaptureFailed {
                checkpoint: "<screenshot>".into(),
                reason: e.to_string(),
            })
    }

    async fn get_dom(&self) -> Result<String, EngineError> {
        self.page
            .content()
            .await
            .map_err(|e| EngineError::CaptureFailed {
                checkpoint: "<dom>".into(),
                reason: e.to_string(),
            })
    }

    async fn get_console_logs(&self) -> Result<Vec<ConsoleLogEntry>, EngineError> {
        Ok(self.console_buffer.lock().await.clone())
    }

    async fn get_url(&self) -> Result<String, EngineError> {
        Ok(self.page.url().await.ok().flatten().unwrap_or_default())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), EngineError> {
        self.page
            .execute(
                SetDeviceMetricsOverrideParams::builder()
                    .width(width as i64)
                    .height(height as i64)
                    .device_scale_factor(1.0)
                    .mobile(false)
                    .build()
                    .map_err(EngineError::ConfigurationError)?,
            )
            .await
            .map_err(|e| EngineError::StepFailed {
                verb: "set_viewport".into(),
                locator: format!("{width}x{height}"),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        // Close errors are swallowed; the browser pool owns the real
        // lifecycle of the underlying page.
        let _ = self.page.close().await;
        Ok(())
    }
}

/// Deterministic, in-memory driver used by tests. Scripted with a
/// fixed DOM/console snapshot and records every call it receives.
pub struct ScriptedDriver {
    pub dom: tokio::sync::Mutex<String>,
    pub console: tokio::sync::Mutex<Vec<ConsoleLogEntry>>,
    pub screenshot: tokio::sync::Mutex<Vec<u8>>,
    pub url: tokio::sync::Mutex<String>,
    pub calls: tokio::sync::Mutex<Vec<String>>,
}

impl ScriptedDriver {
    pub fn new(dom: impl Into<String>, console: Vec<ConsoleLogEntry>, screenshot: Vec<u8>) -> Self {
        Self {
            dom: tokio::sync::Mutex::new(dom.into()),
            console: tokio::sync::Mutex::new(console),
            screenshot: tokio::sync::Mutex::new(screenshot),
            url: tokio::sync::Mutex::new(String::new()),
            calls: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    async fn record(&self, call: impl Into<String>) {
        self.calls.lock().await.push(call.into());
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn navigate(&self, url: &str) -> Result<NavigateOutcome, EngineError> {
        self.record(format!("navigate:{url}")).await;
        *self.url.lock().await = url.to_string();
        Ok(NavigateOutcome {
            success: true,
            url: url.to_string(),
            status: Some(200),
        })
    }

    async fn click(&self, selector: &str) -> Result<(), EngineError> {
        self.record(format!("click:{selector}")).await;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), EngineError> {
        self.record(format!("type:{selector}:{text}")).await;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, EngineError> {
        self.record(format!("evaluate:{script}")).await;
        Ok(serde_json::Value::Null)
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<(), EngineError> {
        self.record(format!("wait_for_selector:{selector}")).await;
        let dom = self.dom.lock().await;
        let document = scraper::Html::parse_document(&dom);
        let parsed = scraper::Selector::parse(selector)
            .map_err(|e| EngineError::ValidationEngineError(format!("{e:?}")))?;
        if document.select(&parsed).next().is_none() {
            return Err(EngineError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    async fn capture_screenshot(&self, _full_page: bool) -> Result<Vec<u8>, EngineError> {
        self.record("capture_screenshot").await;
        Ok(self.screenshot.lock().await.clone())
    }

    async fn get_dom(&self) -> Result<String, EngineError> {
        self.record("get_dom").await;
        Ok(self.dom.lock().await.clone())
    }

    async fn get_console_logs(&self) -> Result<Vec<ConsoleLogEntry>, EngineError> {
        self.record("get_console_logs").await;
        Ok(self.console.lock().await.clone())
    }

    async fn get_url(&self) -> Result<String, EngineError> {
        Ok(self.url.lock().await.clone())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), EngineError> {
        self.record(format!("set_viewport:{width}x{height}")).await;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.record("close").await;
        Ok(())
    }
}
