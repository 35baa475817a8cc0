//! Per-invocation response accumulator.
//!
//! A `Response` is created by the dispatcher for one tool call, written into by the tool,
//! finished once (post-action page capture + tab title refresh) and then rendered into a
//! [`Payload`]. It is never shared between invocations.

pub mod payload;

use futures::future::join_all;
use pagecell_core::{BrowserConfig, Error, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::browser::tab::{BrowserContext, Tab, TabSnapshot};
pub use payload::{ImageContent, PageState, PageView, Payload, TabEntry, TabsListing};

/// Binary attachment, encoded only at serialization time.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub data: Vec<u8>,
    pub content_type: String,
}

impl ImageAttachment {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            data,
            content_type: "image/png".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct Response {
    tool_name: String,
    tool_args: Value,
    result: Vec<String>,
    code: Vec<String>,
    images: Vec<ImageAttachment>,
    is_error: bool,
    include_snapshot: bool,
    include_tabs: bool,
    tab_snapshot: Option<TabSnapshot>,
    finished: bool,
}

impl Response {
    pub fn new(tool_name: impl Into<String>, tool_args: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_args,
            result: Vec::new(),
            code: Vec::new(),
            images: Vec::new(),
            is_error: false,
            include_snapshot: false,
            include_tabs: false,
            tab_snapshot: None,
            finished: false,
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn tool_args(&self) -> &Value {
        &self.tool_args
    }

    pub fn add_result(&mut self, line: impl Into<String>) {
        self.result.push(line.into());
    }

    /// Record a tool-level failure. The response stays erroneous for good.
    pub fn add_error(&mut self, line: impl Into<String>) {
        self.result.push(line.into());
        self.is_error = true;
    }

    pub fn add_code(&mut self, line: impl Into<String>) {
        self.code.push(line.into());
    }

    pub fn add_image(&mut self, image: ImageAttachment) {
        self.images.push(image);
    }

    pub fn set_include_snapshot(&mut self) {
        self.include_snapshot = true;
    }

    pub fn set_include_tabs(&mut self) {
        self.include_tabs = true;
    }

    pub fn result(&self) -> &[String] {
        &self.result
    }

    pub fn result_text(&self) -> String {
        self.result.join("\n")
    }

    pub fn code(&self) -> &[String] {
        &self.code
    }

    pub fn code_text(&self) -> String {
        self.code.join("\n")
    }

    pub fn images(&self) -> &[ImageAttachment] {
        &self.images
    }

    /// `None` until an error is recorded, then `Some(true)` forever.
    pub fn is_error(&self) -> Option<bool> {
        self.is_error.then_some(true)
    }

    pub fn include_snapshot(&self) -> bool {
        self.include_snapshot
    }

    pub fn include_tabs(&self) -> bool {
        self.include_tabs
    }

    pub fn tab_snapshot(&self) -> Option<&TabSnapshot> {
        self.tab_snapshot.as_ref()
    }

    /// Post-action protocol: capture the current tab if a snapshot was requested, and
    /// refresh every tab's cached title. Both run concurrently, each bounded by
    /// `capture_timeout_ms`. The current tab is resolved here, never cached.
    ///
    /// Driver failures while capturing or refreshing propagate; a tab that closed during
    /// the title refresh is skipped. A title that misses the bound is kept stale, except
    /// on the tab being captured, where it fails the finish with `Error::Timeout`.
    pub async fn finish(&mut self, browser: &dyn BrowserContext, config: &BrowserConfig) -> Result<()> {
        if self.finished {
            return Err(Error::Validation(format!(
                "response for '{}' already finished",
                self.tool_name
            )));
        }
        self.finished = true;

        let bound = Duration::from_millis(config.capture_timeout_ms);
        let wants_snapshot = self.include_snapshot && browser.current_tab().is_some();

        let capture = async {
            if !wants_snapshot {
                return Ok(None);
            }
            let tab = browser.current_tab_or_die()?;
            match tokio::time::timeout(bound, tab.capture_snapshot()).await {
                Ok(Ok(snapshot)) => Ok(Some(snapshot)),
                Ok(Err(e @ (Error::Capture(_) | Error::Timeout(_)))) => Err(e),
                Ok(Err(e)) => Err(Error::Capture(format!("tab {}: {}", tab.id(), e))),
                Err(_) => Err(Error::Timeout(format!(
                    "snapshot of tab {} not captured within {}ms",
                    tab.id(),
                    bound.as_millis()
                ))),
            }
        };

        let current_id = browser.current_tab().map(|tab| tab.id().to_string());
        let required = current_id.as_deref().filter(|_| wants_snapshot);
        let (snapshot, titles) = tokio::join!(capture, refresh_titles(browser.tabs(), required, bound));
        let snapshot = snapshot?;
        titles?;

        debug!(
            tool = %self.tool_name,
            captured = snapshot.is_some(),
            modal = snapshot.as_ref().map_or(false, |s| !s.modal_states.is_empty()),
            "Response finished"
        );
        self.tab_snapshot = snapshot;
        Ok(())
    }

    /// Render into the outbound payload against the browser's current tab set.
    pub fn serialize(&self, browser: &dyn BrowserContext, config: &BrowserConfig) -> Payload {
        let tabs = payload::tab_entries(browser);
        Payload::render(self, &tabs, config)
    }
}

/// Refresh every tab's cached title, each tab bounded on its own.
///
/// A tab that misses the bound keeps its cached title, unless it is `required`: the
/// current tab while a snapshot is being taken, whose title ends up in the page state.
async fn refresh_titles(tabs: Vec<Arc<dyn Tab>>, required: Option<&str>, bound: Duration) -> Result<()> {
    let results = join_all(tabs.iter().map(|tab| async move {
        let result = match tokio::time::timeout(bound, tab.update_title()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "title of tab {} not refreshed within {}ms",
                tab.id(),
                bound.as_millis()
            ))),
        };
        (tab.id().to_string(), result)
    }))
    .await;

    for (id, result) in results {
        match result {
            Ok(()) => {}
            Err(Error::TabClosed(reason)) => {
                debug!(tab = %id, %reason, "Tab closed during title refresh")
            }
            Err(e @ Error::Timeout(_)) if required == Some(id.as_str()) => return Err(e),
            Err(Error::Timeout(reason)) => {
                warn!(tab = %id, %reason, "Keeping cached tab title")
            }
            Err(e) => return Err(Error::Capture(format!("title refresh for tab {}: {}", id, e))),
        }
    }
    Ok(())
}
