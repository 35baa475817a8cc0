//! Tab handles and the captured per-tab page state.
//!
//! The response layer only talks to the browser through [`BrowserContext`] and [`Tab`];
//! the CDP-backed implementation lives in `session.rs`.

use async_trait::async_trait;
use pagecell_core::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Tool that resolves both dialogs and file choosers.
pub const HANDLE_DIALOG_TOOL: &str = "browser_handle_dialog";

const NO_OPEN_PAGES: &str =
    "No open pages available. Use the \"browser_navigate\" tool to navigate to a page first.";

/// One console API call observed on the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
    pub url: Option<String>,
    pub line: Option<u32>,
}

impl fmt::Display for ConsoleMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level.to_uppercase(), self.text)?;
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            write!(f, " @ {}", url)?;
            if let Some(line) = self.line {
                write!(f, ":{}", line)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    pub suggested_filename: String,
    pub output_file: String,
    pub finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ModalKind {
    Dialog,
    FileChooser,
}

/// A blocking dialog or file chooser currently open on a tab.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalState {
    #[serde(rename = "type")]
    pub kind: ModalKind,
    pub description: String,
    pub cleared_by: String,
}

impl ModalState {
    pub fn dialog(dialog_type: &str, message: &str) -> Self {
        Self {
            kind: ModalKind::Dialog,
            description: format!("\"{}\" dialog with message \"{}\"", dialog_type, message),
            cleared_by: HANDLE_DIALOG_TOOL.to_string(),
        }
    }

    pub fn file_chooser() -> Self {
        Self {
            kind: ModalKind::FileChooser,
            description: "File chooser".to_string(),
            cleared_by: HANDLE_DIALOG_TOOL.to_string(),
        }
    }
}

/// Everything observable about one tab at capture time. Never mutated after creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabSnapshot {
    pub url: String,
    pub title: String,
    /// Raw accessibility tree text, before compaction.
    pub aria_snapshot: String,
    pub console_messages: Vec<ConsoleMessage>,
    pub downloads: Vec<Download>,
    pub modal_states: Vec<ModalState>,
}

#[async_trait]
pub trait Tab: Send + Sync {
    /// Stable identifier (CDP target id).
    fn id(&self) -> &str;
    /// Title cached by the last `update_title`.
    fn title(&self) -> String;
    fn url(&self) -> String;
    fn modal_states(&self) -> Vec<ModalState>;
    fn console_messages(&self) -> Vec<ConsoleMessage>;

    async fn update_title(&self) -> Result<()>;
    /// Capture the tab's state. Must complete, reporting the dialog as a modal state,
    /// if a dialog opens while the capture is in flight.
    async fn capture_snapshot(&self) -> Result<TabSnapshot>;

    async fn navigate(&self, url: &str) -> Result<()>;
    /// PNG bytes.
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>>;
    async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> Result<()>;
}

/// Process-wide tab bookkeeping. Tab lifecycle is owned by the implementation; responses
/// only read through `tabs`/`current_tab`.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    fn tabs(&self) -> Vec<Arc<dyn Tab>>;
    fn current_tab(&self) -> Option<Arc<dyn Tab>>;

    fn current_tab_or_die(&self) -> Result<Arc<dyn Tab>> {
        self.current_tab()
            .ok_or_else(|| Error::NotFound(NO_OPEN_PAGES.to_string()))
    }

    fn is_current(&self, tab: &dyn Tab) -> bool {
        self.current_tab()
            .map(|current| current.id() == tab.id())
            .unwrap_or(false)
    }

    async fn new_tab(&self, url: Option<&str>) -> Result<Arc<dyn Tab>>;
    async fn select_tab(&self, index: usize) -> Result<Arc<dyn Tab>>;
    /// Close the tab at `index`, or the current tab.
    async fn close_tab(&self, index: Option<usize>) -> Result<()>;

    /// The current tab, opening a blank one if there is none.
    async fn ensure_tab(&self) -> Result<Arc<dyn Tab>> {
        match self.current_tab() {
            Some(tab) => Ok(tab),
            None => self.new_tab(None).await,
        }
    }
}
