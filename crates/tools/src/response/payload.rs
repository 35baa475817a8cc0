//! Outbound payload for one finished response.
//!
//! Rendering is pure: a finished [`Response`], the tab listing and the browser config go in,
//! a [`Payload`] comes out. Which of page state / modal states is present is carried by
//! [`PageView`], so the two can never be emitted together.

use base64::Engine;
use pagecell_core::{BrowserConfig, ImageResponses};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;

use super::Response;
use crate::browser::aria;
use crate::browser::tab::{BrowserContext, Download, ModalState};

pub const NO_OPEN_TABS: &str =
    "No open tabs. Use the \"browser_navigate\" tool to navigate to a page first.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabEntry {
    pub index: usize,
    pub title: String,
    pub url: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabsListing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub tabs: Vec<TabEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub url: String,
    pub title: String,
    /// Compacted aria tree.
    pub aria_snapshot: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub console_messages: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub downloads: Vec<Download>,
}

/// What the payload says about the current page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageView {
    Snapshot(PageState),
    /// A dialog is blocking the page; its content is not the actionable surface.
    Modal(Vec<ModalState>),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub tool_name: String,
    pub tool_args: Value,
    pub is_error: Option<bool>,
    pub result: Option<Vec<String>>,
    pub code: Option<Vec<String>>,
    pub tabs: Option<TabsListing>,
    pub view: PageView,
    pub images: Vec<ImageContent>,
}

/// Snapshot the browser's tab set for rendering.
pub fn tab_entries(browser: &dyn BrowserContext) -> Vec<TabEntry> {
    browser
        .tabs()
        .iter()
        .enumerate()
        .map(|(index, tab)| TabEntry {
            index,
            title: tab.title(),
            url: tab.url(),
            is_current: browser.is_current(tab.as_ref()),
        })
        .collect()
}

fn non_empty(lines: &[String]) -> Option<Vec<String>> {
    (!lines.is_empty()).then(|| lines.to_vec())
}

/// Cut to `max` chars, marking the cut with "...".
fn trim_to(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

impl Payload {
    pub fn render(response: &Response, tabs: &[TabEntry], config: &BrowserConfig) -> Self {
        let wants_tabs = response.include_snapshot() || response.include_tabs();
        let tabs = if !wants_tabs || (tabs.len() == 1 && !response.include_tabs()) {
            None
        } else if tabs.is_empty() {
            Some(TabsListing {
                message: Some(NO_OPEN_TABS.to_string()),
                tabs: Vec::new(),
            })
        } else {
            Some(TabsListing {
                message: None,
                tabs: tabs.to_vec(),
            })
        };

        let view = match response.tab_snapshot() {
            Some(snapshot) if !snapshot.modal_states.is_empty() => {
                PageView::Modal(snapshot.modal_states.clone())
            }
            Some(snapshot) => PageView::Snapshot(PageState {
                url: snapshot.url.clone(),
                title: snapshot.title.clone(),
                aria_snapshot: aria::compact(&snapshot.aria_snapshot),
                console_messages: snapshot
                    .console_messages
                    .iter()
                    .map(|m| trim_to(&m.to_string(), config.console_message_max_chars))
                    .collect(),
                downloads: snapshot.downloads.clone(),
            }),
            None => PageView::Empty,
        };

        let images = match config.image_responses {
            ImageResponses::Omit => Vec::new(),
            ImageResponses::Include => response
                .images()
                .iter()
                .map(|image| ImageContent {
                    kind: "image",
                    data: base64::engine::general_purpose::STANDARD.encode(&image.data),
                    mime_type: image.content_type.clone(),
                })
                .collect(),
        };

        Self {
            tool_name: response.tool_name().to_string(),
            tool_args: response.tool_args().clone(),
            is_error: response.is_error(),
            result: non_empty(response.result()),
            code: non_empty(response.code()),
            tabs,
            view,
            images,
        }
    }

    pub fn page_state(&self) -> Option<&PageState> {
        match &self.view {
            PageView::Snapshot(state) => Some(state),
            _ => None,
        }
    }

    pub fn modal_states(&self) -> Option<&[ModalState]> {
        match &self.view {
            PageView::Modal(states) => Some(states),
            _ => None,
        }
    }

    /// Human-readable rendering for terminals and chat transcripts.
    pub fn to_markdown(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        if let Some(result) = &self.result {
            sections.push(format!("### Result\n{}", result.join("\n")));
        }
        if let Some(code) = &self.code {
            sections.push(format!("### Ran code\n```js\n{}\n```", code.join("\n")));
        }
        if let Some(listing) = &self.tabs {
            let mut out = String::from("### Open tabs");
            if let Some(message) = &listing.message {
                let _ = write!(out, "\n{}", message);
            }
            for tab in &listing.tabs {
                let current = if tab.is_current { "(current) " } else { "" };
                let _ = write!(out, "\n- {}: {}[{}] ({})", tab.index, current, tab.title, tab.url);
            }
            sections.push(out);
        }

        match &self.view {
            PageView::Modal(states) => {
                let mut out = String::from("### Modal state");
                for state in states {
                    let _ = write!(
                        out,
                        "\n- [{}]: can be handled by the \"{}\" tool",
                        state.description, state.cleared_by
                    );
                }
                sections.push(out);
            }
            PageView::Snapshot(state) => sections.push(page_state_markdown(state)),
            PageView::Empty => {}
        }

        if !self.images.is_empty() {
            sections.push(format!("_{} image(s) attached_", self.images.len()));
        }
        sections.join("\n\n")
    }
}

fn page_state_markdown(state: &PageState) -> String {
    let mut out = String::from("### Page state");
    let _ = write!(out, "\n- Page URL: {}", state.url);
    let _ = write!(out, "\n- Page Title: {}", state.title);
    let _ = write!(out, "\n- Page Snapshot:\n```yaml\n{}\n```", state.aria_snapshot);

    if !state.console_messages.is_empty() {
        out.push_str("\n\n### New console messages");
        for message in &state.console_messages {
            let _ = write!(out, "\n- {}", message);
        }
    }
    if !state.downloads.is_empty() {
        out.push_str("\n\n### Downloads");
        for download in &state.downloads {
            if download.finished {
                let _ = write!(
                    out,
                    "\n- Downloaded file {} to {}",
                    download.suggested_filename, download.output_file
                );
            } else {
                let _ = write!(out, "\n- Downloading file {} ...", download.suggested_filename);
            }
        }
    }
    out
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Payload", 9)?;
        s.serialize_field("toolName", &self.tool_name)?;
        s.serialize_field("toolArgs", &self.tool_args)?;
        match self.is_error {
            Some(flag) => s.serialize_field("isError", &flag)?,
            None => s.skip_field("isError")?,
        }
        s.serialize_field("result", &self.result)?;
        s.serialize_field("code", &self.code)?;
        s.serialize_field("tabs", &self.tabs)?;
        s.serialize_field("pageState", &self.page_state())?;
        s.serialize_field("modalStates", &self.modal_states())?;
        s.serialize_field("images", &self.images)?;
        s.end()
    }
}
