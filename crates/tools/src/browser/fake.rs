//! In-memory `BrowserContext` for tests.

use async_trait::async_trait;
use pagecell_core::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::tab::{BrowserContext, ConsoleMessage, Download, ModalState, Tab, TabSnapshot};

#[derive(Clone)]
pub(crate) enum TitleBehavior {
    Fetch(String),
    Slow(Duration, String),
    Closed,
    Fail,
}

pub(crate) struct FakeTab {
    id: String,
    url: Mutex<String>,
    title: Mutex<String>,
    title_behavior: TitleBehavior,
    aria: String,
    console: Vec<ConsoleMessage>,
    downloads: Vec<Download>,
    modals: Mutex<Vec<ModalState>>,
    dialog_during_capture: Option<ModalState>,
    fail_capture: bool,
    capture_delay: Option<Duration>,
    pub(crate) captures: AtomicUsize,
    pub(crate) navigations: Mutex<Vec<String>>,
}

impl FakeTab {
    pub(crate) fn new(id: &str, url: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            url: Mutex::new(url.to_string()),
            title: Mutex::new(String::new()),
            title_behavior: TitleBehavior::Fetch(title.to_string()),
            aria: String::new(),
            console: Vec::new(),
            downloads: Vec::new(),
            modals: Mutex::new(Vec::new()),
            dialog_during_capture: None,
            fail_capture: false,
            capture_delay: None,
            captures: AtomicUsize::new(0),
            navigations: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_aria(mut self, aria: &str) -> Self {
        self.aria = aria.to_string();
        self
    }

    pub(crate) fn with_console(mut self, console: Vec<ConsoleMessage>) -> Self {
        self.console = console;
        self
    }

    pub(crate) fn with_downloads(mut self, downloads: Vec<Download>) -> Self {
        self.downloads = downloads;
        self
    }

    pub(crate) fn with_modal(self, modal: ModalState) -> Self {
        self.modals.lock().unwrap().push(modal);
        self
    }

    pub(crate) fn with_title_behavior(mut self, behavior: TitleBehavior) -> Self {
        self.title_behavior = behavior;
        self
    }

    /// A dialog opens while the accessibility tree is being fetched.
    pub(crate) fn with_dialog_during_capture(mut self, modal: ModalState) -> Self {
        self.dialog_during_capture = Some(modal);
        self
    }

    pub(crate) fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = Some(delay);
        self
    }

    pub(crate) fn failing_capture(mut self) -> Self {
        self.fail_capture = true;
        self
    }
}

#[async_trait]
impl Tab for FakeTab {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> String {
        self.title.lock().unwrap().clone()
    }

    fn url(&self) -> String {
        self.url.lock().unwrap().clone()
    }

    fn modal_states(&self) -> Vec<ModalState> {
        self.modals.lock().unwrap().clone()
    }

    fn console_messages(&self) -> Vec<ConsoleMessage> {
        self.console.clone()
    }

    async fn update_title(&self) -> Result<()> {
        let title = match &self.title_behavior {
            TitleBehavior::Fetch(title) => title.clone(),
            TitleBehavior::Slow(delay, title) => {
                tokio::time::sleep(*delay).await;
                title.clone()
            }
            TitleBehavior::Closed => return Err(Error::TabClosed(self.id.clone())),
            TitleBehavior::Fail => return Err(Error::Driver("title evaluation failed".to_string())),
        };
        *self.title.lock().unwrap() = title;
        Ok(())
    }

    async fn capture_snapshot(&self) -> Result<TabSnapshot> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.capture_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_capture {
            return Err(Error::Capture("target crashed".to_string()));
        }
        if let TitleBehavior::Fetch(title) = &self.title_behavior {
            *self.title.lock().unwrap() = title.clone();
        }
        let mut aria = self.aria.clone();
        if let Some(modal) = &self.dialog_during_capture {
            self.modals.lock().unwrap().push(modal.clone());
            aria.clear();
        }
        Ok(TabSnapshot {
            url: self.url(),
            title: self.title(),
            aria_snapshot: aria,
            console_messages: self.console.clone(),
            downloads: self.downloads.clone(),
            modal_states: self.modal_states(),
        })
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        if url.starts_with("bad://") {
            return Err(Error::Driver(format!("net::ERR_ABORTED at {}", url)));
        }
        *self.url.lock().unwrap() = url.to_string();
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn handle_dialog(&self, _accept: bool, _prompt_text: Option<&str>) -> Result<()> {
        let mut modals = self.modals.lock().unwrap();
        if modals.is_empty() {
            return Err(Error::Tool("No dialog visible".to_string()));
        }
        modals.remove(0);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeBrowser {
    tabs: Mutex<Vec<Arc<FakeTab>>>,
    current: Mutex<Option<usize>>,
}

impl FakeBrowser {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    /// Tabs in order; the last one is current.
    pub(crate) fn with_tabs(tabs: Vec<FakeTab>) -> Self {
        let current = tabs.len().checked_sub(1);
        Self {
            tabs: Mutex::new(tabs.into_iter().map(Arc::new).collect()),
            current: Mutex::new(current),
        }
    }

    pub(crate) fn tab(&self, index: usize) -> Arc<FakeTab> {
        self.tabs.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl BrowserContext for FakeBrowser {
    fn tabs(&self) -> Vec<Arc<dyn Tab>> {
        self.tabs
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.clone() as Arc<dyn Tab>)
            .collect()
    }

    fn current_tab(&self) -> Option<Arc<dyn Tab>> {
        let current = *self.current.lock().unwrap();
        let tabs = self.tabs.lock().unwrap();
        current
            .and_then(|i| tabs.get(i))
            .map(|t| t.clone() as Arc<dyn Tab>)
    }

    async fn new_tab(&self, url: Option<&str>) -> Result<Arc<dyn Tab>> {
        let mut tabs = self.tabs.lock().unwrap();
        let tab = Arc::new(FakeTab::new(
            &format!("tab-{}", tabs.len()),
            url.unwrap_or("about:blank"),
            "",
        ));
        tabs.push(tab.clone());
        *self.current.lock().unwrap() = Some(tabs.len() - 1);
        Ok(tab)
    }

    async fn select_tab(&self, index: usize) -> Result<Arc<dyn Tab>> {
        let tab = self
            .tabs
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Tool(format!("Tab {} not found", index)))?;
        *self.current.lock().unwrap() = Some(index);
        Ok(tab)
    }

    async fn close_tab(&self, index: Option<usize>) -> Result<()> {
        let mut tabs = self.tabs.lock().unwrap();
        let mut current = self.current.lock().unwrap();
        let index = index
            .or(*current)
            .filter(|i| *i < tabs.len())
            .ok_or_else(|| Error::Tool("No tab to close".to_string()))?;
        tabs.remove(index);
        *current = if tabs.is_empty() {
            None
        } else {
            Some(index.min(tabs.len() - 1))
        };
        Ok(())
    }
}
