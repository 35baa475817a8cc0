//! CDP-backed browser: process launch, tab bookkeeping and per-tab event capture.
//!
//! `CdpBrowser` owns one browser process, a browser-level CDP connection for target
//! management, and one `CdpTab` (page-level connection) per open tab.

use async_trait::async_trait;
use base64::Engine;
use pagecell_core::{BrowserConfig, BrowserEngine, Error, Paths, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::cdp::CdpClient;
use super::snapshot::{assign_refs, parse_ax_tree, render_aria};
use super::tab::{BrowserContext, ConsoleMessage, Download, ModalKind, ModalState, Tab, TabSnapshot};

/// Deepest accessibility level rendered into a snapshot.
const MAX_SNAPSHOT_DEPTH: usize = 40;

fn driver_err(e: String) -> Error {
    Error::Driver(format!("CDP: {}", e))
}

/// A dead connection means the target is gone; anything else is a driver failure.
fn tab_err(target_id: &str, e: String) -> Error {
    if e.contains("channel closed") || e.contains("Failed to send") || e.contains("No target") {
        Error::TabClosed(format!("{}: {}", target_id, e))
    } else {
        driver_err(e)
    }
}

#[derive(Default)]
struct TabState {
    title: String,
    url: String,
    console: Vec<ConsoleMessage>,
    downloads: Vec<Download>,
    /// Download guid -> index into `downloads`.
    download_index: HashMap<String, usize>,
}

/// One page target with its own CDP connection.
pub struct CdpTab {
    target_id: String,
    cdp: CdpClient,
    state: Arc<Mutex<TabState>>,
    modals: Arc<watch::Sender<Vec<ModalState>>>,
    listener: tokio::task::JoinHandle<()>,
    settle: Duration,
}

impl CdpTab {
    pub async fn open(
        target_id: &str,
        ws_url: &str,
        download_dir: &Path,
        settle: Duration,
    ) -> Result<Self> {
        let cdp = CdpClient::connect(ws_url).await.map_err(driver_err)?;
        for domain in ["Page", "Runtime", "Accessibility"] {
            cdp.enable_domain(domain).await.map_err(driver_err)?;
        }
        if let Err(e) = cdp.intercept_file_chooser(true).await {
            debug!(target_id, error = %e, "File chooser interception unavailable");
        }
        if let Err(e) = cdp.allow_downloads(&download_dir.display().to_string()).await {
            warn!(target_id, error = %e, "Download tracking unavailable");
        }

        let state = Arc::new(Mutex::new(TabState::default()));
        let (modal_tx, _) = watch::channel(Vec::new());
        let modals = Arc::new(modal_tx);

        let events = TabEvents {
            console: cdp.subscribe_event("Runtime.consoleAPICalled").await,
            navigated: cdp.subscribe_event("Page.frameNavigated").await,
            dialog_opened: cdp.subscribe_event("Page.javascriptDialogOpening").await,
            dialog_closed: cdp.subscribe_event("Page.javascriptDialogClosed").await,
            file_chooser: cdp.subscribe_event("Page.fileChooserOpened").await,
            download_begin: cdp.subscribe_event("Browser.downloadWillBegin").await,
            download_progress: cdp.subscribe_event("Browser.downloadProgress").await,
        };
        let listener = tokio::spawn(run_event_loop(
            events,
            state.clone(),
            modals.clone(),
            download_dir.to_path_buf(),
        ));

        Ok(Self {
            target_id: target_id.to_string(),
            cdp,
            state,
            modals,
            listener,
            settle,
        })
    }

    fn snapshot_with(&self, aria_snapshot: String) -> TabSnapshot {
        let state = self.state.lock().unwrap();
        TabSnapshot {
            url: state.url.clone(),
            title: state.title.clone(),
            aria_snapshot,
            console_messages: state.console.clone(),
            downloads: state.downloads.clone(),
            modal_states: self.modals.borrow().clone(),
        }
    }

    async fn render_tree(&self) -> Result<String> {
        let tree = self
            .cdp
            .get_accessibility_tree()
            .await
            .map_err(|e| Error::Capture(format!("accessibility tree of {}: {}", self.target_id, e)))?;
        let mut nodes = parse_ax_tree(&tree);
        assign_refs(&mut nodes, 0);
        Ok(render_aria(&nodes, Some(MAX_SNAPSHOT_DEPTH)))
    }

    /// Tree plus a fresh title, so the page state never reports a stale one.
    async fn render_page(&self) -> Result<String> {
        let aria = self.render_tree().await?;
        if let Err(e) = self.update_title().await {
            debug!(target_id = %self.target_id, error = %e, "Title not refreshed during capture");
        }
        Ok(aria)
    }
}

impl Drop for CdpTab {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Resolves once at least one modal state is present. Never resolves if the tab is gone.
async fn wait_for_modal(rx: &mut watch::Receiver<Vec<ModalState>>) {
    loop {
        if !rx.borrow_and_update().is_empty() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Tab for CdpTab {
    fn id(&self) -> &str {
        &self.target_id
    }

    fn title(&self) -> String {
        self.state.lock().unwrap().title.clone()
    }

    fn url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    fn modal_states(&self) -> Vec<ModalState> {
        self.modals.borrow().clone()
    }

    fn console_messages(&self) -> Vec<ConsoleMessage> {
        self.state.lock().unwrap().console.clone()
    }

    async fn update_title(&self) -> Result<()> {
        let title = self
            .cdp
            .evaluate_js("document.title")
            .await
            .map_err(|e| tab_err(&self.target_id, e))?;
        self.state.lock().unwrap().title = title.as_str().unwrap_or_default().to_string();
        Ok(())
    }

    async fn capture_snapshot(&self) -> Result<TabSnapshot> {
        let mut modal_rx = self.modals.subscribe();
        // A dialog blocks the page; the tree would never arrive.
        let aria = tokio::select! {
            tree = self.render_page() => tree?,
            _ = wait_for_modal(&mut modal_rx) => {
                debug!(target_id = %self.target_id, "Modal state present, skipping accessibility tree");
                String::new()
            }
        };
        Ok(self.snapshot_with(aria))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.cdp.navigate(url).await.map_err(driver_err)?;
        self.state.lock().unwrap().url = url.to_string();
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let data = self.cdp.screenshot(full_page).await.map_err(driver_err)?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Driver(format!("screenshot base64 decode: {}", e)))
    }

    async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> Result<()> {
        let current = self.modals.borrow().clone();
        let Some(modal) = current.first() else {
            return Err(Error::Tool("No dialog visible".to_string()));
        };
        if modal.kind == ModalKind::Dialog {
            self.cdp
                .handle_dialog(accept, prompt_text)
                .await
                .map_err(driver_err)?;
        }
        let kind = modal.kind;
        self.modals.send_modify(|modals| {
            if let Some(pos) = modals.iter().position(|m| m.kind == kind) {
                modals.remove(pos);
            }
        });
        Ok(())
    }
}

struct TabEvents {
    console: tokio::sync::mpsc::Receiver<Value>,
    navigated: tokio::sync::mpsc::Receiver<Value>,
    dialog_opened: tokio::sync::mpsc::Receiver<Value>,
    dialog_closed: tokio::sync::mpsc::Receiver<Value>,
    file_chooser: tokio::sync::mpsc::Receiver<Value>,
    download_begin: tokio::sync::mpsc::Receiver<Value>,
    download_progress: tokio::sync::mpsc::Receiver<Value>,
}

async fn run_event_loop(
    mut events: TabEvents,
    state: Arc<Mutex<TabState>>,
    modals: Arc<watch::Sender<Vec<ModalState>>>,
    download_dir: PathBuf,
) {
    loop {
        tokio::select! {
            Some(params) = events.console.recv() => {
                state.lock().unwrap().console.push(parse_console_message(&params));
            }
            Some(params) = events.navigated.recv() => {
                let frame = &params["frame"];
                if frame.get("parentId").is_none() {
                    let mut state = state.lock().unwrap();
                    state.url = frame["url"].as_str().unwrap_or_default().to_string();
                    state.console.clear();
                }
            }
            Some(params) = events.dialog_opened.recv() => {
                let modal = ModalState::dialog(
                    params["type"].as_str().unwrap_or("alert"),
                    params["message"].as_str().unwrap_or_default(),
                );
                debug!(description = %modal.description, "Dialog opened");
                modals.send_modify(|m| m.push(modal));
            }
            Some(_) = events.dialog_closed.recv() => {
                modals.send_modify(|m| m.retain(|s| s.kind != ModalKind::Dialog));
            }
            Some(_) = events.file_chooser.recv() => {
                modals.send_modify(|m| m.push(ModalState::file_chooser()));
            }
            Some(params) = events.download_begin.recv() => {
                let guid = params["guid"].as_str().unwrap_or_default().to_string();
                let mut state = state.lock().unwrap();
                let index = state.downloads.len();
                state.downloads.push(Download {
                    suggested_filename: params["suggestedFilename"].as_str().unwrap_or_default().to_string(),
                    output_file: download_dir.join(&guid).display().to_string(),
                    finished: false,
                });
                state.download_index.insert(guid, index);
            }
            Some(params) = events.download_progress.recv() => {
                if params["state"].as_str() == Some("completed") {
                    let mut state = state.lock().unwrap();
                    let index = params["guid"].as_str().and_then(|g| state.download_index.get(g).copied());
                    if let Some(download) = index.and_then(|i| state.downloads.get_mut(i)) {
                        download.finished = true;
                    }
                }
            }
            else => break,
        }
    }
}

fn parse_console_message(params: &Value) -> ConsoleMessage {
    let text = params["args"]
        .as_array()
        .map(|args| {
            args.iter()
                .map(|arg| match arg.get("value") {
                    Some(Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                    None => arg["description"].as_str().unwrap_or_default().to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let frame = &params["stackTrace"]["callFrames"][0];
    ConsoleMessage {
        level: params["type"].as_str().unwrap_or("log").to_string(),
        text,
        url: frame["url"].as_str().map(|s| s.to_string()),
        line: frame["lineNumber"].as_u64().map(|l| l as u32 + 1),
    }
}

#[derive(Default)]
struct TabList {
    tabs: Vec<Arc<CdpTab>>,
    current: Option<usize>,
}

/// A launched browser process plus its open tabs.
pub struct CdpBrowser {
    pub name: String,
    pub engine: BrowserEngine,
    pub debug_port: u16,
    process: Child,
    browser_cdp: CdpClient,
    tabs: Mutex<TabList>,
    download_dir: PathBuf,
    settle: Duration,
}

impl CdpBrowser {
    /// Launch a browser for `session_name` and attach to its initial page.
    pub async fn launch(config: &BrowserConfig, paths: &Paths, session_name: &str) -> Result<Self> {
        let engine = config.engine;
        let browser_path = find_browser_binary(engine)
            .ok_or_else(|| Error::NotFound(format!("{} not found. Please install it.", engine.name())))?;

        let user_data_dir = paths.session_dir(session_name);
        std::fs::create_dir_all(&user_data_dir)?;
        let download_dir = config.resolved_output_dir(paths);
        std::fs::create_dir_all(&download_dir)?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(engine, debug_port, &user_data_dir, config.headed);

        info!(
            session = session_name,
            port = debug_port,
            headed = config.headed,
            browser = engine.name(),
            "Launching browser"
        );

        let process = Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Driver(format!("Failed to launch {}: {}", engine.name(), e)))?;

        let browser_ws_url = wait_for_cdp_ready(debug_port, 15).await?;
        let browser_cdp = CdpClient::connect(&browser_ws_url).await.map_err(driver_err)?;

        let settle = Duration::from_millis(config.navigation_settle_ms);
        let (target_id, page_ws_url) = get_first_page(debug_port).await?;
        let tab = CdpTab::open(&target_id, &page_ws_url, &download_dir, settle).await?;

        info!(session = session_name, target_id = %target_id, "CDP connection established");

        Ok(Self {
            name: session_name.to_string(),
            engine,
            debug_port,
            process,
            browser_cdp,
            tabs: Mutex::new(TabList {
                tabs: vec![Arc::new(tab)],
                current: Some(0),
            }),
            download_dir,
            settle,
        })
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.browser_cdp.send_command("Browser.close", serde_json::json!({})).await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
        let _ = self.process.kill().await;
    }
}

impl Drop for CdpBrowser {
    fn drop(&mut self) {
        let _ = self.process.start_kill();
    }
}

#[async_trait]
impl BrowserContext for CdpBrowser {
    fn tabs(&self) -> Vec<Arc<dyn Tab>> {
        self.tabs
            .lock()
            .unwrap()
            .tabs
            .iter()
            .map(|t| t.clone() as Arc<dyn Tab>)
            .collect()
    }

    fn current_tab(&self) -> Option<Arc<dyn Tab>> {
        let list = self.tabs.lock().unwrap();
        list.current
            .and_then(|i| list.tabs.get(i))
            .map(|t| t.clone() as Arc<dyn Tab>)
    }

    async fn new_tab(&self, url: Option<&str>) -> Result<Arc<dyn Tab>> {
        let target_id = self
            .browser_cdp
            .create_target(url.unwrap_or("about:blank"))
            .await
            .map_err(driver_err)?;
        let ws_url = get_target_ws_url(self.debug_port, &target_id).await?;
        let tab = Arc::new(CdpTab::open(&target_id, &ws_url, &self.download_dir, self.settle).await?);
        if url.is_some() {
            tokio::time::sleep(self.settle).await;
        }
        {
            let mut list = self.tabs.lock().unwrap();
            list.tabs.push(tab.clone());
            list.current = Some(list.tabs.len() - 1);
        }
        debug!(target_id = %target_id, "Opened tab");
        Ok(tab)
    }

    async fn select_tab(&self, index: usize) -> Result<Arc<dyn Tab>> {
        let tab = {
            let list = self.tabs.lock().unwrap();
            list.tabs.get(index).cloned().ok_or_else(|| {
                Error::Tool(format!("Tab {} not found (have {} tabs)", index, list.tabs.len()))
            })?
        };
        self.browser_cdp
            .activate_target(tab.id())
            .await
            .map_err(driver_err)?;
        self.tabs.lock().unwrap().current = Some(index);
        Ok(tab)
    }

    async fn close_tab(&self, index: Option<usize>) -> Result<()> {
        let tab = {
            let mut list = self.tabs.lock().unwrap();
            let index = index
                .or(list.current)
                .ok_or_else(|| Error::Tool("No open tabs to close".to_string()))?;
            if index >= list.tabs.len() {
                return Err(Error::Tool(format!(
                    "Tab {} not found (have {} tabs)",
                    index,
                    list.tabs.len()
                )));
            }
            let tab = list.tabs.remove(index);
            list.current = match list.current {
                _ if list.tabs.is_empty() => None,
                Some(current) if current == index => Some(index.min(list.tabs.len() - 1)),
                Some(current) if current > index => Some(current - 1),
                other => other,
            };
            tab
        };
        self.browser_cdp
            .close_target(tab.id())
            .await
            .map_err(driver_err)?;
        debug!(target_id = %tab.id(), "Closed tab");
        Ok(())
    }
}

/// Build browser-specific command line arguments.
fn build_browser_args(
    engine: BrowserEngine,
    debug_port: u16,
    user_data_dir: &Path,
    headed: bool,
) -> Vec<String> {
    match engine {
        BrowserEngine::Firefox => {
            let mut args = vec![
                "--remote-debugging-port".to_string(),
                debug_port.to_string(),
                "--profile".to_string(),
                user_data_dir.display().to_string(),
                "--no-remote".to_string(),
            ];
            if !headed {
                args.push("--headless".to_string());
            }
            args.push("about:blank".to_string());
            args
        }
        BrowserEngine::Chrome | BrowserEngine::Edge => {
            let mut args = vec![
                format!("--remote-debugging-port={}", debug_port),
                format!("--user-data-dir={}", user_data_dir.display()),
                "--no-first-run".to_string(),
                "--no-default-browser-check".to_string(),
                "--disable-background-networking".to_string(),
                "--disable-extensions".to_string(),
                "--disable-sync".to_string(),
                "--password-store=basic".to_string(),
            ];
            if !headed {
                args.push("--headless=new".to_string());
            }
            args.push("--window-size=1280,720".to_string());
            args.push("about:blank".to_string());
            args
        }
    }
}

/// Find a browser binary on the system for the given engine.
pub fn find_browser_binary(engine: BrowserEngine) -> Option<String> {
    let candidates: &[&str] = match engine {
        BrowserEngine::Chrome => {
            if cfg!(target_os = "macos") {
                &[
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                    "/Applications/Chromium.app/Contents/MacOS/Chromium",
                ]
            } else if cfg!(target_os = "linux") {
                &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
            } else {
                &[
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            }
        }
        BrowserEngine::Edge => {
            if cfg!(target_os = "macos") {
                &["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                &["microsoft-edge", "microsoft-edge-stable"]
            } else {
                &[r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe"]
            }
        }
        BrowserEngine::Firefox => {
            if cfg!(target_os = "macos") {
                &["/Applications/Firefox.app/Contents/MacOS/firefox"]
            } else if cfg!(target_os = "linux") {
                &["firefox"]
            } else {
                &[r"C:\Program Files\Mozilla Firefox\firefox.exe"]
            }
        }
    };

    candidates
        .iter()
        .find(|candidate| {
            Path::new(candidate).exists()
                || (!candidate.contains('/')
                    && !candidate.contains('\\')
                    && which::which(candidate).is_ok())
        })
        .map(|c| c.to_string())
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the browser-level WebSocket URL is available.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<String> {
    let deadline = std::time::Instant::now() + Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if std::time::Instant::now() > deadline {
            return Err(Error::Timeout(format!(
                "Browser CDP not ready after {}s on port {}",
                timeout_secs, port
            )));
        }
        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// `/json/list` page targets as (targetId, webSocketDebuggerUrl), retried while the
/// browser is still creating them.
async fn list_page_targets(port: u16) -> Vec<(String, String)> {
    let url = format!("http://127.0.0.1:{}/json/list", port);
    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let Ok(resp) = reqwest::get(&url).await else { continue };
        let Ok(targets) = resp.json::<Vec<Value>>().await else { continue };
        let pages: Vec<(String, String)> = targets
            .iter()
            .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
            .filter_map(|t| {
                let id = t.get("id").or_else(|| t.get("targetId"))?.as_str()?;
                let ws = t.get("webSocketDebuggerUrl")?.as_str()?;
                Some((id.to_string(), ws.to_string()))
            })
            .collect();
        if !pages.is_empty() {
            return pages;
        }
    }
    Vec::new()
}

async fn get_first_page(port: u16) -> Result<(String, String)> {
    list_page_targets(port)
        .await
        .into_iter()
        .next()
        .ok_or_else(|| Error::Driver("No page target found after retries".to_string()))
}

async fn get_target_ws_url(port: u16, target_id: &str) -> Result<String> {
    list_page_targets(port)
        .await
        .into_iter()
        .find(|(id, _)| id == target_id)
        .map(|(_, ws)| ws)
        .ok_or_else(|| {
            Error::Driver(format!("No WebSocket URL found for target '{}'", target_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_console_message() {
        let params = json!({
            "type": "warning",
            "args": [{"type": "string", "value": "slow"}, {"type": "number", "value": 42}],
            "stackTrace": {"callFrames": [{"url": "https://a.test/app.js", "lineNumber": 9}]}
        });
        let msg = parse_console_message(&params);
        assert_eq!(msg.level, "warning");
        assert_eq!(msg.text, "slow 42");
        assert_eq!(msg.line, Some(10));
        assert_eq!(msg.to_string(), "[WARNING] slow 42 @ https://a.test/app.js:10");
    }

    #[test]
    fn test_parse_console_message_object_arg() {
        let params = json!({"type": "log", "args": [{"type": "object", "description": "Object"}]});
        let msg = parse_console_message(&params);
        assert_eq!(msg.text, "Object");
        assert_eq!(msg.url, None);
    }

    #[test]
    fn test_tab_err_classification() {
        assert!(matches!(
            tab_err("t1", "CDP response channel closed".to_string()),
            Error::TabClosed(_)
        ));
        assert!(matches!(
            tab_err("t1", "CDP error: {\"code\":-32000}".to_string()),
            Error::Driver(_)
        ));
    }

    #[test]
    fn test_build_browser_args_headless() {
        let args = build_browser_args(BrowserEngine::Chrome, 9222, Path::new("/tmp/p"), false);
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));

        let ff = build_browser_args(BrowserEngine::Firefox, 9222, Path::new("/tmp/p"), true);
        assert!(!ff.contains(&"--headless".to_string()));
        assert_eq!(ff.last().map(String::as_str), Some("about:blank"));
    }

    #[tokio::test]
    async fn test_wait_for_modal_resolves_on_dialog() {
        let (tx, mut rx) = watch::channel(Vec::new());
        let waiter = tokio::spawn(async move {
            wait_for_modal(&mut rx).await;
        });
        tx.send_modify(|m| m.push(ModalState::dialog("confirm", "Leave?")));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }
}
