//! Chrome DevTools Protocol client over WebSocket.
//!
//! One client per page target. Commands are correlated with responses by id; events are
//! fanned out to subscribers by method name.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type ListenerMap = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    event_listeners: ListenerMap,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a target's `webSocketDebuggerUrl`.
    pub async fn connect(ws_url: &str) -> Result<Self, String> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))?;
        let (mut ws_sink, mut ws_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let event_listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_listeners = event_listeners.clone();
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Ok(val) = serde_json::from_str::<Value>(&text) {
                            dispatch_incoming(val, &reader_pending, &reader_listeners).await;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // Fail outstanding commands fast instead of letting them hit the timeout.
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            reader_handle,
            writer_handle,
        })
    }

    /// Send a CDP command and wait for its `result`.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        let _entry = PendingEntry {
            pending: self.pending.clone(),
            id,
        };

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| format!("Failed to send CDP command: {}", e))?;

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => match response.get("error") {
                Some(error) => Err(format!("CDP error: {}", error)),
                None => Ok(response.get("result").cloned().unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err("CDP response channel closed".to_string()),
            Err(_) => Err(format!(
                "CDP command '{}' timed out after {}s",
                method,
                COMMAND_TIMEOUT.as_secs()
            )),
        }
    }

    /// Subscribe to a CDP event. The receiver gets each event's `params`.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.event_listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<(), String> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<(), String> {
        let result = self.send_command("Page.navigate", json!({"url": url})).await?;
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(format!("Navigation to {} failed: {}", url, error_text));
        }
        Ok(())
    }

    /// Evaluate JavaScript in the page and return the by-value result.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value, String> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(format!("JavaScript exception: {}", details));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Base64-encoded PNG.
    pub async fn screenshot(&self, full_page: bool) -> Result<String, String> {
        let mut params = json!({"format": "png"});
        if full_page {
            params["captureBeyondViewport"] = json!(true);
        }
        let result = self.send_command("Page.captureScreenshot", params).await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No screenshot data returned".to_string())
    }

    pub async fn get_accessibility_tree(&self) -> Result<Value, String> {
        self.send_command("Accessibility.getFullAXTree", json!({}))
            .await
    }

    /// Resolve a JavaScript dialog (alert/confirm/prompt/beforeunload).
    pub async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> Result<(), String> {
        let mut params = json!({"accept": accept});
        if let Some(text) = prompt_text {
            params["promptText"] = json!(text);
        }
        self.send_command("Page.handleJavaScriptDialog", params).await?;
        Ok(())
    }

    /// Report file choosers as events instead of opening the native picker.
    pub async fn intercept_file_chooser(&self, enabled: bool) -> Result<(), String> {
        self.send_command(
            "Page.setInterceptFileChooserDialog",
            json!({"enabled": enabled}),
        )
        .await?;
        Ok(())
    }

    /// Route downloads into `dir` and emit download events.
    pub async fn allow_downloads(&self, dir: &str) -> Result<(), String> {
        self.send_command(
            "Browser.setDownloadBehavior",
            json!({
                "behavior": "allowAndName",
                "downloadPath": dir,
                "eventsEnabled": true,
            }),
        )
        .await?;
        Ok(())
    }

    // ─── Tab / Target management ──────────────────────────────────────

    /// Page targets only, in browser order.
    pub async fn get_page_targets(&self) -> Result<Vec<Value>, String> {
        let result = self.send_command("Target.getTargets", json!({})).await?;
        Ok(result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .map(|targets| {
                targets
                    .iter()
                    .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn create_target(&self, url: &str) -> Result<String, String> {
        let result = self
            .send_command("Target.createTarget", json!({"url": url}))
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No targetId returned from createTarget".to_string())
    }

    pub async fn close_target(&self, target_id: &str) -> Result<(), String> {
        self.send_command("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }

    pub async fn activate_target(&self, target_id: &str) -> Result<(), String> {
        self.send_command("Target.activateTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }
}

async fn dispatch_incoming(val: Value, pending: &PendingMap, listeners: &ListenerMap) {
    if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
        if let Some(tx) = pending.lock().await.remove(&id) {
            let _ = tx.send(val);
        }
    } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
        let listeners = listeners.lock().await;
        if let Some(senders) = listeners.get(method) {
            let params = val.get("params").cloned().unwrap_or(Value::Null);
            for tx in senders {
                if tx.try_send(params.clone()).is_err() {
                    debug!(method, "Dropping CDP event, listener full or gone");
                }
            }
        }
    }
}

/// Removes a command's pending slot however `send_command` exits, including when its
/// future is dropped mid-flight.
struct PendingEntry {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.try_lock() {
            pending.remove(&self.id);
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pending = self.pending.clone();
            let id = self.id;
            handle.spawn(async move {
                pending.lock().await.remove(&id);
            });
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
