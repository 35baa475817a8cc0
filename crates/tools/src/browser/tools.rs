//! Browser tools registered by default. Each one acts on the shared browser and writes
//! into its `Response`; page capture and rendering happen afterwards in the registry.

use async_trait::async_trait;
use pagecell_core::{Error, Result};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::tab::{BrowserContext, Tab, HANDLE_DIALOG_TOOL};
use crate::response::{ImageAttachment, Response};
use crate::{Tool, ToolContext, ToolSchema};

fn js_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub struct NavigateTool;

#[async_trait]
impl Tool for NavigateTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "browser_navigate",
            description: "Navigate the current tab to a URL, opening a tab first if none is open. Returns the page snapshot after navigation.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to navigate to"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        match params.get("url").and_then(|v| v.as_str()) {
            Some(url) if !url.trim().is_empty() => Ok(()),
            _ => Err(Error::Validation("Missing required parameter: url".to_string())),
        }
    }

    async fn execute(&self, ctx: &ToolContext, params: &Value, response: &mut Response) -> Result<()> {
        let url = params["url"].as_str().unwrap_or_default().trim();
        let tab = ctx.browser.ensure_tab().await?;
        response.add_code(format!("await page.goto({});", js_string(url)));
        response.set_include_snapshot();
        tab.navigate(url).await?;
        info!(url, tab = tab.id(), "Navigated");
        Ok(())
    }
}

pub struct SnapshotTool;

#[async_trait]
impl Tool for SnapshotTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "browser_snapshot",
            description: "Capture the accessibility snapshot of the current page. Better than a screenshot for reading page structure and element refs.",
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &ToolContext, _params: &Value, response: &mut Response) -> Result<()> {
        ctx.browser.current_tab_or_die()?;
        response.set_include_snapshot();
        Ok(())
    }
}

pub struct TabsTool;

#[async_trait]
impl Tool for TabsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "browser_tabs",
            description: "List, create, close, or select a browser tab.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["list", "new", "select", "close"],
                        "description": "Operation to perform"
                    },
                    "index": {
                        "type": "integer",
                        "description": "Tab index for 'select' (required) and 'close' (defaults to the current tab)"
                    },
                    "url": {
                        "type": "string",
                        "description": "URL to open in the new tab for 'new'"
                    }
                },
                "required": ["action"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        let action = params
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("Missing required parameter: action".to_string()))?;
        match action {
            "list" | "new" | "close" => Ok(()),
            "select" if params.get("index").and_then(|v| v.as_u64()).is_some() => Ok(()),
            "select" => Err(Error::Validation("'select' requires 'index'".to_string())),
            other => Err(Error::Validation(format!("Unknown tabs action: {}", other))),
        }
    }

    async fn execute(&self, ctx: &ToolContext, params: &Value, response: &mut Response) -> Result<()> {
        let index = params.get("index").and_then(|v| v.as_u64()).map(|i| i as usize);
        response.set_include_tabs();
        match params["action"].as_str().unwrap_or("list") {
            "new" => {
                let url = params.get("url").and_then(|v| v.as_str());
                let tab = ctx.browser.new_tab(url).await?;
                debug!(tab = tab.id(), "Opened tab");
                response.set_include_snapshot();
            }
            "select" => {
                let index = index.unwrap_or_default();
                ctx.browser.select_tab(index).await?;
                response.set_include_snapshot();
            }
            "close" => {
                ctx.browser.close_tab(index).await?;
                response.set_include_snapshot();
            }
            _ => {}
        }
        Ok(())
    }
}

pub struct TakeScreenshotTool;

#[async_trait]
impl Tool for TakeScreenshotTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "browser_take_screenshot",
            description: "Take a PNG screenshot of the current page. The image is attached to the response and saved to the output directory.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "fullPage": {
                        "type": "boolean",
                        "description": "Capture the full scrollable page instead of the viewport (default: false)"
                    }
                }
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        match params.get("fullPage") {
            None | Some(Value::Bool(_)) => Ok(()),
            Some(_) => Err(Error::Validation("'fullPage' must be a boolean".to_string())),
        }
    }

    async fn execute(&self, ctx: &ToolContext, params: &Value, response: &mut Response) -> Result<()> {
        let full_page = params["fullPage"].as_bool().unwrap_or(false);
        let tab = ctx.browser.current_tab_or_die()?;
        let bytes = tab.screenshot(full_page).await?;

        let dir = ctx.config.browser.resolved_output_dir(&ctx.paths);
        std::fs::create_dir_all(&dir)?;
        let ts = chrono::Local::now().format("%Y%m%d_%H%M%S%3f");
        let path = dir.join(format!("page-{}.png", ts));
        std::fs::write(&path, &bytes)
            .map_err(|e| Error::Tool(format!("write screenshot: {}", e)))?;
        let shown = path.display().to_string();

        let what = if full_page { "full page" } else { "viewport" };
        response.add_code(format!(
            "await page.screenshot({{ fullPage: {}, path: {} }});",
            full_page,
            js_string(&shown)
        ));
        response.add_result(format!("Took the {} screenshot and saved it as {}", what, shown));
        response.add_image(ImageAttachment::png(bytes));
        Ok(())
    }
}

pub struct HandleDialogTool;

#[async_trait]
impl Tool for HandleDialogTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: HANDLE_DIALOG_TOOL,
            description: "Accept or dismiss the dialog blocking the current page.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "accept": {
                        "type": "boolean",
                        "description": "Whether to accept the dialog"
                    },
                    "promptText": {
                        "type": "string",
                        "description": "Text to enter into a prompt dialog"
                    }
                },
                "required": ["accept"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        if params.get("accept").and_then(|v| v.as_bool()).is_none() {
            return Err(Error::Validation("Missing required parameter: accept".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ToolContext, params: &Value, response: &mut Response) -> Result<()> {
        let accept = params["accept"].as_bool().unwrap_or(false);
        let prompt_text = params.get("promptText").and_then(|v| v.as_str());
        let tab = ctx.browser.current_tab_or_die()?;
        response.set_include_snapshot();

        if tab.modal_states().is_empty() {
            return Err(Error::Tool("No dialog visible".to_string()));
        }
        tab.handle_dialog(accept, prompt_text).await?;

        response.add_code(match (accept, prompt_text) {
            (true, Some(text)) => format!("await dialog.accept({});", js_string(text)),
            (true, None) => "await dialog.accept();".to_string(),
            (false, _) => "await dialog.dismiss();".to_string(),
        });
        Ok(())
    }
}

pub struct ConsoleMessagesTool;

#[async_trait]
impl Tool for ConsoleMessagesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "browser_console_messages",
            description: "Return the console messages logged by the current page since its last navigation.",
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &ToolContext, _params: &Value, response: &mut Response) -> Result<()> {
        let tab = ctx.browser.current_tab_or_die()?;
        let messages = tab.console_messages();
        if messages.is_empty() {
            response.add_result("No console messages");
        }
        for message in messages {
            response.add_result(message.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeBrowser, FakeTab};
    use crate::browser::tab::{ConsoleMessage, ModalState};
    use pagecell_core::{Config, Paths};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn ctx_with(browser: Arc<FakeBrowser>) -> ToolContext {
        let mut config = Config::default();
        config.browser.output_dir = Some(
            std::env::temp_dir()
                .join(format!("pagecell-tools-test-{}", std::process::id()))
                .display()
                .to_string(),
        );
        ToolContext {
            browser,
            config,
            paths: Paths::with_base(PathBuf::from("/tmp/pagecell-tools-test")),
        }
    }

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string("it's"), "'it\\'s'");
        assert_eq!(js_string("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_validate() {
        assert!(NavigateTool.validate(&json!({"url": "https://a.test"})).is_ok());
        assert!(NavigateTool.validate(&json!({"url": "  "})).is_err());
        assert!(TabsTool.validate(&json!({"action": "list"})).is_ok());
        assert!(TabsTool.validate(&json!({"action": "select"})).is_err());
        assert!(TabsTool.validate(&json!({"action": "select", "index": 1})).is_ok());
        assert!(TabsTool.validate(&json!({"action": "reload"})).is_err());
        assert!(TakeScreenshotTool.validate(&json!({"fullPage": "yes"})).is_err());
        assert!(HandleDialogTool.validate(&json!({})).is_err());
        assert!(HandleDialogTool.validate(&json!({"accept": false})).is_ok());
    }

    #[tokio::test]
    async fn test_navigate_opens_tab_when_none() {
        let browser = Arc::new(FakeBrowser::empty());
        let ctx = ctx_with(browser.clone());
        let mut response = Response::new("browser_navigate", json!({}));
        NavigateTool
            .execute(&ctx, &json!({"url": "https://a.test"}), &mut response)
            .await
            .unwrap();

        assert_eq!(browser.tabs().len(), 1);
        assert_eq!(browser.tab(0).url(), "https://a.test");
        assert_eq!(response.code(), ["await page.goto('https://a.test');"]);
        assert!(response.include_snapshot());
    }

    #[tokio::test]
    async fn test_tabs_actions() {
        let browser = Arc::new(FakeBrowser::with_tabs(vec![
            FakeTab::new("t0", "https://a.test", "A"),
            FakeTab::new("t1", "https://b.test", "B"),
        ]));
        let ctx = ctx_with(browser.clone());

        let mut response = Response::new("browser_tabs", json!({}));
        TabsTool.execute(&ctx, &json!({"action": "list"}), &mut response).await.unwrap();
        assert!(response.include_tabs());
        assert!(!response.include_snapshot());

        let mut response = Response::new("browser_tabs", json!({}));
        TabsTool
            .execute(&ctx, &json!({"action": "select", "index": 0}), &mut response)
            .await
            .unwrap();
        assert_eq!(browser.current_tab().unwrap().id(), "t0");
        assert!(response.include_snapshot());

        let mut response = Response::new("browser_tabs", json!({}));
        TabsTool
            .execute(&ctx, &json!({"action": "new", "url": "https://c.test"}), &mut response)
            .await
            .unwrap();
        assert_eq!(browser.tabs().len(), 3);
        assert_eq!(browser.current_tab().unwrap().url(), "https://c.test");

        let mut response = Response::new("browser_tabs", json!({}));
        TabsTool.execute(&ctx, &json!({"action": "close"}), &mut response).await.unwrap();
        assert_eq!(browser.tabs().len(), 2);
    }

    #[tokio::test]
    async fn test_screenshot_attaches_image() {
        let browser = Arc::new(FakeBrowser::with_tabs(vec![FakeTab::new("t0", "https://a.test", "A")]));
        let ctx = ctx_with(browser);
        let mut response = Response::new("browser_take_screenshot", json!({}));
        TakeScreenshotTool.execute(&ctx, &json!({}), &mut response).await.unwrap();

        assert_eq!(response.images().len(), 1);
        assert_eq!(response.images()[0].content_type, "image/png");
        assert!(response.result()[0].starts_with("Took the viewport screenshot"));
        let saved = response.result()[0].rsplit(" as ").next().unwrap().to_string();
        assert!(std::path::Path::new(&saved).exists());
        let _ = std::fs::remove_file(saved);
    }

    #[tokio::test]
    async fn test_handle_dialog() {
        let browser = Arc::new(FakeBrowser::with_tabs(vec![
            FakeTab::new("t0", "https://a.test", "A").with_modal(ModalState::dialog("prompt", "Name?")),
        ]));
        let ctx = ctx_with(browser.clone());
        let mut response = Response::new(HANDLE_DIALOG_TOOL, json!({}));
        HandleDialogTool
            .execute(&ctx, &json!({"accept": true, "promptText": "Ada"}), &mut response)
            .await
            .unwrap();
        assert_eq!(response.code(), ["await dialog.accept('Ada');"]);
        assert!(browser.tab(0).modal_states().is_empty());

        let mut response = Response::new(HANDLE_DIALOG_TOOL, json!({}));
        let err = HandleDialogTool
            .execute(&ctx, &json!({"accept": false}), &mut response)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
        assert!(response.include_snapshot());
    }

    #[tokio::test]
    async fn test_console_messages() {
        let browser = Arc::new(FakeBrowser::with_tabs(vec![FakeTab::new("t0", "https://a.test", "A")
            .with_console(vec![ConsoleMessage {
                level: "error".to_string(),
                text: "boom".to_string(),
                url: Some("https://a.test/app.js".to_string()),
                line: Some(4),
            }])]));
        let ctx = ctx_with(browser);
        let mut response = Response::new("browser_console_messages", json!({}));
        ConsoleMessagesTool.execute(&ctx, &json!({}), &mut response).await.unwrap();
        assert_eq!(response.result(), ["[ERROR] boom @ https://a.test/app.js:4"]);

        let empty = ctx_with(Arc::new(FakeBrowser::with_tabs(vec![FakeTab::new("t0", "about:blank", "")])));
        let mut response = Response::new("browser_console_messages", json!({}));
        ConsoleMessagesTool.execute(&empty, &json!({}), &mut response).await.unwrap();
        assert_eq!(response.result(), ["No console messages"]);
    }
}
