use std::collections::HashMap;
use std::sync::Arc;
use pagecell_core::{Error, Result};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::browser::tools::{
    ConsoleMessagesTool, HandleDialogTool, NavigateTool, SnapshotTool, TabsTool, TakeScreenshotTool,
};
use crate::response::{Payload, Response};
use crate::{Tool, ToolContext};

/// Tool table plus the dispatch loop: one `Response` per call, finished and rendered
/// before it is handed back.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        // Navigation and page state
        registry.register(Arc::new(NavigateTool));
        registry.register(Arc::new(SnapshotTool));
        registry.register(Arc::new(TakeScreenshotTool));

        // Tab bookkeeping
        registry.register(Arc::new(TabsTool));

        // Dialogs and console
        registry.register(Arc::new(HandleDialogTool));
        registry.register(Arc::new(ConsoleMessagesTool));

        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = schema.name, "Registering tool");
        self.tools.insert(schema.name.to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn get_tool_schemas(&self) -> Vec<Value> {
        self.tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                let schema = tool.schema();
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.parameters
                    }
                })
            })
            .collect()
    }

    /// Get all registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run one tool invocation end to end.
    ///
    /// Unknown tools and invalid parameters fail before anything touches the browser.
    /// A tool failure is recorded on the response; only failures of the post-action
    /// capture itself come back as `Err`.
    pub async fn execute(&self, name: &str, ctx: &ToolContext, params: Value) -> Result<Payload> {
        let tool = self.get(name).ok_or_else(|| {
            Error::Tool(format!("Unknown tool: {}", name))
        })?;

        if let Err(e) = tool.validate(&params) {
            warn!(tool = name, error = %e, "Tool validation failed");
            return Err(e);
        }

        let mut response = Response::new(name, params.clone());
        debug!(tool = name, "Executing tool");
        if let Err(e) = tool.execute(ctx, &params, &mut response).await {
            warn!(tool = name, error = %e, "Tool failed");
            response.add_error(tool_error_text(&e));
        }

        let browser = ctx.browser.as_ref();
        response.finish(browser, &ctx.config.browser).await?;
        Ok(response.serialize(browser, &ctx.config.browser))
    }
}

/// The message a caller sees in the result log, without the error-kind prefix for
/// plain tool failures.
fn tool_error_text(e: &Error) -> String {
    match e {
        Error::Tool(msg) | Error::NotFound(msg) => msg.clone(),
        other => other.to_string(),
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeBrowser, FakeTab};
    use pagecell_core::{Config, Paths};
    use std::path::PathBuf;

    fn ctx(browser: FakeBrowser) -> ToolContext {
        ToolContext {
            browser: Arc::new(browser),
            config: Config::default(),
            paths: Paths::with_base(PathBuf::from("/tmp/pagecell-registry-test")),
        }
    }

    #[test]
    fn test_registry_new_empty() {
        let reg = ToolRegistry::new();
        assert!(reg.tool_names().is_empty());
        assert!(reg.get("browser_navigate").is_none());
    }

    #[test]
    fn test_registry_with_defaults_has_browser_tools() {
        let reg = ToolRegistry::with_defaults();
        assert_eq!(
            reg.tool_names(),
            vec![
                "browser_console_messages",
                "browser_handle_dialog",
                "browser_navigate",
                "browser_snapshot",
                "browser_tabs",
                "browser_take_screenshot",
            ]
        );
    }

    #[test]
    fn test_registry_get_tool_schemas() {
        let reg = ToolRegistry::with_defaults();
        let schemas = reg.get_tool_schemas();
        assert_eq!(schemas.len(), 6);
        for schema in &schemas {
            assert_eq!(schema["type"], "function");
            assert!(schema["function"]["name"].is_string());
            assert!(schema["function"]["description"].is_string());
            assert_eq!(schema["function"]["parameters"]["type"], "object");
        }
    }

    #[test]
    fn test_registry_register_custom() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(SnapshotTool));
        assert!(reg.get("browser_snapshot").is_some());
        assert_eq!(reg.tool_names().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let reg = ToolRegistry::with_defaults();
        let err = reg
            .execute("browser_fly", &ctx(FakeBrowser::empty()), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_params() {
        let reg = ToolRegistry::with_defaults();
        let err = reg
            .execute("browser_navigate", &ctx(FakeBrowser::empty()), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_execute_renders_snapshot() {
        let reg = ToolRegistry::with_defaults();
        let browser = FakeBrowser::with_tabs(vec![
            FakeTab::new("t0", "https://a.test", "A").with_aria("- heading \"A\" [level=1] [ref=e1]"),
        ]);
        let payload = reg.execute("browser_snapshot", &ctx(browser), json!({})).await.unwrap();
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["toolName"], "browser_snapshot");
        assert_eq!(v["pageState"]["title"], "A");
        assert!(v["tabs"].is_null());
        assert!(v.get("isError").is_none());
    }

    #[tokio::test]
    async fn test_tool_failure_recorded_and_snapshot_still_taken() {
        let reg = ToolRegistry::with_defaults();
        let browser = FakeBrowser::with_tabs(vec![
            FakeTab::new("t0", "https://a.test", "A").with_aria("- text: still here"),
        ]);
        let payload = reg
            .execute("browser_navigate", &ctx(browser), json!({"url": "bad://nowhere"}))
            .await
            .unwrap();
        assert_eq!(payload.is_error, Some(true));
        assert!(payload.result.as_ref().unwrap()[0].contains("net::ERR_ABORTED"));
        assert_eq!(payload.page_state().unwrap().aria_snapshot, "- text: still here");
    }

    #[tokio::test]
    async fn test_no_pages_message_is_plain() {
        let reg = ToolRegistry::with_defaults();
        let payload = reg
            .execute("browser_console_messages", &ctx(FakeBrowser::empty()), json!({}))
            .await
            .unwrap();
        assert_eq!(payload.is_error, Some(true));
        assert!(payload.result.as_ref().unwrap()[0].starts_with("No open pages available."));
    }

    #[tokio::test]
    async fn test_tabs_select_recaptures_new_current_tab() {
        let reg = ToolRegistry::with_defaults();
        let browser = FakeBrowser::with_tabs(vec![
            FakeTab::new("t0", "https://a.test", "A").with_aria("- text: first"),
            FakeTab::new("t1", "https://b.test", "B").with_aria("- text: second"),
        ]);
        let payload = reg
            .execute("browser_tabs", &ctx(browser), json!({"action": "select", "index": 0}))
            .await
            .unwrap();
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["pageState"]["url"], "https://a.test");
        assert_eq!(v["pageState"]["ariaSnapshot"], "- text: first");

        let tabs = v["tabs"]["tabs"].as_array().unwrap();
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[0]["isCurrent"], true);
        assert_eq!(tabs[1]["isCurrent"], false);
        assert_eq!(tabs[1]["url"], "https://b.test");
    }
}
