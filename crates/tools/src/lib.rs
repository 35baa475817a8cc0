pub mod browser;
pub mod registry;
pub mod response;

use async_trait::async_trait;
use pagecell_core::{Config, Paths, Result};
use serde_json::Value;
use std::sync::Arc;

use browser::BrowserContext;
pub use registry::ToolRegistry;
pub use response::{Payload, Response};

/// Everything a tool may touch while it runs. The browser is process-wide and shared
/// between invocations; the `Response` a tool writes into is not.
#[derive(Clone)]
pub struct ToolContext {
    pub browser: Arc<dyn BrowserContext>,
    pub config: Config,
    pub paths: Paths,
}

pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    /// Write results, code and intents into `response`. An `Err` is recorded on the
    /// response by the registry; it never skips the post-action capture.
    async fn execute(&self, ctx: &ToolContext, params: &Value, response: &mut Response) -> Result<()>;
}
