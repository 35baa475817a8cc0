use pagecell_core::{Config, Paths};
use pagecell_tools::browser::CdpBrowser;
use pagecell_tools::{ToolContext, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::OutputFormat;

/// Launch a browser, run one tool through the registry and print its payload.
pub async fn tool(
    tool_name: &str,
    params_json: Option<&str>,
    format: OutputFormat,
    session: &str,
) -> anyhow::Result<()> {
    let registry = ToolRegistry::with_defaults();
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;

    let tool = registry.get(tool_name)
        .ok_or_else(|| anyhow::anyhow!("Tool '{}' not found. Use `pagecell tools list` to see available tools.", tool_name))?;

    let params: Value = match params_json {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("Failed to parse JSON params: {}\nInput: {}", e, raw))?,
        None => json!({}),
    };

    if let Err(e) = tool.validate(&params) {
        anyhow::bail!("Parameter validation failed: {}", e);
    }

    let browser = Arc::new(CdpBrowser::launch(&config.browser, &paths, session).await?);
    let ctx = ToolContext {
        browser: browser.clone(),
        config,
        paths,
    };

    let outcome = registry.execute(tool_name, &ctx, params).await;

    drop(ctx);
    match Arc::try_unwrap(browser) {
        Ok(mut browser) => browser.close().await,
        Err(_) => debug!("Browser still shared, leaving shutdown to drop"),
    }

    let payload = outcome?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&payload)?),
        OutputFormat::Markdown => println!("{}", payload.to_markdown()),
    }
    Ok(())
}
