use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::paths::Paths;

/// Supported browser engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    #[default]
    Chrome,
    Edge,
    Firefox,
}

impl BrowserEngine {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Edge => "edge",
            Self::Firefox => "firefox",
        }
    }
}

/// Whether image attachments make it into the serialized payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageResponses {
    #[default]
    Include,
    Omit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default)]
    pub engine: BrowserEngine,
    #[serde(default)]
    pub headed: bool,
    #[serde(default)]
    pub image_responses: ImageResponses,
    /// Console messages longer than this are cut and suffixed with "...".
    #[serde(default = "default_console_message_max_chars")]
    pub console_message_max_chars: usize,
    /// Upper bound for post-action snapshot capture and title refresh.
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    #[serde(default = "default_navigation_settle_ms")]
    pub navigation_settle_ms: u64,
    /// Screenshots and downloads land here. Falls back to `~/.pagecell/output`.
    #[serde(default)]
    pub output_dir: Option<String>,
}

fn default_console_message_max_chars() -> usize {
    100
}

fn default_capture_timeout_ms() -> u64 {
    5000
}

fn default_navigation_settle_ms() -> u64 {
    1500
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngine::default(),
            headed: false,
            image_responses: ImageResponses::default(),
            console_message_max_chars: default_console_message_max_chars(),
            capture_timeout_ms: default_capture_timeout_ms(),
            navigation_settle_ms: default_navigation_settle_ms(),
            output_dir: None,
        }
    }
}

impl BrowserConfig {
    pub fn resolved_output_dir(&self, paths: &Paths) -> PathBuf {
        match self.output_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => {
                if let Some(rest) = dir.strip_prefix("~/") {
                    dirs::home_dir()
                        .map(|h| h.join(rest))
                        .unwrap_or_else(|| PathBuf::from(dir))
                } else {
                    PathBuf::from(dir)
                }
            }
            _ => paths.output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.browser.engine, BrowserEngine::Chrome);
        assert_eq!(cfg.browser.image_responses, ImageResponses::Include);
        assert_eq!(cfg.browser.console_message_max_chars, 100);
        assert_eq!(cfg.browser.capture_timeout_ms, 5000);
        assert!(!cfg.browser.headed);
    }

    #[test]
    fn test_browser_section_camel_case() {
        let raw = r#"{
  "browser": { "engine": "firefox", "imageResponses": "omit", "consoleMessageMaxChars": 40 }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.browser.engine, BrowserEngine::Firefox);
        assert_eq!(cfg.browser.image_responses, ImageResponses::Omit);
        assert_eq!(cfg.browser.console_message_max_chars, 40);
    }

    #[test]
    fn test_output_dir_fallback() {
        let paths = Paths::with_base(PathBuf::from("/tmp/pc"));
        let mut browser = BrowserConfig::default();
        assert_eq!(browser.resolved_output_dir(&paths), PathBuf::from("/tmp/pc/output"));
        browser.output_dir = Some("/var/shots".to_string());
        assert_eq!(browser.resolved_output_dir(&paths), PathBuf::from("/var/shots"));
    }

    #[test]
    fn test_browser_engine_names_match_serde() {
        for engine in [BrowserEngine::Chrome, BrowserEngine::Edge, BrowserEngine::Firefox] {
            let v = serde_json::to_value(engine).unwrap();
            assert_eq!(v, engine.name());
        }
        let engine: BrowserEngine = serde_json::from_str("\"firefox\"").unwrap();
        assert_eq!(engine, BrowserEngine::Firefox);
    }
}
