//! Browser layer: accessibility snapshot rendering and compaction, the tab abstraction the
//! response layer reads from, and a CDP-backed implementation of it.
//!
//! - `tab`: `BrowserContext`/`Tab` traits and the captured `TabSnapshot`
//! - `aria`: compaction of aria snapshot text
//! - `snapshot`: CDP accessibility tree → aria text
//! - `cdp`, `session`: Chrome DevTools Protocol client and `CdpBrowser`
//! - `tools`: the browser tools registered by default

pub mod aria;
pub mod cdp;
pub mod session;
pub mod snapshot;
pub mod tab;
pub mod tools;

#[cfg(test)]
pub(crate) mod fake;

pub use session::CdpBrowser;
pub use tab::{BrowserContext, Tab, TabSnapshot};
