//! Browser automation seam
//!
//! Everything above this module talks to the browser through
//! [`BrowserDriver`]. [`PlaywrightDriver`] drives a real browser through a
//! Node bridge; [`FixtureDriver`] runs an in-process app model for tests.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverResult;
use crate::mock::StorageWrites;
use crate::spec::{LoadState, SelectOption, Strategy, ViewportSpec};

pub mod fixture;
pub mod playwright;

pub use fixture::FixtureDriver;
pub use playwright::PlaywrightDriver;

/// Isolated browser context (own storage, cookies, cache)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub u64);

/// Page inside a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

/// Elements matched by one strategy, optionally narrowed to one visible match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementQuery {
    pub strategy: Strategy,
    #[serde(default)]
    pub nth: Option<i32>,
}

impl ElementQuery {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy, nth: None }
    }

    pub fn nth(mut self, nth: i32) -> Self {
        self.nth = Some(nth);
        self
    }

    /// Resolve `nth` against the number of visible matches
    pub fn pick_index(&self, visible: usize) -> Option<usize> {
        match self.nth {
            None if visible == 1 => Some(0),
            None => None,
            Some(n) if n >= 0 && (n as usize) < visible => Some(n as usize),
            Some(n) if n < 0 && n.unsigned_abs() as usize <= visible => Some(visible - n.unsigned_abs() as usize),
            Some(_) => None,
        }
    }
}

impl fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.strategy)?;
        if let Some(nth) = self.nth {
            write!(f, " >> nth={}", nth)?;
        }
        Ok(())
    }
}

/// Browser automation capability
///
/// Element operations act on the single visible match selected by the
/// query (see [`ElementQuery::pick_index`]) and fail otherwise.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Start the browser process
    async fn launch(&self) -> DriverResult<()>;

    /// Stop the browser process; every context is gone afterwards
    async fn shutdown(&self) -> DriverResult<()>;

    /// New isolated context; `preload` runs before any page script on every
    /// navigation in the context
    async fn new_context(&self, viewport: ViewportSpec, preload: &StorageWrites) -> DriverResult<ContextId>;

    async fn new_page(&self, context: ContextId) -> DriverResult<PageId>;

    async fn close_context(&self, context: ContextId) -> DriverResult<()>;

    async fn goto(&self, page: PageId, url: &str, wait_until: LoadState, timeout_ms: u64) -> DriverResult<()>;

    async fn reload(&self, page: PageId, wait_until: LoadState, timeout_ms: u64) -> DriverResult<()>;

    /// Write entries into the live page's local storage
    async fn write_storage(&self, page: PageId, writes: &StorageWrites) -> DriverResult<()>;

    /// Number of visible elements matching the strategy, `nth` ignored
    async fn count_visible(&self, page: PageId, query: &ElementQuery) -> DriverResult<usize>;

    async fn click(&self, page: PageId, query: &ElementQuery) -> DriverResult<()>;

    async fn fill(&self, page: PageId, query: &ElementQuery, value: &str) -> DriverResult<()>;

    async fn select_option(&self, page: PageId, query: &ElementQuery, option: &SelectOption) -> DriverResult<()>;

    async fn mouse_click(&self, page: PageId, x: f64, y: f64) -> DriverResult<()>;

    /// PNG bytes of the viewport, or of the whole page when `full_page`
    async fn screenshot(&self, page: PageId, full_page: bool) -> DriverResult<Vec<u8>>;
}
