//! In-process browser driver over a scripted app model
//!
//! A [`FixtureApp`] renders a flat list of [`FixtureNode`]s from page state
//! and reacts to clicks, fills and selects. The driver supplies what a real
//! browser would: isolated contexts, per-page local storage, init scripts
//! replayed on every navigation, and PNG screenshots. Counters and fault
//! switches let tests assert lifecycle behaviour.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{BrowserDriver, ContextId, ElementQuery, PageId};
use crate::error::{DriverError, DriverResult};
use crate::mock::StorageWrites;
use crate::spec::{LoadState, SelectOption, Strategy, ViewportSpec};

const BLANK: &str = "about:blank";

/// One element as the app model exposes it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureNode {
    /// Stable id the app uses to recognise its own nodes in callbacks
    pub key: String,
    pub text: Option<String>,
    pub role: Option<String>,
    /// Accessible name, when it differs from the text
    pub name: Option<String>,
    pub label: Option<String>,
    /// CSS selectors this node answers to, matched literally
    pub css: Vec<String>,
    pub visible: bool,
    /// Only rendered once the page has been loaded this long
    pub appears_after: Option<Duration>,
}

impl FixtureNode {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            visible: true,
            ..Default::default()
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn css(mut self, selector: impl Into<String>) -> Self {
        self.css.push(selector.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn appears_after(mut self, delay: Duration) -> Self {
        self.appears_after = Some(delay);
        self
    }

    fn accessible_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.label.as_deref()).or(self.text.as_deref())
    }

    pub fn matches(&self, strategy: &Strategy) -> bool {
        match strategy {
            Strategy::Text { text, contains: false } => self.text.as_deref() == Some(text.as_str()),
            Strategy::Text { text, contains: true } => {
                self.text.as_deref().map(|t| t.contains(text.as_str())).unwrap_or(false)
            }
            Strategy::Role { role, name } => {
                self.role.as_deref() == Some(role.as_str())
                    && name.as_deref().map_or(true, |n| self.accessible_name() == Some(n))
            }
            Strategy::Label { label } => self.label.as_deref() == Some(label.as_str()),
            Strategy::Css { selector } => self.css.iter().any(|s| s == selector),
        }
    }
}

/// Page state visible to the app model
#[derive(Debug, Clone)]
pub struct FixturePage {
    pub url: String,
    pub viewport: ViewportSpec,

    /// Live local storage
    pub storage: BTreeMap<String, String>,

    /// Local storage as it was when the current document booted
    pub boot: BTreeMap<String, String>,

    /// Free-form app state, reset on every navigation
    pub state: BTreeMap<String, String>,

    loaded_at: Instant,
}

impl FixturePage {
    fn new(viewport: ViewportSpec) -> Self {
        Self {
            url: BLANK.to_string(),
            viewport,
            storage: BTreeMap::new(),
            boot: BTreeMap::new(),
            state: BTreeMap::new(),
            loaded_at: Instant::now(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.url == BLANK
    }

    pub fn flag(&self, key: &str) -> bool {
        self.state.get(key).map(|v| v == "true").unwrap_or(false)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.state.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.state.get(key).map(String::as_str)
    }

    /// Path component of the current URL
    pub fn path(&self) -> &str {
        let rest = self.url.split_once("://").map(|(_, rest)| rest).unwrap_or(&self.url);
        match rest.find('/') {
            Some(i) => &rest[i..],
            None => "/",
        }
    }
}

/// Scripted application behaviour
pub trait FixtureApp: Send + Sync {
    /// Elements currently in the document
    fn render(&self, page: &FixturePage) -> Vec<FixtureNode>;

    fn on_navigate(&self, _page: &mut FixturePage) {}

    fn on_click(&self, _page: &mut FixturePage, _node: &FixtureNode) -> Result<(), String> {
        Ok(())
    }

    fn on_fill(&self, _page: &mut FixturePage, node: &FixtureNode, _value: &str) -> Result<(), String> {
        Err(format!("element '{}' is not editable", node.key))
    }

    fn on_select(&self, _page: &mut FixturePage, node: &FixtureNode, _option: &SelectOption) -> Result<(), String> {
        Err(format!("element '{}' is not a <select>", node.key))
    }

    fn on_mouse_click(&self, _page: &mut FixturePage, _x: f64, _y: f64) {}
}

/// Snapshot of driver counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixtureStats {
    pub launches: usize,
    pub shutdowns: usize,
    pub contexts_opened: usize,
    pub contexts_closed: usize,
    pub screenshots: usize,
    pub actions: usize,
}

#[derive(Default)]
struct Counters {
    launches: AtomicUsize,
    shutdowns: AtomicUsize,
    contexts_opened: AtomicUsize,
    contexts_closed: AtomicUsize,
    screenshots: AtomicUsize,
    actions: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    fail_launch: AtomicBool,
    fail_screenshots: AtomicBool,
    corrupt_screenshots: AtomicBool,
    fail_close_context: AtomicBool,
    fail_new_page: AtomicBool,
}

struct FixtureContext {
    viewport: ViewportSpec,
    preload: StorageWrites,
}

struct PageSlot {
    context: u64,
    page: FixturePage,
}

#[derive(Default)]
struct World {
    running: bool,
    next_id: u64,
    contexts: HashMap<u64, FixtureContext>,
    pages: HashMap<u64, PageSlot>,
}

impl World {
    fn page_mut(&mut self, page: PageId) -> DriverResult<&mut PageSlot> {
        if !self.running {
            return Err(DriverError::NotRunning);
        }
        self.pages.get_mut(&page.0).ok_or(DriverError::Closed)
    }
}

/// [`BrowserDriver`] running a [`FixtureApp`] in process
pub struct FixtureDriver {
    app: Arc<dyn FixtureApp>,
    world: Mutex<World>,
    counters: Counters,
    faults: Faults,
}

impl FixtureDriver {
    pub fn new(app: impl FixtureApp + 'static) -> Self {
        Self {
            app: Arc::new(app),
            world: Mutex::new(World::default()),
            counters: Counters::default(),
            faults: Faults::default(),
        }
    }

    pub fn stats(&self) -> FixtureStats {
        FixtureStats {
            launches: self.counters.launches.load(Ordering::SeqCst),
            shutdowns: self.counters.shutdowns.load(Ordering::SeqCst),
            contexts_opened: self.counters.contexts_opened.load(Ordering::SeqCst),
            contexts_closed: self.counters.contexts_closed.load(Ordering::SeqCst),
            screenshots: self.counters.screenshots.load(Ordering::SeqCst),
            actions: self.counters.actions.load(Ordering::SeqCst),
        }
    }

    pub fn is_running(&self) -> bool {
        self.world.lock().running
    }

    pub fn live_contexts(&self) -> usize {
        self.world.lock().contexts.len()
    }

    /// Live local storage of a page
    pub fn storage(&self, page: PageId) -> Option<BTreeMap<String, String>> {
        self.world.lock().pages.get(&page.0).map(|slot| slot.page.storage.clone())
    }

    pub fn url(&self, page: PageId) -> Option<String> {
        self.world.lock().pages.get(&page.0).map(|slot| slot.page.url.clone())
    }

    pub fn fail_launch(&self, fail: bool) {
        self.faults.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_screenshots(&self, fail: bool) {
        self.faults.fail_screenshots.store(fail, Ordering::SeqCst);
    }

    pub fn corrupt_screenshots(&self, corrupt: bool) {
        self.faults.corrupt_screenshots.store(corrupt, Ordering::SeqCst);
    }

    pub fn fail_close_context(&self, fail: bool) {
        self.faults.fail_close_context.store(fail, Ordering::SeqCst);
    }

    pub fn fail_new_page(&self, fail: bool) {
        self.faults.fail_new_page.store(fail, Ordering::SeqCst);
    }

    fn visible_nodes(&self, page: &FixturePage, strategy: &Strategy) -> Vec<FixtureNode> {
        let age = page.loaded_at.elapsed();
        self.app
            .render(page)
            .into_iter()
            .filter(|n| n.visible && n.appears_after.map_or(true, |d| age >= d))
            .filter(|n| n.matches(strategy))
            .collect()
    }

    fn pick(&self, page: &FixturePage, query: &ElementQuery) -> DriverResult<FixtureNode> {
        let mut matches = self.visible_nodes(page, &query.strategy);
        let index = query.pick_index(matches.len()).ok_or_else(|| {
            DriverError::Remote(format!("{}: expected a single visible match, found {}", query, matches.len()))
        })?;
        Ok(matches.swap_remove(index))
    }

    fn load(&self, world: &mut World, page: PageId, url: Option<&str>) -> DriverResult<()> {
        let slot = world.page_mut(page)?;
        let context = slot.context;
        if let Some(url) = url {
            slot.page.url = url.to_string();
        }
        let preload = world
            .contexts
            .get(&context)
            .map(|c| c.preload.clone())
            .unwrap_or_default();

        let slot = world.page_mut(page)?;
        for (key, value) in preload.iter() {
            slot.page.storage.insert(key.to_string(), value.to_string());
        }
        slot.page.boot = slot.page.storage.clone();
        slot.page.state.clear();
        slot.page.loaded_at = Instant::now();
        self.app.on_navigate(&mut slot.page);
        Ok(())
    }

    fn act<F>(&self, page: PageId, f: F) -> DriverResult<()>
    where
        F: FnOnce(&Self, &mut FixturePage) -> DriverResult<()>,
    {
        let mut world = self.world.lock();
        let slot = world.page_mut(page)?;
        f(self, &mut slot.page)?;
        self.counters.actions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn render_png(&self, page: &FixturePage, full_page: bool) -> DriverResult<Vec<u8>> {
        let mut hasher = Sha256::new();
        hasher.update(page.url.as_bytes());
        for node in self.app.render(page).iter().filter(|n| n.visible) {
            hasher.update(node.key.as_bytes());
        }
        let digest = hasher.finalize();

        let height = if full_page { page.viewport.height * 2 } else { page.viewport.height };
        let image = image::RgbImage::from_pixel(
            page.viewport.width,
            height,
            image::Rgb([digest[0], digest[1], digest[2]]),
        );

        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, image::ImageOutputFormat::Png)
            .map_err(|e| DriverError::Remote(format!("encoding screenshot: {}", e)))?;
        Ok(bytes.into_inner())
    }
}

#[async_trait]
impl BrowserDriver for FixtureDriver {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn launch(&self) -> DriverResult<()> {
        if self.faults.fail_launch.load(Ordering::SeqCst) {
            return Err(DriverError::Remote("browser executable not found".to_string()));
        }
        let mut world = self.world.lock();
        if !world.running {
            world.running = true;
            self.counters.launches.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn shutdown(&self) -> DriverResult<()> {
        let mut world = self.world.lock();
        if world.running {
            world.running = false;
            world.contexts.clear();
            world.pages.clear();
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn new_context(&self, viewport: ViewportSpec, preload: &StorageWrites) -> DriverResult<ContextId> {
        let mut world = self.world.lock();
        if !world.running {
            return Err(DriverError::NotRunning);
        }
        world.next_id += 1;
        let id = world.next_id;
        world.contexts.insert(
            id,
            FixtureContext {
                viewport,
                preload: preload.clone(),
            },
        );
        self.counters.contexts_opened.fetch_add(1, Ordering::SeqCst);
        debug!("fixture: opened context {} ({})", id, viewport);
        Ok(ContextId(id))
    }

    async fn new_page(&self, context: ContextId) -> DriverResult<PageId> {
        if self.faults.fail_new_page.load(Ordering::SeqCst) {
            return Err(DriverError::Remote("page open failed".to_string()));
        }
        let mut world = self.world.lock();
        if !world.running {
            return Err(DriverError::NotRunning);
        }
        let viewport = world.contexts.get(&context.0).ok_or(DriverError::Closed)?.viewport;
        world.next_id += 1;
        let id = world.next_id;
        world.pages.insert(
            id,
            PageSlot {
                context: context.0,
                page: FixturePage::new(viewport),
            },
        );
        Ok(PageId(id))
    }

    async fn close_context(&self, context: ContextId) -> DriverResult<()> {
        if self.faults.fail_close_context.load(Ordering::SeqCst) {
            return Err(DriverError::Remote("context close failed".to_string()));
        }
        let mut world = self.world.lock();
        if world.contexts.remove(&context.0).is_some() {
            world.pages.retain(|_, slot| slot.context != context.0);
            self.counters.contexts_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn goto(&self, page: PageId, url: &str, _wait_until: LoadState, _timeout_ms: u64) -> DriverResult<()> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DriverError::Remote(format!("invalid url '{}'", url)));
        }
        let mut world = self.world.lock();
        self.load(&mut world, page, Some(url))
    }

    async fn reload(&self, page: PageId, _wait_until: LoadState, _timeout_ms: u64) -> DriverResult<()> {
        let mut world = self.world.lock();
        self.load(&mut world, page, None)
    }

    async fn write_storage(&self, page: PageId, writes: &StorageWrites) -> DriverResult<()> {
        let mut world = self.world.lock();
        let slot = world.page_mut(page)?;
        if slot.page.is_blank() {
            return Err(DriverError::Remote("localStorage is not available on about:blank".to_string()));
        }
        for (key, value) in writes.iter() {
            slot.page.storage.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn count_visible(&self, page: PageId, query: &ElementQuery) -> DriverResult<usize> {
        let mut world = self.world.lock();
        let slot = world.page_mut(page)?;
        Ok(self.visible_nodes(&slot.page, &query.strategy).len())
    }

    async fn click(&self, page: PageId, query: &ElementQuery) -> DriverResult<()> {
        self.act(page, |driver, page| {
            let node = driver.pick(page, query)?;
            driver.app.on_click(page, &node).map_err(DriverError::Remote)
        })
    }

    async fn fill(&self, page: PageId, query: &ElementQuery, value: &str) -> DriverResult<()> {
        self.act(page, |driver, page| {
            let node = driver.pick(page, query)?;
            driver.app.on_fill(page, &node, value).map_err(DriverError::Remote)
        })
    }

    async fn select_option(&self, page: PageId, query: &ElementQuery, option: &SelectOption) -> DriverResult<()> {
        self.act(page, |driver, page| {
            let node = driver.pick(page, query)?;
            driver.app.on_select(page, &node, option).map_err(DriverError::Remote)
        })
    }

    async fn mouse_click(&self, page: PageId, x: f64, y: f64) -> DriverResult<()> {
        self.act(page, |driver, page| {
            driver.app.on_mouse_click(page, x, y);
            Ok(())
        })
    }

    async fn screenshot(&self, page: PageId, full_page: bool) -> DriverResult<Vec<u8>> {
        if self.faults.fail_screenshots.load(Ordering::SeqCst) {
            return Err(DriverError::Remote("screenshot failed".to_string()));
        }
        let mut world = self.world.lock();
        let slot = world.page_mut(page)?;
        self.counters.screenshots.fetch_add(1, Ordering::SeqCst);
        if self.faults.corrupt_screenshots.load(Ordering::SeqCst) {
            return Ok(b"not a png".to_vec());
        }
        self.render_png(&slot.page, full_page)
    }
}
