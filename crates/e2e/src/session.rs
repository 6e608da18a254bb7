//! Browser session lifecycle
//!
//! One browser process is shared; every scenario gets its own context and
//! page. [`SessionManager::scoped`] is the only way scenarios obtain a
//! session in the runner: it releases on every exit path.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::{BrowserDriver, ContextId, PageId};
use crate::error::{E2eError, E2eResult, SessionError};
use crate::mock::StorageWrites;
use crate::spec::ViewportSpec;

struct SessionInner {
    id: Uuid,
    viewport: ViewportSpec,
    context: ContextId,
    page: PageId,
    driver: Arc<dyn BrowserDriver>,
    manager: Arc<ManagerShared>,
    released: AtomicBool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Session {} dropped without release; closing its context", self.id);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let driver = self.driver.clone();
        let manager = self.manager.clone();
        let context = self.context;
        handle.spawn(async move {
            if let Err(e) = driver.close_context(context).await {
                warn!("Failed to close leaked context {}: {}", context, e);
            }
            manager.context_closed().await;
        });
    }
}

/// One isolated browser context with one page, sized to a viewport
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn viewport(&self) -> ViewportSpec {
        self.inner.viewport
    }

    pub fn context(&self) -> ContextId {
        self.inner.context
    }

    pub fn page(&self) -> PageId {
        self.inner.page
    }

    pub fn driver(&self) -> &Arc<dyn BrowserDriver> {
        &self.inner.driver
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("viewport", &self.inner.viewport)
            .field("context", &self.inner.context)
            .field("page", &self.inner.page)
            .field("released", &self.is_released())
            .finish()
    }
}

#[derive(Default)]
struct ProcessState {
    running: bool,
    live: usize,
}

struct ManagerShared {
    driver: Arc<dyn BrowserDriver>,
    process: Mutex<ProcessState>,
    keep_browser: bool,
}

impl ManagerShared {
    /// Account for a closed context and stop the browser once none remain
    async fn context_closed(&self) {
        let mut process = self.process.lock().await;
        process.live = process.live.saturating_sub(1);
        if process.live == 0 && process.running && !self.keep_browser {
            info!("Last session released, stopping browser");
            process.running = false;
            if let Err(e) = self.driver.shutdown().await {
                warn!("{}", SessionError::Shutdown(e));
            }
        }
    }
}

/// Hands out sessions on a shared browser process
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<ManagerShared>,
}

impl SessionManager {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self::with_keep_browser(driver, false)
    }

    /// With `keep_browser`, the process survives the last release until
    /// [`SessionManager::shutdown`]
    pub fn with_keep_browser(driver: Arc<dyn BrowserDriver>, keep_browser: bool) -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                driver,
                process: Mutex::new(ProcessState::default()),
                keep_browser,
            }),
        }
    }

    pub fn driver(&self) -> &Arc<dyn BrowserDriver> {
        &self.shared.driver
    }

    /// Number of sessions not yet released
    pub async fn live_sessions(&self) -> usize {
        self.shared.process.lock().await.live
    }

    /// Launch or reuse the browser, open a fresh context sized to `viewport`
    /// with `preload` registered before any page script, and open a page
    pub async fn acquire(&self, viewport: ViewportSpec, preload: &StorageWrites) -> Result<Session, SessionError> {
        let driver = self.shared.driver.clone();

        let context = {
            let mut process = self.shared.process.lock().await;
            if !process.running {
                info!("Launching browser ({})", driver.name());
                driver.launch().await.map_err(SessionError::Launch)?;
                process.running = true;
            }
            let context = driver.new_context(viewport, preload).await;
            match context {
                Ok(context) => {
                    process.live += 1;
                    context
                }
                Err(e) => {
                    if process.live == 0 && !self.shared.keep_browser {
                        process.running = false;
                        if let Err(e) = driver.shutdown().await {
                            warn!("{}", SessionError::Shutdown(e));
                        }
                    }
                    return Err(SessionError::Context(e));
                }
            }
        };

        let page = match driver.new_page(context).await {
            Ok(page) => page,
            Err(e) => {
                if let Err(e) = driver.close_context(context).await {
                    warn!("{}", SessionError::Release(e));
                }
                self.shared.context_closed().await;
                return Err(SessionError::Page(e));
            }
        };

        let session = Session {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                viewport,
                context,
                page,
                driver,
                manager: self.shared.clone(),
                released: AtomicBool::new(false),
            }),
        };
        debug!("Acquired session {} ({}, {})", session.id(), viewport, context);
        Ok(session)
    }

    /// Close the session's context, and the browser when it was the last
    /// one. Only the first call does anything. Failures are logged.
    pub async fn release(&self, session: &Session) {
        if session.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Releasing session {}", session.id());

        if let Err(e) = self.shared.driver.close_context(session.context()).await {
            warn!("{}", SessionError::Release(e));
        }
        self.shared.context_closed().await;
    }

    /// Run `body` with a fresh session, bounded by `limit`, releasing the
    /// session afterwards whether `body` succeeds, fails, panics or times out
    pub async fn scoped<F, Fut, T>(
        &self,
        name: &str,
        viewport: ViewportSpec,
        preload: &StorageWrites,
        limit: Option<Duration>,
        body: F,
    ) -> E2eResult<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = E2eResult<T>>,
    {
        let session = self.acquire(viewport, preload).await?;

        let work = AssertUnwindSafe(body(session.clone())).catch_unwind();
        let outcome = match limit {
            Some(limit) => tokio::time::timeout(limit, work).await.ok(),
            None => Some(work.await),
        };

        self.release(&session).await;

        match outcome {
            Some(Ok(result)) => result,
            Some(Err(panic)) => std::panic::resume_unwind(panic),
            None => Err(E2eError::ScenarioTimeout {
                scenario: name.to_string(),
                limit_ms: limit.map(|l| l.as_millis() as u64).unwrap_or_default(),
            }),
        }
    }

    /// Stop the browser regardless of live sessions
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let mut process = self.shared.process.lock().await;
        if process.running {
            process.running = false;
            self.shared.driver.shutdown().await.map_err(SessionError::Shutdown)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fixture::{FixtureApp, FixtureNode, FixturePage};
    use crate::driver::FixtureDriver;

    struct Blank;

    impl FixtureApp for Blank {
        fn render(&self, _page: &FixturePage) -> Vec<FixtureNode> {
            Vec::new()
        }
    }

    fn manager() -> (Arc<FixtureDriver>, SessionManager) {
        let driver = Arc::new(FixtureDriver::new(Blank));
        let manager = SessionManager::new(driver.clone());
        (driver, manager)
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (driver, manager) = manager();
        let session = manager.acquire(ViewportSpec::DESKTOP, &StorageWrites::new()).await.unwrap();

        manager.release(&session).await;
        manager.release(&session).await;

        let stats = driver.stats();
        assert_eq!(stats.contexts_closed, 1);
        assert_eq!(stats.shutdowns, 1);
        assert!(session.is_released());
    }

    #[tokio::test]
    async fn test_browser_shared_until_last_release() {
        let (driver, manager) = manager();
        let a = manager.acquire(ViewportSpec::MOBILE, &StorageWrites::new()).await.unwrap();
        let b = manager.acquire(ViewportSpec::DESKTOP, &StorageWrites::new()).await.unwrap();
        assert_ne!(a.context(), b.context());
        assert_eq!(driver.stats().launches, 1);

        manager.release(&a).await;
        assert!(driver.is_running());
        manager.release(&b).await;
        assert!(!driver.is_running());
        assert_eq!(manager.live_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_launch_failure_is_session_error() {
        let (driver, manager) = manager();
        driver.fail_launch(true);
        let err = manager.acquire(ViewportSpec::DESKTOP, &StorageWrites::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::Launch(_)));
    }

    #[tokio::test]
    async fn test_release_failure_does_not_mask_result() {
        let (driver, manager) = manager();
        driver.fail_close_context(true);
        let value = manager
            .scoped("s", ViewportSpec::DESKTOP, &StorageWrites::new(), None, |_| async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(manager.live_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_page_failure_cleans_up_even_when_close_fails() {
        let (driver, manager) = manager();
        driver.fail_new_page(true);
        driver.fail_close_context(true);

        let err = manager
            .acquire(ViewportSpec::DESKTOP, &StorageWrites::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Page(_)));
        assert_eq!(manager.live_sessions().await, 0);
        assert!(!driver.is_running());

        driver.fail_new_page(false);
        driver.fail_close_context(false);
        let session = manager.acquire(ViewportSpec::DESKTOP, &StorageWrites::new()).await.unwrap();
        assert_eq!(driver.stats().launches, 2);
        manager.release(&session).await;
    }

    #[tokio::test]
    async fn test_scoped_releases_on_timeout() {
        let (driver, manager) = manager();
        let err = manager
            .scoped(
                "slow",
                ViewportSpec::DESKTOP,
                &StorageWrites::new(),
                Some(Duration::from_millis(50)),
                |_| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, E2eError::ScenarioTimeout { limit_ms: 50, .. }));
        assert_eq!(driver.stats().contexts_closed, 1);
        assert!(!driver.is_running());
    }

    #[tokio::test]
    async fn test_scoped_releases_on_panic() {
        let (driver, manager) = manager();
        let task = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .scoped("boom", ViewportSpec::DESKTOP, &StorageWrites::new(), None, |_| async {
                        if true {
                            panic!("scenario body panicked");
                        }
                        Ok(())
                    })
                    .await
            })
        };

        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(driver.stats().contexts_closed, 1);
        assert_eq!(manager.live_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_session_is_cleaned_up() {
        let (driver, manager) = manager();
        let session = manager.acquire(ViewportSpec::DESKTOP, &StorageWrites::new()).await.unwrap();
        drop(session);

        for _ in 0..50 {
            if driver.stats().contexts_closed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(driver.stats().contexts_closed, 1);
    }
}
