//! Playwright browser automation over a long-lived Node bridge
//!
//! ```text
//!  PlaywrightDriver ──stdin──▶ node bridge.js ──▶ playwright ──▶ browser
//!        ▲                         │
//!        └───── reader task ◀──stdout (JSON lines, demuxed by id)
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserDriver, ContextId, ElementQuery, PageId};
use crate::error::{DriverError, DriverResult};
use crate::mock::StorageWrites;
use crate::spec::{LoadState, SelectOption, ViewportSpec};

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

/// Slack added on top of the browser-side timeout before giving up on a reply
const REPLY_MARGIN_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for the Playwright bridge
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,

    /// Node executable
    pub node_binary: PathBuf,

    /// Directory whose node_modules provides `playwright`
    pub project_dir: PathBuf,

    pub launch_timeout: Duration,

    /// Bound for requests that carry no timeout of their own
    pub request_timeout: Duration,

    /// Browser-side timeout for click/fill/select once an element is picked
    pub action_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            node_binary: PathBuf::from("node"),
            project_dir: PathBuf::from("."),
            launch_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            action_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

type Pending = Mutex<HashMap<u64, oneshot::Sender<Reply>>>;

/// Request side of the bridge, shared with in-flight calls
struct BridgeIo {
    stdin: AsyncMutex<ChildStdin>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
}

impl BridgeIo {
    async fn call(&self, op: &str, params: Value, timeout: Duration) -> DriverResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut request = match params {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => return Err(DriverError::Protocol(format!("params must be an object, got {}", other))),
        };
        request.insert("id".to_string(), json!(id));
        request.insert("op".to_string(), json!(op));

        let mut line = serde_json::to_string(&request).map_err(|e| DriverError::Protocol(e.to_string()))?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        {
            let mut stdin = self.stdin.lock().await;
            let written = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            }
            .await;
            if written.is_err() {
                self.pending.lock().remove(&id);
                return Err(DriverError::Closed);
            }
        }

        let waited = timeout + Duration::from_millis(REPLY_MARGIN_MS);
        let reply = match tokio::time::timeout(waited, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(DriverError::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(DriverError::Timeout(timeout.as_millis() as u64));
            }
        };

        if reply.ok {
            return Ok(reply.result);
        }

        let message = reply.error.unwrap_or_else(|| "unknown error".to_string());
        Err(match reply.code.as_deref() {
            Some("closed") => DriverError::Closed,
            Some("protocol") => DriverError::Protocol(message),
            _ => DriverError::Remote(message),
        })
    }
}

/// Running node process plus its reader tasks
struct Bridge {
    child: Child,
    io: Arc<BridgeIo>,
    tasks: Vec<JoinHandle<()>>,
    // Holds bridge.js on disk for the lifetime of the process
    _script_dir: tempfile::TempDir,
}

/// [`BrowserDriver`] backed by Playwright
pub struct PlaywrightDriver {
    config: PlaywrightConfig,
    bridge: AsyncMutex<Option<Bridge>>,
}

impl PlaywrightDriver {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self {
            config,
            bridge: AsyncMutex::new(None),
        }
    }

    async fn io(&self) -> DriverResult<Arc<BridgeIo>> {
        self.bridge
            .lock()
            .await
            .as_ref()
            .map(|b| b.io.clone())
            .ok_or(DriverError::NotRunning)
    }

    async fn call(&self, op: &str, params: Value) -> DriverResult<Value> {
        self.call_with(op, params, self.config.request_timeout).await
    }

    async fn call_with(&self, op: &str, params: Value, timeout: Duration) -> DriverResult<Value> {
        let io = self.io().await?;
        io.call(op, params, timeout).await
    }

    fn spawn_bridge(&self) -> DriverResult<Bridge> {
        let script_dir = tempfile::tempdir().map_err(|e| DriverError::Protocol(format!("tempdir: {}", e)))?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)
            .map_err(|e| DriverError::Protocol(format!("writing bridge script: {}", e)))?;

        let options = json!({
            "browser": self.config.browser.as_str(),
            "headless": self.config.headless,
        });

        debug!("Spawning {} {}", self.config.node_binary.display(), script_path.display());

        let mut child = Command::new(&self.config.node_binary)
            .arg(&script_path)
            .arg(options.to_string())
            .current_dir(&self.config.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DriverError::Remote(format!("failed to spawn {}: {}", self.config.node_binary.display(), e)))?;

        let stdin = child.stdin.take().ok_or_else(|| DriverError::Protocol("bridge stdin unavailable".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| DriverError::Protocol("bridge stdout unavailable".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| DriverError::Protocol("bridge stderr unavailable".into()))?;

        let pending: Arc<Pending> = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<Reply>(&line) {
                    Ok(reply) => {
                        if let Some(tx) = reader_pending.lock().remove(&reply.id) {
                            let _ = tx.send(reply);
                        }
                    }
                    Err(e) => warn!("Unparseable bridge output ({}): {}", e, line),
                }
            }
            // Dropping the senders wakes every waiter with Closed
            reader_pending.lock().clear();
            debug!("Bridge stdout closed");
        });

        let logger = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("[bridge] {}", line);
            }
        });

        Ok(Bridge {
            child,
            io: Arc::new(BridgeIo {
                stdin: AsyncMutex::new(stdin),
                pending,
                next_id: AtomicU64::new(1),
            }),
            tasks: vec![reader, logger],
            _script_dir: script_dir,
        })
    }

    async fn stop_bridge(&self, mut bridge: Bridge) {
        let _ = bridge.io.call("close", Value::Null, Duration::from_secs(5)).await;

        if tokio::time::timeout(Duration::from_secs(2), bridge.child.wait()).await.is_err() {
            #[cfg(unix)]
            {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                if let Some(pid) = bridge.child.id() {
                    if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
            let _ = bridge.child.kill().await;
        }

        for task in bridge.tasks {
            task.abort();
        }
    }
}

fn page_params(page: PageId, mut extra: Value) -> Value {
    if let Value::Object(map) = &mut extra {
        map.insert("page".to_string(), json!(page.0));
    }
    extra
}

fn handle_from(value: Value, what: &str) -> DriverResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| DriverError::Protocol(format!("expected {} id, got {}", what, value)))
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    fn name(&self) -> &'static str {
        "playwright"
    }

    async fn launch(&self) -> DriverResult<()> {
        let mut guard = self.bridge.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        info!(
            "Launching {} (headless: {}) via Playwright bridge",
            self.config.browser.as_str(),
            self.config.headless
        );

        let bridge = self.spawn_bridge()?;
        let io = bridge.io.clone();
        *guard = Some(bridge);
        drop(guard);

        if let Err(e) = io.call("launch", Value::Null, self.config.launch_timeout).await {
            if let Some(bridge) = self.bridge.lock().await.take() {
                self.stop_bridge(bridge).await;
            }
            return Err(e);
        }
        Ok(())
    }

    async fn shutdown(&self) -> DriverResult<()> {
        let bridge = self.bridge.lock().await.take();
        if let Some(bridge) = bridge {
            info!("Stopping browser");
            self.stop_bridge(bridge).await;
        }
        Ok(())
    }

    async fn new_context(&self, viewport: ViewportSpec, preload: &StorageWrites) -> DriverResult<ContextId> {
        let script = if preload.is_empty() {
            Value::Null
        } else {
            Value::String(preload.to_script().map_err(|e| DriverError::Protocol(e.to_string()))?)
        };

        let id = self
            .call(
                "newContext",
                json!({ "width": viewport.width, "height": viewport.height, "preload": script }),
            )
            .await?;
        Ok(ContextId(handle_from(id, "context")?))
    }

    async fn new_page(&self, context: ContextId) -> DriverResult<PageId> {
        let id = self.call("newPage", json!({ "context": context.0 })).await?;
        Ok(PageId(handle_from(id, "page")?))
    }

    async fn close_context(&self, context: ContextId) -> DriverResult<()> {
        self.call("closeContext", json!({ "context": context.0 })).await?;
        Ok(())
    }

    async fn goto(&self, page: PageId, url: &str, wait_until: LoadState, timeout_ms: u64) -> DriverResult<()> {
        self.call_with(
            "goto",
            page_params(page, json!({ "url": url, "waitUntil": wait_until.as_str(), "timeout": timeout_ms })),
            Duration::from_millis(timeout_ms),
        )
        .await?;
        Ok(())
    }

    async fn reload(&self, page: PageId, wait_until: LoadState, timeout_ms: u64) -> DriverResult<()> {
        self.call_with(
            "reload",
            page_params(page, json!({ "waitUntil": wait_until.as_str(), "timeout": timeout_ms })),
            Duration::from_millis(timeout_ms),
        )
        .await?;
        Ok(())
    }

    async fn write_storage(&self, page: PageId, writes: &StorageWrites) -> DriverResult<()> {
        let script = writes.to_script().map_err(|e| DriverError::Protocol(e.to_string()))?;
        self.call("evaluate", page_params(page, json!({ "script": script }))).await?;
        Ok(())
    }

    async fn count_visible(&self, page: PageId, query: &ElementQuery) -> DriverResult<usize> {
        let count = self.call("count", page_params(page, json!({ "query": query }))).await?;
        Ok(handle_from(count, "count")? as usize)
    }

    async fn click(&self, page: PageId, query: &ElementQuery) -> DriverResult<()> {
        let timeout = self.config.action_timeout.as_millis() as u64;
        self.call("click", page_params(page, json!({ "query": query, "timeout": timeout })))
            .await?;
        Ok(())
    }

    async fn fill(&self, page: PageId, query: &ElementQuery, value: &str) -> DriverResult<()> {
        let timeout = self.config.action_timeout.as_millis() as u64;
        self.call(
            "fill",
            page_params(page, json!({ "query": query, "value": value, "timeout": timeout })),
        )
        .await?;
        Ok(())
    }

    async fn select_option(&self, page: PageId, query: &ElementQuery, option: &SelectOption) -> DriverResult<()> {
        let timeout = self.config.action_timeout.as_millis() as u64;
        self.call(
            "select",
            page_params(page, json!({ "query": query, "option": option, "timeout": timeout })),
        )
        .await?;
        Ok(())
    }

    async fn mouse_click(&self, page: PageId, x: f64, y: f64) -> DriverResult<()> {
        self.call("mouseClick", page_params(page, json!({ "x": x, "y": y }))).await?;
        Ok(())
    }

    async fn screenshot(&self, page: PageId, full_page: bool) -> DriverResult<Vec<u8>> {
        let encoded = self
            .call("screenshot", page_params(page, json!({ "fullPage": full_page })))
            .await?;
        let encoded = encoded
            .as_str()
            .ok_or_else(|| DriverError::Protocol("screenshot reply is not a string".into()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| DriverError::Protocol(format!("screenshot is not base64: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Strategy;

    #[test]
    fn test_query_wire_format() {
        let query = ElementQuery::new(Strategy::Role {
            role: "button".to_string(),
            name: Some("View XP History".to_string()),
        });
        let params = page_params(PageId(7), json!({ "query": query }));

        assert_eq!(params["page"], 7);
        assert_eq!(params["query"]["strategy"]["by"], "role");
        assert_eq!(params["query"]["strategy"]["name"], "View XP History");
        assert!(params["query"]["nth"].is_null());
    }

    #[test]
    fn test_reply_parsing() {
        let ok: Reply = serde_json::from_str(r#"{"id":3,"ok":true,"result":2}"#).unwrap();
        assert!(ok.ok);
        assert_eq!(ok.result, json!(2));

        let closed: Reply = serde_json::from_str(r#"{"id":4,"ok":false,"error":"page 1 is closed","code":"closed"}"#).unwrap();
        assert_eq!(closed.code.as_deref(), Some("closed"));
    }

    #[test]
    fn test_bridge_script_handles_every_op() {
        for op in [
            "launch", "newContext", "newPage", "closeContext", "goto", "reload", "evaluate", "count", "click", "fill",
            "select", "mouseClick", "screenshot", "close",
        ] {
            assert!(BRIDGE_SCRIPT.contains(&format!("async {}(", op)), "missing handler {}", op);
        }
    }

    #[tokio::test]
    async fn test_calls_before_launch_fail() {
        let driver = PlaywrightDriver::new(PlaywrightConfig::default());
        let err = driver.new_page(ContextId(1)).await.unwrap_err();
        assert!(matches!(err, DriverError::NotRunning));
        assert!(driver.shutdown().await.is_ok());
    }
}
