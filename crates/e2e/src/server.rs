//! Target app management - optionally spawning the dev server and probing
//! the base URL until it answers

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::TargetConfig;
use crate::error::{E2eError, E2eResult};

/// Handle to a dev server process started by the harness
pub struct AppServer {
    child: Option<Child>,
    pub base_url: String,
}

impl AppServer {
    /// Start the configured command (if any) and wait for the base URL
    pub async fn start(config: &TargetConfig) -> E2eResult<Self> {
        let child = match &config.command {
            Some(command) => Some(spawn(command, config.working_dir.as_ref())?),
            None => None,
        };

        let mut server = AppServer {
            child,
            base_url: config.base_url.clone(),
        };

        if config.probe || server.child.is_some() {
            if let Err(e) = probe(&config.base_url, Duration::from_millis(config.startup_timeout_ms)).await {
                server.stop();
                return Err(e);
            }
            info!("Target app is up at {}", config.base_url);
        }

        Ok(server)
    }

    /// Whether the harness owns the server process
    pub fn is_managed(&self) -> bool {
        self.child.is_some()
    }

    /// Stop the server if the harness started it
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        info!("Stopping target app (pid: {})", child.id());

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        // Force kill if still running
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for AppServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn(command: &[String], working_dir: Option<&PathBuf>) -> E2eResult<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| E2eError::Config("target.command must not be empty".to_string()))?;

    info!("Starting target app: {}", command.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env("BROWSER", "none")
        .stdout(Stdio::null())
        .stderr(Stdio::inherit());
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    cmd.spawn()
        .map_err(|e| E2eError::TargetStartup(format!("failed to spawn {}: {}", program, e)))
}

/// Poll `GET base_url` until it answers with a success status
pub async fn probe(base_url: &str, timeout: Duration) -> E2eResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let start = std::time::Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match client.get(base_url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                warn!("Probe of {} returned {}", base_url, resp.status());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for {} ...", base_url);
                }
                // Connection refused is expected while the app is starting
                if !e.is_connect() {
                    warn!("Probe error: {}", e);
                }
            }
        }

        if start.elapsed() >= timeout {
            return Err(E2eError::TargetUnreachable {
                url: base_url.to_string(),
                attempts,
            });
        }
        sleep(Duration::from_millis(250)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_unreachable() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{}/", port);

        let err = probe(&url, Duration::from_millis(100)).await.unwrap_err();
        match err {
            E2eError::TargetUnreachable { url: u, attempts } => {
                assert_eq!(u, url);
                assert!(attempts >= 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unmanaged_without_probe() {
        let config = TargetConfig {
            probe: false,
            ..Default::default()
        };
        let server = AppServer::start(&config).await.unwrap();
        assert!(!server.is_managed());
    }

    #[test]
    fn test_spawn_rejects_empty_command() {
        assert!(matches!(spawn(&[], None), Err(E2eError::Config(_))));
    }
}
