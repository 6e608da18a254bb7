//! Harness configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::DiagnosticCapture;
use crate::driver::playwright::{Browser, PlaywrightConfig};
use crate::error::{E2eError, E2eResult};
use crate::flow::{FlowRunner, FlowSettings};
use crate::locate::Locator;
use crate::mock::{MockStateInjector, StorageKeys};

/// Harness configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// App under test
    pub target: TargetConfig,

    /// Browser process
    pub browser: BrowserConfig,

    /// Element lookup timing
    pub locate: LocateConfig,

    /// Step timing
    pub flow: FlowConfig,

    /// Screenshot output
    pub artifacts: ArtifactConfig,

    /// Local-storage key names used for mock injection
    pub storage: StorageKeys,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub base_url: String,

    /// Command that starts the app's dev server, if the harness should own it
    pub command: Option<Vec<String>>,

    /// Working directory for `command`
    pub working_dir: Option<PathBuf>,

    pub startup_timeout_ms: u64,

    /// Wait for the base URL to answer before running scenarios
    pub probe: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            command: None,
            working_dir: None,
            startup_timeout_ms: 60_000,
            probe: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: Browser,
    pub headless: bool,
    pub node_binary: PathBuf,

    /// Directory whose node_modules provides playwright
    pub project_dir: PathBuf,

    /// Keep the browser running between sequential scenarios
    pub keep_alive: bool,

    pub launch_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub action_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: Browser::Chromium,
            headless: true,
            node_binary: PathBuf::from("node"),
            project_dir: PathBuf::from("."),
            keep_alive: true,
            launch_timeout_ms: 30_000,
            request_timeout_ms: 30_000,
            action_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocateConfig {
    /// Per-candidate timeout when the candidate declares none
    pub candidate_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Total locate time allowed per scenario
    pub scenario_ceiling_ms: u64,
}

impl Default for LocateConfig {
    fn default() -> Self {
        Self {
            candidate_timeout_ms: 3_000,
            poll_interval_ms: 100,
            scenario_ceiling_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub settle_ms: u64,
    pub max_settle_ms: u64,
    pub navigation_timeout_ms: u64,
    pub default_wait_ms: u64,
    /// Scenario limit when the scenario declares none
    pub scenario_timeout_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            max_settle_ms: 5_000,
            navigation_timeout_ms: 30_000,
            default_wait_ms: 10_000,
            scenario_timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
    /// Capture the whole scrollable page for checkpoints by default
    pub full_page: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("verification"),
            full_page: false,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, or defaults if the file does not exist
    pub fn load(path: &Path) -> E2eResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> E2eResult<()> {
        let url = &self.target.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(E2eError::Config(format!("base_url must be http(s), got '{}'", url)));
        }
        if self.locate.poll_interval_ms == 0 {
            return Err(E2eError::Config("locate.poll_interval_ms must be positive".to_string()));
        }
        if matches!(&self.target.command, Some(cmd) if cmd.is_empty()) {
            return Err(E2eError::Config("target.command must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn playwright(&self) -> PlaywrightConfig {
        PlaywrightConfig {
            browser: self.browser.kind,
            headless: self.browser.headless,
            node_binary: self.browser.node_binary.clone(),
            project_dir: self.browser.project_dir.clone(),
            launch_timeout: Duration::from_millis(self.browser.launch_timeout_ms),
            request_timeout: Duration::from_millis(self.browser.request_timeout_ms),
            action_timeout: Duration::from_millis(self.browser.action_timeout_ms),
        }
    }

    pub fn locator(&self) -> Locator {
        Locator::new(
            Duration::from_millis(self.locate.candidate_timeout_ms),
            Duration::from_millis(self.locate.poll_interval_ms),
        )
    }

    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            base_url: self.target.base_url.clone(),
            action_settle: Duration::from_millis(self.flow.settle_ms),
            max_settle: Duration::from_millis(self.flow.max_settle_ms),
            navigation_timeout: Duration::from_millis(self.flow.navigation_timeout_ms),
            default_wait: Duration::from_millis(self.flow.default_wait_ms),
            locate_ceiling: (self.locate.scenario_ceiling_ms > 0)
                .then(|| Duration::from_millis(self.locate.scenario_ceiling_ms)),
        }
    }

    pub fn flow_runner(&self) -> FlowRunner {
        FlowRunner::new(
            self.locator(),
            DiagnosticCapture::new(&self.artifacts.dir, self.artifacts.full_page),
            MockStateInjector::new(self.storage.clone()),
            self.flow_settings(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.storage.profile, "current_user_profile");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jungle.toml");
        std::fs::write(
            &path,
            r#"
[target]
base_url = "http://127.0.0.1:5173"
command = ["npm", "run", "dev"]

[browser]
kind = "firefox"

[storage]
auth = "sb-prod-auth-token"
"#,
        )
        .unwrap();

        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.target.base_url, "http://127.0.0.1:5173");
        assert_eq!(config.browser.kind, Browser::Firefox);
        assert_eq!(config.storage.auth, "sb-prod-auth-token");
        assert_eq!(config.storage.tutorial, "tutorial_seen");
        assert_eq!(config.locate.candidate_timeout_ms, 3_000);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/jungle.toml");
        let mut config = HarnessConfig::default();
        config.flow.settle_ms = 0;
        config.save(&path).unwrap();
        assert_eq!(HarnessConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let mut config = HarnessConfig::default();
        config.target.base_url = "localhost:3000".to_string();
        assert!(matches!(config.validate(), Err(E2eError::Config(_))));
    }
}
