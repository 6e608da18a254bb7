//! Scenario runner: sessions, flow execution and the run manifest

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::capture::DiagnosticArtifact;
use crate::config::HarnessConfig;
use crate::driver::BrowserDriver;
use crate::error::{E2eError, E2eResult, SessionError};
use crate::flow::{FlowRunner, ScenarioReport};
use crate::mock::StorageWrites;
use crate::session::SessionManager;
use crate::spec::{Scenario, ViewportSpec};

/// Time past the scenario limit allowed for the failure capture before the
/// session is torn down regardless
const CAPTURE_GRACE: Duration = Duration::from_secs(30);

/// Result of running one scenario on one viewport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub viewport: ViewportSpec,
    pub success: bool,
    pub duration_ms: u64,
    pub failed_step: Option<usize>,
    pub error: Option<String>,
    pub artifacts: Vec<DiagnosticArtifact>,
    /// The browser could not be started at all
    #[serde(skip)]
    launch_failed: bool,
}

impl ScenarioOutcome {
    fn from_result(name: &str, viewport: ViewportSpec, duration_ms: u64, result: &E2eResult<ScenarioReport>) -> Self {
        match result {
            Ok(report) => Self {
                name: name.to_string(),
                viewport,
                success: true,
                duration_ms,
                failed_step: None,
                error: None,
                artifacts: report.artifacts.clone(),
                launch_failed: false,
            },
            Err(e) => Self {
                name: name.to_string(),
                viewport,
                success: false,
                duration_ms,
                failed_step: e.report().and_then(|r| r.failed_step()).map(|s| s.index),
                error: Some(e.to_string()),
                artifacts: e.report().map(|r| r.artifacts.clone()).unwrap_or_default(),
                launch_failed: matches!(e, E2eError::Session(SessionError::Launch(_))),
            },
        }
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioOutcome>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    fn from_outcomes(started_at: DateTime<Utc>, duration_ms: u64, results: Vec<ScenarioOutcome>) -> Self {
        let passed = results.iter().filter(|r| r.success).count();
        Self {
            started_at,
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms,
            results,
        }
    }
}

/// Runs scenarios, each in its own session
pub struct ScenarioRunner {
    sessions: SessionManager,
    flow: FlowRunner,
    default_timeout: Option<Duration>,
    artifacts_dir: PathBuf,
}

impl ScenarioRunner {
    pub fn new(config: &HarnessConfig, driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            sessions: SessionManager::with_keep_browser(driver, config.browser.keep_alive),
            flow: config.flow_runner(),
            default_timeout: (config.flow.scenario_timeout_ms > 0)
                .then(|| Duration::from_millis(config.flow.scenario_timeout_ms)),
            artifacts_dir: config.artifacts.dir.clone(),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run a scenario on its own viewport in a fresh session
    pub async fn run_scenario(&self, scenario: &Scenario) -> E2eResult<ScenarioReport> {
        let preload = match scenario.preload_state() {
            Some(mock) => self.flow.injector().writes(mock)?,
            None => StorageWrites::new(),
        };
        let limit = scenario.timeout_ms.map(Duration::from_millis).or(self.default_timeout);
        let flow = &self.flow;

        let hard_limit = limit.map(|l| l + CAPTURE_GRACE);

        self.sessions
            .scoped(&scenario.name, scenario.viewport, &preload, hard_limit, |session| async move {
                flow.run_within(&session, scenario, limit).await.map_err(E2eError::from)
            })
            .await
    }

    /// Run a scenario on one viewport; artifacts are named after the viewport
    pub async fn run_on(&self, scenario: &Scenario, viewport: ViewportSpec) -> E2eResult<ScenarioReport> {
        self.run_scenario(&scenario.for_viewport(viewport)).await
    }

    /// Run a scenario on several viewports at once, each in its own context
    pub async fn run_matrix(&self, scenario: &Scenario, viewports: &[ViewportSpec]) -> Vec<ScenarioOutcome> {
        info!("Running '{}' across {} viewports", scenario.name, viewports.len());

        let runs = viewports.iter().map(|viewport| async move {
            let variant = scenario.for_viewport(*viewport);
            let start = Instant::now();
            let result = self.run_scenario(&variant).await;
            ScenarioOutcome::from_result(&variant.name, *viewport, start.elapsed().as_millis() as u64, &result)
        });
        join_all(runs).await
    }

    /// Run a scenario on its declared viewports
    pub async fn run_expanded(&self, scenario: &Scenario) -> Vec<ScenarioOutcome> {
        if !scenario.matrix.is_empty() {
            return self.run_matrix(scenario, &scenario.matrix).await;
        }
        let start = Instant::now();
        let result = self.run_scenario(scenario).await;
        vec![ScenarioOutcome::from_result(
            &scenario.name,
            scenario.viewport,
            start.elapsed().as_millis() as u64,
            &result,
        )]
    }

    /// Run scenarios one after another. Scenario failures are recorded;
    /// a browser that cannot be started aborts the run.
    pub async fn run_all(&self, scenarios: &[Scenario]) -> E2eResult<RunSummary> {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut results = Vec::new();

        info!("Running {} scenario(s)...", scenarios.len());

        for scenario in scenarios {
            for outcome in self.run_expanded(scenario).await {
                if outcome.success {
                    info!("✓ {} ({} ms)", outcome.name, outcome.duration_ms);
                } else {
                    error!(
                        "✗ {} - {}",
                        outcome.name,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
                results.push(outcome);
            }

            if let Some(fatal) = results.iter().find(|r| r.launch_failed) {
                return Err(E2eError::Aborted(fatal.error.clone().unwrap_or_default()));
            }
        }

        let summary = RunSummary::from_outcomes(started_at, start.elapsed().as_millis() as u64, results);
        info!(
            "Results: {} passed, {} failed ({} ms)",
            summary.passed, summary.failed, summary.duration_ms
        );
        Ok(summary)
    }

    /// Write the run manifest as JSON into the artifact directory
    pub fn write_manifest(&self, summary: &RunSummary) -> E2eResult<PathBuf> {
        write_manifest(&self.artifacts_dir, summary)
    }

    /// Stop the browser
    pub async fn shutdown(&self) -> E2eResult<()> {
        self.sessions.shutdown().await?;
        Ok(())
    }
}

pub fn write_manifest(dir: &Path, summary: &RunSummary) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join("manifest.json");
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json)?;

    info!("Manifest written to: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fixture::{FixtureApp, FixtureNode, FixturePage};
    use crate::driver::FixtureDriver;
    use crate::spec::LocatorSpec;
    use crate::spec::ScenarioStep;

    /// Greets whoever is in the boot profile
    struct Greeter;

    impl FixtureApp for Greeter {
        fn render(&self, page: &FixturePage) -> Vec<FixtureNode> {
            let who = page
                .boot
                .get("current_user_profile")
                .and_then(|p| serde_json::from_str::<serde_json::Value>(p).ok())
                .and_then(|v| v["displayName"].as_str().map(str::to_string))
                .unwrap_or_else(|| "guest".to_string());
            vec![FixtureNode::new("greeting").text(format!("Hi, {}!", who))]
        }
    }

    fn config(dir: &Path) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.target.base_url = "http://app.test".to_string();
        config.artifacts.dir = dir.to_path_buf();
        config.flow.settle_ms = 0;
        config.locate.candidate_timeout_ms = 100;
        config.locate.poll_interval_ms = 10;
        config.flow.default_wait_ms = 100;
        config
    }

    fn greets(name: &str) -> Scenario {
        Scenario::new(format!("greets-{}", name.to_lowercase()))
            .mock(crate::mock::MockState::signed_in(crate::mock::MockProfile::test_user(name)))
            .step(ScenarioStep::navigate("/"))
            .step(ScenarioStep::wait_visible(
                LocatorSpec::new("greeting").text(format!("Hi, {}!", name)),
            ))
            .step(ScenarioStep::screenshot("home"))
    }

    #[tokio::test]
    async fn test_run_all_records_failures_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FixtureDriver::new(Greeter));
        let runner = ScenarioRunner::new(&config(dir.path()), driver.clone());

        let broken = Scenario::new("broken")
            .step(ScenarioStep::navigate("/"))
            .step(ScenarioStep::wait_visible(LocatorSpec::new("missing").text("Nope")));

        let summary = runner.run_all(&[broken, greets("Ada")]).await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.success());

        let failed = &summary.results[0];
        assert_eq!(failed.failed_step, Some(1));
        assert_eq!(failed.artifacts.len(), 1);

        runner.shutdown().await.unwrap();
        assert_eq!(driver.stats().contexts_closed, 2);
        assert!(!driver.is_running());
    }

    #[tokio::test]
    async fn test_matrix_runs_each_viewport_in_own_context() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FixtureDriver::new(Greeter));
        let runner = ScenarioRunner::new(&config(dir.path()), driver.clone());

        let scenario = greets("Ada").across(&[ViewportSpec::MOBILE, ViewportSpec::DESKTOP]);
        let outcomes = runner.run_expanded(&scenario).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(outcomes[0].name, "greets-ada-mobile");
        assert_eq!(outcomes[1].name, "greets-ada-desktop");
        assert_ne!(outcomes[0].artifacts[0].path, outcomes[1].artifacts[0].path);
        assert_eq!(driver.stats().contexts_opened, 2);
        assert_eq!(runner.sessions().live_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_launch_failure_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FixtureDriver::new(Greeter));
        driver.fail_launch(true);
        let runner = ScenarioRunner::new(&config(dir.path()), driver);

        let err = runner.run_all(&[greets("Ada"), greets("Bob")]).await.unwrap_err();
        assert!(matches!(err, E2eError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_manifest_written() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FixtureDriver::new(Greeter));
        let runner = ScenarioRunner::new(&config(dir.path()), driver);

        let summary = runner.run_all(&[greets("Ada")]).await.unwrap();
        let path = runner.write_manifest(&summary).unwrap();
        assert_eq!(path, dir.path().join("manifest.json"));

        let parsed: RunSummary = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.total, 1);
        assert_eq!(parsed.results[0].name, "greets-ada");
    }
}
