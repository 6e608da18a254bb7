//! Executes scenario steps in order against a session

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::capture::{DiagnosticArtifact, DiagnosticCapture};
use crate::driver::BrowserDriver;
use crate::error::{ActionError, InjectionError, ScenarioFailure, StepError};
use crate::locate::{ElementHandle, Locator};
use crate::mock::{MockStateInjector, StorageWrites};
use crate::session::Session;
use crate::spec::{Expectation, LocatorSpec, Scenario, ScenarioStep, ViewportSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub action: String,
    pub state: StepState,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Outcome of one scenario run, complete or partial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub viewport: ViewportSpec,
    pub state: ScenarioState,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
    pub artifacts: Vec<DiagnosticArtifact>,
    pub error: Option<String>,
}

impl ScenarioReport {
    fn start(scenario: &Scenario, viewport: ViewportSpec) -> Self {
        Self {
            scenario: scenario.name.clone(),
            viewport,
            state: ScenarioState::Running,
            started_at: Utc::now(),
            duration_ms: 0,
            steps: scenario
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| StepRecord {
                    index,
                    action: step.name(),
                    state: StepState::Pending,
                    duration_ms: 0,
                    error: None,
                })
                .collect(),
            artifacts: Vec::new(),
            error: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.state == ScenarioState::Completed
    }

    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.state == StepState::Failed)
    }
}

/// Timing knobs for step execution
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub base_url: String,
    /// Pause after each click/fill/select
    pub action_settle: Duration,
    /// Upper bound for explicit settle steps
    pub max_settle: Duration,
    pub navigation_timeout: Duration,
    /// Timeout for wait steps that declare none
    pub default_wait: Duration,
    /// Bound on the total time spent locating elements in one scenario
    pub locate_ceiling: Option<Duration>,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            action_settle: Duration::from_millis(500),
            max_settle: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(30),
            default_wait: Duration::from_secs(10),
            locate_ceiling: Some(Duration::from_secs(60)),
        }
    }
}

struct StepContext<'s> {
    session: &'s Session,
    scenario: &'s Scenario,
    index: usize,
    /// Locate time left before the ceiling; `None` is unbounded
    locate_budget: Option<Duration>,
    artifacts: Vec<DiagnosticArtifact>,
}

impl StepContext<'_> {
    fn remaining(&self) -> Option<Duration> {
        self.locate_budget
    }

    fn charge(&mut self, spent: Duration) {
        if let Some(budget) = self.locate_budget.as_mut() {
            *budget = budget.saturating_sub(spent);
        }
    }
}

/// Runs scenarios one step at a time
#[derive(Debug, Clone)]
pub struct FlowRunner {
    locator: Locator,
    capture: DiagnosticCapture,
    injector: MockStateInjector,
    settings: FlowSettings,
}

impl FlowRunner {
    pub fn new(locator: Locator, capture: DiagnosticCapture, injector: MockStateInjector, settings: FlowSettings) -> Self {
        Self {
            locator,
            capture,
            injector,
            settings,
        }
    }

    pub fn injector(&self) -> &MockStateInjector {
        &self.injector
    }

    pub fn capture(&self) -> &DiagnosticCapture {
        &self.capture
    }

    /// Absolute URL for a scenario path
    pub fn url_for(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("about:") {
            url.to_string()
        } else {
            format!(
                "{}/{}",
                self.settings.base_url.trim_end_matches('/'),
                url.trim_start_matches('/')
            )
        }
    }

    /// Execute every step in order. The first failure stops the scenario,
    /// captures one failure screenshot and is returned with the partial
    /// report.
    pub async fn run(&self, session: &Session, scenario: &Scenario) -> Result<ScenarioReport, ScenarioFailure> {
        self.run_within(session, scenario, None).await
    }

    /// Like [`FlowRunner::run`], but a step still running when `limit`
    /// expires is cancelled and fails the scenario, with the failure
    /// capture taken while the page is still open.
    pub async fn run_within(
        &self,
        session: &Session,
        scenario: &Scenario,
        limit: Option<Duration>,
    ) -> Result<ScenarioReport, ScenarioFailure> {
        let started = Instant::now();
        let deadline = limit.map(|l| started + l);
        let mut report = ScenarioReport::start(scenario, session.viewport());
        let mut ctx = StepContext {
            session,
            scenario,
            index: 0,
            locate_budget: self.settings.locate_ceiling,
            artifacts: Vec::new(),
        };

        info!("Running scenario '{}' ({} steps, {})", scenario.name, scenario.steps.len(), session.viewport());

        for (index, step) in scenario.steps.iter().enumerate() {
            ctx.index = index;
            report.steps[index].state = StepState::Running;
            debug!("[{}] step {}: {}", scenario.name, index + 1, report.steps[index].action);

            let step_start = Instant::now();
            let result = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.execute(&mut ctx, step))
                    .await
                    .unwrap_or_else(|_| {
                        Err(StepError::ScenarioLimit {
                            limit_ms: limit.map(|l| l.as_millis() as u64).unwrap_or_default(),
                        })
                    }),
                None => self.execute(&mut ctx, step).await,
            };
            report.steps[index].duration_ms = step_start.elapsed().as_millis() as u64;
            report.artifacts.append(&mut ctx.artifacts);

            if let Err(source) = result {
                error!("[{}] step {} failed: {}", scenario.name, index + 1, source);
                report.steps[index].state = StepState::Failed;
                report.steps[index].error = Some(source.to_string());
                report.state = ScenarioState::Failed;

                if let Some(artifact) = self.capture.on_failure(session, &scenario.name, index).await {
                    report.artifacts.push(artifact);
                }
                report.duration_ms = started.elapsed().as_millis() as u64;

                let mut failure = ScenarioFailure {
                    scenario: scenario.name.clone(),
                    step_index: index,
                    action: report.steps[index].action.clone(),
                    source,
                    report,
                };
                failure.report.error = Some(failure.to_string());
                return Err(failure);
            }

            report.steps[index].state = StepState::Completed;
        }

        report.state = ScenarioState::Completed;
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!("Scenario '{}' completed in {} ms", scenario.name, report.duration_ms);
        Ok(report)
    }

    fn execute<'a, 's: 'a>(
        &'a self,
        ctx: &'a mut StepContext<'s>,
        step: &'a ScenarioStep,
    ) -> BoxFuture<'a, Result<(), StepError>> {
        async move {
            let session = ctx.session;
            let driver = session.driver();
            let page = session.page();

            match step {
                ScenarioStep::Navigate { url, wait_until } => {
                    let url = self.url_for(url);
                    driver
                        .goto(page, &url, *wait_until, self.settings.navigation_timeout.as_millis() as u64)
                        .await
                        .map_err(|e| action_failed(format!("navigate to {}", url), e))?;
                }

                ScenarioStep::Reload { wait_until } => {
                    driver
                        .reload(page, *wait_until, self.settings.navigation_timeout.as_millis() as u64)
                        .await
                        .map_err(|e| action_failed("reload", e))?;
                }

                ScenarioStep::SetStorage { key, value } => {
                    self.injector
                        .apply_post_load(session, &StorageWrites::single(key, value))
                        .await?;
                }

                ScenarioStep::ApplyMock => {
                    let mock = ctx.scenario.mock.as_ref().ok_or(InjectionError::NoMockState)?;
                    let writes = self.injector.writes(mock)?;
                    self.injector.apply_post_load(session, &writes).await?;
                }

                ScenarioStep::Click { target, expect } => {
                    let handle = self.locate(ctx, target, None).await?;
                    driver
                        .click(page, &handle.query)
                        .await
                        .map_err(|e| action_failed(format!("click '{}'", target.name), e))?;
                    self.after_action(ctx, &format!("click '{}'", target.name), expect.as_ref())
                        .await?;
                }

                ScenarioStep::Fill { target, value, expect } => {
                    let handle = self.locate(ctx, target, None).await?;
                    driver
                        .fill(page, &handle.query, value)
                        .await
                        .map_err(|e| action_failed(format!("fill '{}'", target.name), e))?;
                    self.after_action(ctx, &format!("fill '{}'", target.name), expect.as_ref())
                        .await?;
                }

                ScenarioStep::Select { target, option, expect } => {
                    let handle = self.locate(ctx, target, None).await?;
                    driver
                        .select_option(page, &handle.query, option)
                        .await
                        .map_err(|e| action_failed(format!("select {} in '{}'", option, target.name), e))?;
                    self.after_action(ctx, &format!("select '{}'", target.name), expect.as_ref())
                        .await?;
                }

                ScenarioStep::ClickAt { x, y } => {
                    driver
                        .mouse_click(page, *x, *y)
                        .await
                        .map_err(|e| action_failed(format!("click at ({}, {})", x, y), e))?;
                }

                ScenarioStep::WaitVisible { target, timeout_ms } => {
                    let wait = timeout_ms.map(Duration::from_millis).unwrap_or(self.settings.default_wait);
                    self.locate(ctx, target, Some(wait)).await?;
                }

                ScenarioStep::WaitHidden { target, timeout_ms } => {
                    let wait = timeout_ms.map(Duration::from_millis).unwrap_or(self.settings.default_wait);
                    let start = Instant::now();
                    let hidden = self.locator.wait_hidden(session, target, wait).await;
                    ctx.charge(start.elapsed());
                    hidden.map_err(|waited_ms| StepError::Timeout {
                        what: format!("'{}' to disappear", target.name),
                        waited_ms,
                    })?;
                }

                ScenarioStep::Settle { ms } => {
                    let requested = Duration::from_millis(*ms);
                    if requested > self.settings.max_settle {
                        warn!(
                            "Settle of {} ms capped to {} ms",
                            ms,
                            self.settings.max_settle.as_millis()
                        );
                    }
                    tokio::time::sleep(requested.min(self.settings.max_settle)).await;
                }

                ScenarioStep::Screenshot { label, full_page } => {
                    let artifact = self
                        .capture
                        .checkpoint(session, &ctx.scenario.name, label, ctx.index, *full_page)
                        .await?;
                    ctx.artifacts.push(artifact);
                }

                ScenarioStep::FirstOf { alternatives } if alternatives.is_empty() => {
                    return Err(ActionError::Failed {
                        action: "first_of".to_string(),
                        reason: "no alternatives declared".to_string(),
                    }
                    .into());
                }

                ScenarioStep::FirstOf { alternatives } => {
                    let mut last = None;
                    for (n, alternative) in alternatives.iter().enumerate() {
                        match self.execute_all(ctx, alternative).await {
                            Ok(()) => {
                                debug!("Alternative {} of {} succeeded", n + 1, alternatives.len());
                                return Ok(());
                            }
                            Err(e) => {
                                debug!("Alternative {} of {} failed: {}", n + 1, alternatives.len(), e);
                                last = Some(e);
                            }
                        }
                    }
                    if let Some(last) = last {
                        return Err(StepError::Alternatives {
                            count: alternatives.len(),
                            last: Box::new(last),
                        });
                    }
                }

                ScenarioStep::Log { message } => {
                    info!("[{}] {}", ctx.scenario.name, message);
                }
            }

            Ok(())
        }
        .boxed()
    }

    async fn execute_all<'s>(&self, ctx: &mut StepContext<'s>, steps: &[ScenarioStep]) -> Result<(), StepError> {
        for step in steps {
            self.execute(ctx, step).await?;
        }
        Ok(())
    }

    async fn locate(
        &self,
        ctx: &mut StepContext<'_>,
        target: &LocatorSpec,
        default_timeout: Option<Duration>,
    ) -> Result<ElementHandle, StepError> {
        let start = Instant::now();
        let resolved = self
            .locator
            .resolve_with(ctx.session, target, default_timeout, ctx.remaining())
            .await;
        ctx.charge(start.elapsed());
        Ok(resolved?)
    }

    async fn after_action(
        &self,
        ctx: &mut StepContext<'_>,
        action: &str,
        expect: Option<&Expectation>,
    ) -> Result<(), StepError> {
        if !self.settings.action_settle.is_zero() {
            tokio::time::sleep(self.settings.action_settle.min(self.settings.max_settle)).await;
        }

        let Some(expect) = expect else {
            return Ok(());
        };
        let wait = expect
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.locator.default_timeout());

        if let Some(visible) = &expect.visible {
            let start = Instant::now();
            let resolved = self
                .locator
                .resolve_with(ctx.session, visible, Some(wait), ctx.remaining())
                .await;
            ctx.charge(start.elapsed());
            resolved.map_err(|e| ActionError::PostCondition {
                action: action.to_string(),
                expected: format!("'{}' visible ({})", visible.name, e),
            })?;
        }
        if let Some(hidden) = &expect.hidden {
            let start = Instant::now();
            let gone = self.locator.wait_hidden(ctx.session, hidden, wait).await;
            ctx.charge(start.elapsed());
            gone.map_err(|_| ActionError::PostCondition {
                action: action.to_string(),
                expected: format!("'{}' hidden", hidden.name),
            })?;
        }
        Ok(())
    }
}

fn action_failed(action: impl Into<String>, e: crate::error::DriverError) -> ActionError {
    ActionError::Failed {
        action: action.into(),
        reason: e.to_string(),
    }
}
