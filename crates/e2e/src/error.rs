//! Error types for the verification harness

use std::fmt;

use thiserror::Error;

use crate::flow::ScenarioReport;
use crate::locate::CandidateOutcome;
use crate::spec::Candidate;

/// Failures reported by a browser driver
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("browser is not running")]
    NotRunning,

    #[error("browser connection closed")]
    Closed,

    #[error("browser request timed out after {0} ms")]
    Timeout(u64),

    #[error("browser reported: {0}")]
    Remote(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Browser process and context lifecycle failures
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to launch browser: {0}")]
    Launch(DriverError),

    #[error("failed to create browser context: {0}")]
    Context(DriverError),

    #[error("failed to open page: {0}")]
    Page(DriverError),

    #[error("failed to close browser context: {0}")]
    Release(DriverError),

    #[error("failed to stop browser: {0}")]
    Shutdown(DriverError),
}

/// Mock state could not be applied to a context
#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("browser context is no longer available")]
    ContextUnavailable,

    #[error("scenario declares no mock state to apply")]
    NoMockState,

    #[error("failed to serialize mock state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("storage write failed: {0}")]
    Evaluate(DriverError),
}

/// A single candidate that did not resolve, kept for diagnosis
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub candidate: Candidate,
    pub outcome: CandidateOutcome,
}

/// No candidate in a locator chain resolved to exactly one visible element
#[derive(Debug, Clone)]
pub struct LocateError {
    pub target: String,
    pub attempts: Vec<FailedAttempt>,
}

impl fmt::Display for LocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not locate '{}'", self.target)?;
        if self.attempts.is_empty() {
            return write!(f, " (no candidates)");
        }
        write!(f, "; tried:")?;
        for (i, attempt) in self.attempts.iter().enumerate() {
            write!(f, "\n    {}. {} -> {}", i + 1, attempt.candidate, attempt.outcome)?;
        }
        Ok(())
    }
}

impl std::error::Error for LocateError {}

/// An action ran (or was attempted) but did not have the expected effect
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("{action} failed: {reason}")]
    Failed { action: String, reason: String },

    #[error("{action} did not produce expected state: {expected}")]
    PostCondition { action: String, expected: String },
}

/// Screenshot could not be taken or stored
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("screenshot failed: {0}")]
    Screenshot(DriverError),

    #[error("screenshot is not a valid image: {0}")]
    Encoding(#[from] image::ImageError),

    #[error("failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single scenario step failed
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Injection(#[from] InjectionError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("timed out after {waited_ms} ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    #[error("all {count} alternatives failed; last: {last}")]
    Alternatives { count: usize, last: Box<StepError> },

    #[error("scenario exceeded its {limit_ms} ms limit")]
    ScenarioLimit { limit_ms: u64 },
}

/// The first failing step of a scenario, with the partial report
#[derive(Debug)]
pub struct ScenarioFailure {
    pub scenario: String,
    pub step_index: usize,
    pub action: String,
    pub source: StepError,
    pub report: ScenarioReport,
}

impl fmt::Display for ScenarioFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scenario '{}' failed at step {} ({}): {}",
            self.scenario,
            self.step_index + 1,
            self.action,
            self.source
        )
    }
}

impl std::error::Error for ScenarioFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Error, Debug)]
pub enum E2eError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Injection(#[from] InjectionError),

    #[error(transparent)]
    Scenario(Box<ScenarioFailure>),

    #[error("scenario '{scenario}' exceeded its {limit_ms} ms limit")]
    ScenarioTimeout { scenario: String, limit_ms: u64 },

    #[error("scenario not found: {0}")]
    UnknownScenario(String),

    #[error("Scenario file parse error: {0}")]
    SpecParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Run aborted: {0}")]
    Aborted(String),

    #[error("Target app failed to start: {0}")]
    TargetStartup(String),

    #[error("Target app at {url} not reachable after {attempts} attempts")]
    TargetUnreachable { url: String, attempts: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<ScenarioFailure> for E2eError {
    fn from(failure: ScenarioFailure) -> Self {
        E2eError::Scenario(Box::new(failure))
    }
}

impl E2eError {
    /// The partial report of a failed scenario, if this error carries one
    pub fn report(&self) -> Option<&ScenarioReport> {
        match self {
            E2eError::Scenario(failure) => Some(&failure.report),
            _ => None,
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
