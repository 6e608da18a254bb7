//! Jungle Gym verification harness
//!
//! Drives a headless browser through scripted user journeys of the Panda
//! Jungle Gym web app and saves screenshots at checkpoints and on failure:
//! - Injects mock profile, auth and tutorial state into local storage
//! - Gives every scenario its own browser context, always torn down
//! - Locates elements through ordered fallback strategies
//! - Runs declarative scenarios (Rust builders or YAML files)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ScenarioRunner                           │
//! │    ├── run_all(scenarios) -> RunSummary                     │
//! │    ├── run_matrix(scenario, viewports)                      │
//! │    └── write_manifest(summary)                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SessionManager          one context + page per scenario    │
//! │  FlowRunner              steps in order, halt on failure    │
//! │    ├── MockStateInjector local-storage writes               │
//! │    ├── Locator           text < role < label < css          │
//! │    └── DiagnosticCapture checkpoint / failure screenshots   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserDriver                                              │
//! │    ├── PlaywrightDriver  node bridge, JSON lines            │
//! │    └── FixtureDriver     in-process app model               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod flow;
pub mod locate;
pub mod mock;
pub mod runner;
pub mod scenarios;
pub mod server;
pub mod session;
pub mod spec;

pub use capture::{DiagnosticArtifact, DiagnosticCapture};
pub use config::HarnessConfig;
pub use driver::{BrowserDriver, FixtureDriver, PlaywrightDriver};
pub use error::{E2eError, E2eResult};
pub use flow::{FlowRunner, ScenarioReport};
pub use locate::Locator;
pub use mock::{MockProfile, MockState, MockStateInjector};
pub use runner::{RunSummary, ScenarioOutcome, ScenarioRunner};
pub use session::{Session, SessionManager};
pub use spec::{LocatorSpec, Scenario, ScenarioStep, ViewportSpec};
