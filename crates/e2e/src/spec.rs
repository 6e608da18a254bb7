//! Declarative scenario definitions
//!
//! Scenarios are built in code (see [`crate::scenarios`]) or parsed from YAML
//! files. Both produce the same [`Scenario`] value.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::mock::MockState;

/// A complete verification scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name, also used to prefix artifact file names
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport for the scenario's session
    #[serde(default)]
    pub viewport: ViewportSpec,

    /// Extra viewports to run the same flow on, each in its own session
    #[serde(default)]
    pub matrix: Vec<ViewportSpec>,

    /// Mocked local-storage state for the scenario's context
    #[serde(default)]
    pub mock: Option<MockState>,

    /// When the mock state is written
    #[serde(default)]
    pub injection: Injection,

    /// Upper bound for the whole scenario, teardown excluded
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Steps to execute in order
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            viewport: ViewportSpec::default(),
            matrix: Vec::new(),
            mock: None,
            injection: Injection::default(),
            timeout_ms: None,
            steps: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn viewport(mut self, viewport: ViewportSpec) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn across(mut self, viewports: &[ViewportSpec]) -> Self {
        self.matrix = viewports.to_vec();
        self
    }

    pub fn mock(mut self, mock: MockState) -> Self {
        self.mock = Some(mock);
        self
    }

    /// Write the mock state from a step instead of before the first load
    pub fn inject_after_load(mut self) -> Self {
        self.injection = Injection::PostLoad;
        self
    }

    /// Storage registered on the context before any page script, if any
    pub fn preload_state(&self) -> Option<&MockState> {
        match self.injection {
            Injection::PreLoad => self.mock.as_ref(),
            Injection::PostLoad => None,
        }
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout_ms = Some(limit.as_millis() as u64);
        self
    }

    pub fn step(mut self, step: ScenarioStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Copy of this scenario pinned to one viewport, named after it so its
    /// artifacts do not collide with the other viewports'
    pub fn for_viewport(&self, viewport: ViewportSpec) -> Scenario {
        let mut scenario = self.clone();
        scenario.name = format!("{}-{}", self.name, viewport.label());
        scenario.viewport = viewport;
        scenario.matrix.clear();
        scenario
    }

    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory, recursively
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("scenario name is empty".to_string()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            step.validate()
                .map_err(|reason| E2eError::SpecParse(format!("{} step {}: {}", self.name, i + 1, reason)))?;
        }
        Ok(())
    }
}

/// Timing of mock state injection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Injection {
    /// Registered on the context and replayed on every navigation
    #[default]
    PreLoad,
    /// Only written by `apply_mock` steps; the app sees it after a reload
    PostLoad,
}

/// Width × height of the browser viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
}

impl ViewportSpec {
    pub const MOBILE: ViewportSpec = ViewportSpec { width: 375, height: 812 };
    pub const DESKTOP: ViewportSpec = ViewportSpec { width: 1280, height: 800 };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Short name used in artifact names
    pub fn label(&self) -> String {
        match *self {
            Self::MOBILE => "mobile".to_string(),
            Self::DESKTOP => "desktop".to_string(),
            ViewportSpec { width, height } => format!("{}x{}", width, height),
        }
    }
}

impl Default for ViewportSpec {
    fn default() -> Self {
        Self::DESKTOP
    }
}

impl fmt::Display for ViewportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ViewportSpec {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "mobile" => return Ok(Self::MOBILE),
            "desktop" => return Ok(Self::DESKTOP),
            _ => {}
        }

        let invalid = || E2eError::Config(format!("invalid viewport '{}', expected mobile, desktop or WIDTHxHEIGHT", s));
        let (width, height) = normalized.split_once('x').ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

/// How a candidate finds elements, in fixed priority order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Strategy {
    /// Visible text; exact unless `contains` is set
    Text {
        text: String,
        #[serde(default)]
        contains: bool,
    },

    /// Accessible role, optionally with an accessible name
    Role {
        role: String,
        #[serde(default)]
        name: Option<String>,
    },

    /// aria-label or associated label text
    Label { label: String },

    /// Structural CSS selector
    Css { selector: String },
}

impl Strategy {
    /// Lower is tried first
    pub fn priority(&self) -> u8 {
        match self {
            Strategy::Text { .. } => 0,
            Strategy::Role { .. } => 1,
            Strategy::Label { .. } => 2,
            Strategy::Css { .. } => 3,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Text { text, contains: false } => write!(f, "text={:?}", text),
            Strategy::Text { text, contains: true } => write!(f, "text~={:?}", text),
            Strategy::Role { role, name: Some(name) } => write!(f, "role={}[name={:?}]", role, name),
            Strategy::Role { role, name: None } => write!(f, "role={}", role),
            Strategy::Label { label } => write!(f, "label={:?}", label),
            Strategy::Css { selector } => write!(f, "css={}", selector),
        }
    }
}

/// One way of finding a logical element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub strategy: Strategy,

    /// Own timeout; falls back to the locator default
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Deliberate pick among several visible matches (negative counts from
    /// the end). Without it more than one match is ambiguous.
    #[serde(default)]
    pub nth: Option<i32>,
}

impl Candidate {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy, timeout_ms: None, nth: None }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.strategy)?;
        if let Some(nth) = self.nth {
            write!(f, " >> nth={}", nth)?;
        }
        Ok(())
    }
}

/// Ordered candidates for finding one logical UI element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorSpec {
    /// Logical name used in logs and errors
    pub name: String,
    pub candidates: Vec<Candidate>,
}

impl LocatorSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), candidates: Vec::new() }
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.with(Strategy::Text { text: text.into(), contains: false })
    }

    pub fn text_contains(self, text: impl Into<String>) -> Self {
        self.with(Strategy::Text { text: text.into(), contains: true })
    }

    pub fn role(self, role: impl Into<String>, name: impl Into<String>) -> Self {
        self.with(Strategy::Role { role: role.into(), name: Some(name.into()) })
    }

    pub fn label(self, label: impl Into<String>) -> Self {
        self.with(Strategy::Label { label: label.into() })
    }

    pub fn css(self, selector: impl Into<String>) -> Self {
        self.with(Strategy::Css { selector: selector.into() })
    }

    pub fn with(mut self, strategy: Strategy) -> Self {
        self.candidates.push(Candidate::new(strategy));
        self
    }

    /// Pick the nth visible match of the last added candidate
    pub fn nth(mut self, nth: i32) -> Self {
        if let Some(last) = self.candidates.last_mut() {
            last.nth = Some(nth);
        }
        self
    }

    /// Timeout for the last added candidate
    pub fn timeout(mut self, timeout: Duration) -> Self {
        if let Some(last) = self.candidates.last_mut() {
            last.timeout_ms = Some(timeout.as_millis() as u64);
        }
        self
    }

    /// Candidates in evaluation order: by strategy priority, declaration
    /// order within the same strategy
    pub fn ordered(&self) -> Vec<&Candidate> {
        let mut ordered: Vec<&Candidate> = self.candidates.iter().collect();
        ordered.sort_by_key(|c| c.strategy.priority());
        ordered
    }
}

impl fmt::Display for LocatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Page load milestone a navigation waits for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Load => "load",
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

/// Option to pick in a `<select>`, by visible label or by value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl SelectOption {
    pub fn label(label: impl Into<String>) -> Self {
        Self { label: Some(label.into()), value: None }
    }

    pub fn value(value: impl Into<String>) -> Self {
        Self { label: None, value: Some(value.into()) }
    }
}

impl fmt::Display for SelectOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.label, &self.value) {
            (Some(label), _) => write!(f, "label={:?}", label),
            (None, Some(value)) => write!(f, "value={:?}", value),
            (None, None) => f.write_str("<none>"),
        }
    }
}

/// Post-condition observed after an action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(default)]
    pub visible: Option<LocatorSpec>,
    #[serde(default)]
    pub hidden: Option<LocatorSpec>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Expectation {
    pub fn visible(target: LocatorSpec) -> Self {
        Self { visible: Some(target), ..Default::default() }
    }

    pub fn hidden(target: LocatorSpec) -> Self {
        Self { hidden: Some(target), ..Default::default() }
    }
}

/// One user-intent action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Load a URL; relative URLs are joined to the base URL
    Navigate {
        url: String,
        #[serde(default)]
        wait_until: LoadState,
    },

    /// Reload the current page
    Reload {
        #[serde(default)]
        wait_until: LoadState,
    },

    /// Write one storage entry into the live page (takes effect on reload)
    SetStorage { key: String, value: String },

    /// Write the scenario's mock state into the live page
    ApplyMock,

    Click {
        target: LocatorSpec,
        #[serde(default)]
        expect: Option<Expectation>,
    },

    Fill {
        target: LocatorSpec,
        value: String,
        #[serde(default)]
        expect: Option<Expectation>,
    },

    Select {
        target: LocatorSpec,
        option: SelectOption,
        #[serde(default)]
        expect: Option<Expectation>,
    },

    /// Mouse click at page coordinates, e.g. outside a popup
    ClickAt { x: f64, y: f64 },

    WaitVisible {
        target: LocatorSpec,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    WaitHidden {
        target: LocatorSpec,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Fixed delay for known animation time; capped by configuration
    Settle { ms: u64 },

    /// Checkpoint screenshot
    Screenshot {
        label: String,
        #[serde(default)]
        full_page: Option<bool>,
    },

    /// Ordered alternatives; the first that completes wins
    FirstOf { alternatives: Vec<Vec<ScenarioStep>> },

    Log { message: String },
}

impl ScenarioStep {
    pub fn navigate(url: impl Into<String>) -> Self {
        ScenarioStep::Navigate { url: url.into(), wait_until: LoadState::Load }
    }

    pub fn click(target: LocatorSpec) -> Self {
        ScenarioStep::Click { target, expect: None }
    }

    pub fn fill(target: LocatorSpec, value: impl Into<String>) -> Self {
        ScenarioStep::Fill { target, value: value.into(), expect: None }
    }

    pub fn select(target: LocatorSpec, option: SelectOption) -> Self {
        ScenarioStep::Select { target, option, expect: None }
    }

    pub fn wait_visible(target: LocatorSpec) -> Self {
        ScenarioStep::WaitVisible { target, timeout_ms: None }
    }

    pub fn wait_visible_for(target: LocatorSpec, timeout: Duration) -> Self {
        ScenarioStep::WaitVisible { target, timeout_ms: Some(timeout.as_millis() as u64) }
    }

    pub fn wait_hidden(target: LocatorSpec) -> Self {
        ScenarioStep::WaitHidden { target, timeout_ms: None }
    }

    pub fn screenshot(label: impl Into<String>) -> Self {
        ScenarioStep::Screenshot { label: label.into(), full_page: None }
    }

    pub fn full_page_screenshot(label: impl Into<String>) -> Self {
        ScenarioStep::Screenshot { label: label.into(), full_page: Some(true) }
    }

    pub fn settle(ms: u64) -> Self {
        ScenarioStep::Settle { ms }
    }

    pub fn first_of(alternatives: Vec<Vec<ScenarioStep>>) -> Self {
        ScenarioStep::FirstOf { alternatives }
    }

    /// Attach a post-condition to an action step; other steps are unchanged
    pub fn expecting(mut self, expectation: Expectation) -> Self {
        match &mut self {
            ScenarioStep::Click { expect, .. }
            | ScenarioStep::Fill { expect, .. }
            | ScenarioStep::Select { expect, .. } => *expect = Some(expectation),
            _ => {}
        }
        self
    }

    /// Short name for logs and reports
    pub fn name(&self) -> String {
        match self {
            ScenarioStep::Navigate { url, .. } => format!("navigate:{}", url),
            ScenarioStep::Reload { .. } => "reload".to_string(),
            ScenarioStep::SetStorage { key, .. } => format!("set_storage:{}", key),
            ScenarioStep::ApplyMock => "apply_mock".to_string(),
            ScenarioStep::Click { target, .. } => format!("click:{}", target),
            ScenarioStep::Fill { target, .. } => format!("fill:{}", target),
            ScenarioStep::Select { target, option, .. } => format!("select:{}:{}", target, option),
            ScenarioStep::ClickAt { x, y } => format!("click_at:{},{}", x, y),
            ScenarioStep::WaitVisible { target, .. } => format!("wait_visible:{}", target),
            ScenarioStep::WaitHidden { target, .. } => format!("wait_hidden:{}", target),
            ScenarioStep::Settle { ms } => format!("settle:{}ms", ms),
            ScenarioStep::Screenshot { label, .. } => format!("screenshot:{}", label),
            ScenarioStep::FirstOf { alternatives } => format!("first_of:{}", alternatives.len()),
            ScenarioStep::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            ScenarioStep::Click { target, .. }
            | ScenarioStep::Fill { target, .. }
            | ScenarioStep::WaitVisible { target, .. }
            | ScenarioStep::WaitHidden { target, .. }
                if target.candidates.is_empty() =>
            {
                Err(format!("locator '{}' has no candidates", target.name))
            }
            ScenarioStep::Select { target, option, .. } => {
                if target.candidates.is_empty() {
                    Err(format!("locator '{}' has no candidates", target.name))
                } else if option.label.is_none() && option.value.is_none() {
                    Err("select option needs a label or a value".to_string())
                } else {
                    Ok(())
                }
            }
            ScenarioStep::FirstOf { alternatives } => {
                if alternatives.is_empty() {
                    return Err("first_of needs at least one alternative".to_string());
                }
                alternatives.iter().flatten().try_for_each(|s| s.validate())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mocked_scenario() {
        let yaml = r#"
name: greeting
description: Greeting shows the injected display name
tags:
  - dashboard
  - smoke
viewport:
  width: 375
  height: 812
mock:
  tutorial_seen: true
  profile:
    id: mock-id
    displayName: TestUser
    email: test@example.com
    avatarId: male
    tribeId: test-tribe
steps:
  - action: navigate
    url: /
  - action: wait_visible
    target:
      name: greeting
      candidates:
        - by: text
          text: "Hi, TestUser!"
          timeout_ms: 10000
        - by: css
          selector: h1
  - action: screenshot
    label: dashboard
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.name, "greeting");
        assert_eq!(scenario.viewport, ViewportSpec::MOBILE);
        assert_eq!(scenario.steps.len(), 3);

        let mock = scenario.mock.unwrap();
        assert_eq!(mock.profile.unwrap().identity.display_name, "TestUser");

        match &scenario.steps[1] {
            ScenarioStep::WaitVisible { target, .. } => {
                assert_eq!(target.candidates.len(), 2);
                assert_eq!(target.candidates[0].timeout_ms, Some(10000));
                assert!(matches!(target.candidates[1].strategy, Strategy::Css { .. }));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_parse_first_of_and_select() {
        let yaml = r#"
name: fallback
steps:
  - action: select
    target:
      name: category
      candidates:
        - by: css
          selector: select
    option:
      label: Wellbeing activities
  - action: first_of
    alternatives:
      - - action: click
          target:
            name: tribe tab
            candidates:
              - by: label
                label: Tribe
      - - action: screenshot
          label: failed_tribe
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.viewport, ViewportSpec::DESKTOP);
        match &scenario.steps[1] {
            ScenarioStep::FirstOf { alternatives } => assert_eq!(alternatives.len(), 2),
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_rejects_select_without_option() {
        let yaml = r#"
name: broken
steps:
  - action: select
    target:
      name: category
      candidates:
        - by: css
          selector: select
    option: {}
"#;
        assert!(Scenario::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_candidates_ordered_by_priority() {
        let spec = LocatorSpec::new("tribe tab")
            .css(".fixed.bottom-6.flex button")
            .nth(1)
            .label("Tribe")
            .text("Tribe")
            .role("button", "Tribe")
            .text_contains("Trib");

        let order: Vec<String> = spec.ordered().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            order,
            vec![
                "text=\"Tribe\"",
                "text~=\"Trib\"",
                "role=button[name=\"Tribe\"]",
                "label=\"Tribe\"",
                "css=.fixed.bottom-6.flex button >> nth=1",
            ]
        );
    }

    #[test]
    fn test_viewport_parsing() {
        assert_eq!("mobile".parse::<ViewportSpec>().unwrap(), ViewportSpec::MOBILE);
        assert_eq!("Desktop".parse::<ViewportSpec>().unwrap(), ViewportSpec::DESKTOP);
        assert_eq!("1920x1080".parse::<ViewportSpec>().unwrap(), ViewportSpec::new(1920, 1080));
        assert!("wide".parse::<ViewportSpec>().is_err());
        assert_eq!(ViewportSpec::new(1920, 1080).label(), "1920x1080");
    }

    #[test]
    fn test_for_viewport_renames() {
        let scenario = Scenario::new("dashboard").across(&[ViewportSpec::MOBILE, ViewportSpec::DESKTOP]);
        let mobile = scenario.for_viewport(ViewportSpec::MOBILE);
        assert_eq!(mobile.name, "dashboard-mobile");
        assert!(mobile.matrix.is_empty());
    }
}
