//! CLI Commands

pub mod list;
pub mod probe;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use jungle_e2e::{scenarios, E2eError, HarnessConfig, Scenario};

use crate::output::OutputFormat;

const DEFAULT_SCENARIO_DIR: &str = "scenarios";

/// Settings shared by every command
pub struct Context {
    pub config: HarnessConfig,
    pub scenario_dir: Option<PathBuf>,
    pub format: OutputFormat,
}

impl Context {
    pub fn load(
        config_path: &Path,
        base_url: Option<String>,
        artifacts: Option<PathBuf>,
        scenario_dir: Option<PathBuf>,
        headed: bool,
        format: OutputFormat,
    ) -> Result<Self> {
        let mut config = HarnessConfig::load(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;

        if let Some(url) = base_url {
            config.target.base_url = url;
        }
        if let Some(dir) = artifacts {
            config.artifacts.dir = dir;
        }
        if headed {
            config.browser.headless = false;
        }
        config.validate()?;

        let scenario_dir = scenario_dir.or_else(|| {
            let default = PathBuf::from(DEFAULT_SCENARIO_DIR);
            default.is_dir().then_some(default)
        });

        Ok(Self {
            config,
            scenario_dir,
            format,
        })
    }

    /// Built-in scenarios followed by file scenarios; a file scenario
    /// replaces a built-in one of the same name
    pub fn scenarios(&self) -> Result<Vec<Scenario>> {
        let mut all = scenarios::catalog();
        if let Some(dir) = &self.scenario_dir {
            for scenario in Scenario::load_all(dir)? {
                match all.iter_mut().find(|s| s.name == scenario.name) {
                    Some(existing) => *existing = scenario,
                    None => all.push(scenario),
                }
            }
        }
        Ok(all)
    }

    /// Resolve a selection of scenarios by name and tag
    pub fn select(&self, names: &[String], all: bool, tag: Option<&str>) -> Result<Vec<Scenario>> {
        let available = self.scenarios()?;

        if all || (names.is_empty() && tag.is_some()) {
            return Ok(match tag {
                Some(tag) => Scenario::filter_by_tag(&available, tag).into_iter().cloned().collect(),
                None => available,
            });
        }
        if names.is_empty() {
            bail!("no scenarios selected; pass names, --tag or --all");
        }

        names
            .iter()
            .map(|name| {
                available
                    .iter()
                    .find(|s| &s.name == name)
                    .cloned()
                    .ok_or_else(|| E2eError::UnknownScenario(name.clone()).into())
            })
            .collect()
    }
}
