//! List Command

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use jungle_e2e::Scenario;

use super::Context;
use crate::output::{print_rows, Columns};

#[derive(Args)]
pub struct ListArgs {
    /// Only scenarios with this tag
    #[arg(long)]
    tag: Option<String>,
}

#[derive(Serialize)]
pub struct ScenarioDisplay {
    pub name: String,
    pub viewports: Vec<String>,
    pub steps: usize,
    pub mocked: bool,
    pub tags: Vec<String>,
    pub description: String,
}

impl From<&Scenario> for ScenarioDisplay {
    fn from(scenario: &Scenario) -> Self {
        let viewports = if scenario.matrix.is_empty() {
            vec![scenario.viewport.label()]
        } else {
            scenario.matrix.iter().map(|v| v.label()).collect()
        };

        Self {
            name: scenario.name.clone(),
            viewports,
            steps: scenario.steps.len(),
            mocked: scenario.mock.is_some(),
            tags: scenario.tags.clone(),
            description: scenario.description.clone(),
        }
    }
}

impl Columns for ScenarioDisplay {
    fn headers() -> &'static [&'static str] {
        &["Name", "Viewports", "Steps", "Mock", "Tags", "Description"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.viewports.join(", "),
            self.steps.to_string(),
            if self.mocked { "yes" } else { "-" }.to_string(),
            self.tags.join(", "),
            self.description.clone(),
        ]
    }
}

pub fn execute(args: ListArgs, ctx: &Context) -> Result<()> {
    let scenarios = ctx.scenarios()?;
    let displays: Vec<ScenarioDisplay> = match &args.tag {
        Some(tag) => Scenario::filter_by_tag(&scenarios, tag)
            .into_iter()
            .map(ScenarioDisplay::from)
            .collect(),
        None => scenarios.iter().map(ScenarioDisplay::from).collect(),
    };

    print_rows(&displays, ctx.format, "No scenarios matched.")
}
