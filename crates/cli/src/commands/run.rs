//! Run Command

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::warn;

use jungle_e2e::server::AppServer;
use jungle_e2e::{PlaywrightDriver, RunSummary, Scenario, ScenarioOutcome, ScenarioRunner, ViewportSpec};

use super::Context;
use crate::output::{print_fail, print_pass, print_rows, Columns};

#[derive(Args)]
pub struct RunArgs {
    /// Scenario names
    names: Vec<String>,

    /// Run every available scenario
    #[arg(long)]
    all: bool,

    /// Run scenarios with this tag
    #[arg(long)]
    tag: Option<String>,

    /// Scenario files to run in addition to the selection
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Run each scenario on these viewports (mobile, desktop or WxH)
    #[arg(long = "viewport", value_name = "VIEWPORT")]
    viewports: Vec<ViewportSpec>,

    /// Do not start or probe the app; assume it is already up
    #[arg(long)]
    no_server: bool,
}

#[derive(Serialize)]
pub struct OutcomeDisplay {
    pub name: String,
    pub viewport: String,
    pub result: String,
    pub duration_ms: u64,
    pub artifacts: usize,
    pub error: String,
}

impl From<&ScenarioOutcome> for OutcomeDisplay {
    fn from(outcome: &ScenarioOutcome) -> Self {
        Self {
            name: outcome.name.clone(),
            viewport: outcome.viewport.to_string(),
            result: if outcome.success { "pass" } else { "FAIL" }.to_string(),
            duration_ms: outcome.duration_ms,
            artifacts: outcome.artifacts.len(),
            error: outcome.error.clone().unwrap_or_default(),
        }
    }
}

impl Columns for OutcomeDisplay {
    fn headers() -> &'static [&'static str] {
        &["Scenario", "Viewport", "Result", "Duration", "Artifacts", "Error"]
    }

    fn failed(&self) -> bool {
        self.result != "pass"
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.viewport.clone(),
            self.result.clone(),
            format!("{}ms", self.duration_ms),
            self.artifacts.to_string(),
            self.error.clone(),
        ]
    }
}

#[derive(Args)]
pub struct RunFileArgs {
    /// Scenario YAML files
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Run each scenario on these viewports (mobile, desktop or WxH)
    #[arg(long = "viewport", value_name = "VIEWPORT")]
    viewports: Vec<ViewportSpec>,

    /// Do not start or probe the app; assume it is already up
    #[arg(long)]
    no_server: bool,
}

#[derive(Args)]
pub struct MatrixArgs {
    /// Scenario name
    name: String,

    /// Viewports to run on concurrently (mobile, desktop or WxH)
    #[arg(long = "viewport", value_name = "VIEWPORT", required = true)]
    viewports: Vec<ViewportSpec>,

    /// Do not start or probe the app; assume it is already up
    #[arg(long)]
    no_server: bool,
}

pub async fn execute(args: RunArgs, ctx: &Context) -> Result<ExitCode> {
    let mut selected = if args.names.is_empty() && !args.all && args.tag.is_none() && !args.files.is_empty() {
        Vec::new()
    } else {
        ctx.select(&args.names, args.all, args.tag.as_deref())?
    };
    for path in &args.files {
        selected.push(Scenario::from_file(path)?);
    }
    run_selected(selected, &args.viewports, args.no_server, ctx).await
}

pub async fn execute_files(args: RunFileArgs, ctx: &Context) -> Result<ExitCode> {
    let selected = args
        .paths
        .iter()
        .map(|path| Scenario::from_file(path))
        .collect::<Result<Vec<_>, _>>()?;
    run_selected(selected, &args.viewports, args.no_server, ctx).await
}

pub async fn execute_matrix(args: MatrixArgs, ctx: &Context) -> Result<ExitCode> {
    let selected = ctx.select(std::slice::from_ref(&args.name), false, None)?;
    run_selected(selected, &args.viewports, args.no_server, ctx).await
}

async fn run_selected(
    mut selected: Vec<Scenario>,
    viewports: &[ViewportSpec],
    no_server: bool,
    ctx: &Context,
) -> Result<ExitCode> {
    if !viewports.is_empty() {
        selected = selected.into_iter().map(|s| s.across(viewports)).collect();
    }

    let mut target = ctx.config.target.clone();
    if no_server {
        target.command = None;
        target.probe = false;
    }
    let _server = AppServer::start(&target).await?;

    let driver = Arc::new(PlaywrightDriver::new(ctx.config.playwright()));
    let runner = ScenarioRunner::new(&ctx.config, driver);

    let result = runner.run_all(&selected).await;
    if let Err(e) = runner.shutdown().await {
        warn!("Browser shutdown failed: {}", e);
    }
    let summary = result?;
    let manifest = runner.write_manifest(&summary)?;

    report(&summary, ctx)?;
    println!("Manifest: {}", manifest.display());

    Ok(if summary.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn report(summary: &RunSummary, ctx: &Context) -> Result<()> {
    let displays: Vec<OutcomeDisplay> = summary.results.iter().map(OutcomeDisplay::from).collect();
    print_rows(&displays, ctx.format, "No scenarios were run.")?;

    for outcome in summary.results.iter().filter(|o| !o.success) {
        for artifact in &outcome.artifacts {
            println!("  {} -> {}", outcome.name, artifact.path.display());
        }
    }

    if summary.success() {
        print_pass(&format!("{} scenario(s) passed in {} ms", summary.passed, summary.duration_ms));
    } else {
        print_fail(&format!(
            "{} of {} scenario(s) failed",
            summary.failed, summary.total
        ));
    }
    Ok(())
}
