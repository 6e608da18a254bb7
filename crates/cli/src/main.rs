//! Jungle CLI - Main Entry Point
//!
//! Runs verification scenarios against the Panda Jungle Gym app and
//! reports where each journey passed or broke.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{list, probe, run, Context};

/// Jungle - headless verification of the Panda Jungle Gym app
#[derive(Parser)]
#[command(name = "jungle")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file
    #[arg(short, long, default_value = "jungle.toml", global = true)]
    config: PathBuf,

    /// Base URL of the app under test
    #[arg(long, env = "JUNGLE_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Directory for screenshots and the run manifest
    #[arg(long, global = true)]
    artifacts: Option<PathBuf>,

    /// Directory of YAML scenario files
    #[arg(long, global = true)]
    scenarios: Option<PathBuf>,

    /// Show the browser window
    #[arg(long, global = true)]
    headed: bool,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available scenarios
    List(list::ListArgs),

    /// Run scenarios
    Run(run::RunArgs),

    /// Run scenarios from YAML files
    RunFile(run::RunFileArgs),

    /// Run one scenario across several viewports at once
    Matrix(run::MatrixArgs),

    /// Check that the app answers at its base URL
    Probe(probe::ProbeArgs),

    /// Write the effective configuration to the config file
    Init,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_fail(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let ctx = Context::load(
        &cli.config,
        cli.base_url,
        cli.artifacts,
        cli.scenarios,
        cli.headed,
        cli.format,
    )?;

    match cli.command {
        Commands::List(args) => list::execute(args, &ctx)?,
        Commands::Run(args) => return run::execute(args, &ctx).await,
        Commands::RunFile(args) => return run::execute_files(args, &ctx).await,
        Commands::Matrix(args) => return run::execute_matrix(args, &ctx).await,
        Commands::Probe(args) => return probe::execute(args, &ctx).await,
        Commands::Init => {
            ctx.config.save(&cli.config)?;
            output::print_pass(&format!("Configuration written to {}", cli.config.display()));
        }
        Commands::Version => {
            println!("Jungle CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Verification harness for the Panda Jungle Gym app");
        }
    }

    Ok(ExitCode::SUCCESS)
}
