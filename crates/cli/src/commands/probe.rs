//! Probe Command

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use jungle_e2e::server;

use super::Context;
use crate::output::{print_fail, print_pass};

#[derive(Args)]
pub struct ProbeArgs {
    /// How long to keep trying
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

pub async fn execute(args: ProbeArgs, ctx: &Context) -> Result<ExitCode> {
    let url = &ctx.config.target.base_url;

    match server::probe(url, Duration::from_millis(args.timeout_ms)).await {
        Ok(()) => {
            print_pass(&format!("App is answering at {}", url));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            print_fail(&e.to_string());
            Ok(ExitCode::from(1))
        }
    }
}
