//! flowdeckctl - validate, list and walk Flowdeck flow definitions
//!
//! Usage:
//!   flowdeckctl validate flows/onboarding.yaml
//!   flowdeckctl list --dir flows
//!   flowdeckctl run flows/onboarding.yaml --data plan=pro --script next,next,back

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output only
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    Cli::parse().execute().await
}
