use std::process::ExitCode;

use clap::Parser;
use ftpsyncd::config::CliArgs;
use ftpsyncd::daemon::{DaemonRuntime, RunOutcome};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = args.into_config()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    Ok(match daemon.run().await {
        RunOutcome::Failed => ExitCode::FAILURE,
        RunOutcome::Completed | RunOutcome::Stopped => ExitCode::SUCCESS,
    })
}
