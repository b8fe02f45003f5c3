//! `tailpipe` -- tail log files and forward parsed events.
//!
//! Loading priority: CLI flags > `TAILPIPE_*` environment variables >
//! configuration file > defaults.

use anyhow::Result;
use clap::Parser;

use tailpipe_core::config::TailpipeConfig;
use tailpipe_daemon::cli::DaemonCli;
use tailpipe_daemon::logging;
use tailpipe_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = match &cli.config {
        Some(path) => TailpipeConfig::load(path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?,
        None => {
            let mut config = TailpipeConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    cli.apply_to(&mut config);

    if cli.validate {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        println!("configuration is valid");
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tailpipe starting");

    let orchestrator = Orchestrator::build_from_config(config)?;
    let report = orchestrator.run().await?;

    if report.failed_inputs > 0 {
        return Err(anyhow::anyhow!(
            "{} of {} inputs failed",
            report.failed_inputs,
            report.inputs
        ));
    }

    tracing::info!("tailpipe shut down");
    Ok(())
}
