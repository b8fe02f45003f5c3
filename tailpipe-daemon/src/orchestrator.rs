//! Forwarder orchestration -- assembly, signal handling, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of the `tailpipe` binary.
//! It validates configuration, builds the [`Forwarder`], and runs it until
//! every input is exhausted or a shutdown signal arrives.
//!
//! # Shutdown
//!
//! `SIGTERM`/`SIGINT` cancel the tailer token only. Tailers persist their
//! final offsets and close their line channels; parsers, stages, the sender,
//! the retry coordinator, and the stats reporter then finish in that order
//! as each upstream channel closes.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tailpipe_core::config::TailpipeConfig;
use tailpipe_core::event::DeliveryResponse;
use tailpipe_core::pipeline::Transmission;
use tailpipe_forwarder::{ForwardReport, Forwarder, ForwarderBuilder};

use crate::metrics_server;
use crate::pid_file::PidFile;

/// The top-level daemon coordinator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: TailpipeConfig,
    /// Fully wired forwarder, consumed by [`Orchestrator::run`].
    forwarder: Forwarder,
    /// Cancels the tailers; everything downstream drains on channel closure.
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Load `tailpipe.toml` (with environment overrides) and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = TailpipeConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration, writing events to stdout.
    pub fn build_from_config(config: TailpipeConfig) -> Result<Self> {
        Self::assemble(config, ForwarderBuilder::new())
    }

    /// Build with a caller-supplied transmission and its response channel.
    pub fn build_with_transmission(
        config: TailpipeConfig,
        transmission: Arc<dyn Transmission>,
        responses: mpsc::Receiver<DeliveryResponse>,
    ) -> Result<Self> {
        Self::assemble(
            config,
            ForwarderBuilder::new().transmission(transmission, responses),
        )
    }

    fn assemble(config: TailpipeConfig, builder: ForwarderBuilder) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let forwarder = builder
            .config(config.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build forwarder: {}", e))?;

        tracing::info!(
            inputs = forwarder.inputs().len(),
            stages = ?forwarder.stages().names(),
            read_from = %config.tail.read_from,
            stop = config.tail.stop,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            forwarder,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops the tailers when cancelled.
    ///
    /// Cancelling it has the same effect as a shutdown signal.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &TailpipeConfig {
        &self.config
    }

    /// Run the forwarder until it finishes or a shutdown signal is received.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    /// - cancellation of [`Orchestrator::shutdown_token`]
    pub async fn run(self) -> Result<ForwardReport> {
        let Self {
            config,
            forwarder,
            shutdown,
        } = self;

        let _pid_file = (!config.general.pid_file.is_empty())
            .then(|| PidFile::create(&config.general.pid_file))
            .transpose()?;

        let mut task = tokio::spawn(forwarder.run(shutdown.clone()));

        let joined = tokio::select! {
            biased;
            joined = &mut task => joined,
            signal = stop_signal() => {
                match signal {
                    Ok(signal) => tracing::info!(%signal, "stopping tailers, draining pipeline"),
                    Err(e) => tracing::error!(error = %e, "cannot listen for signals, stopping tailers"),
                }
                shutdown.cancel();
                task.await
            }
        };

        let report = joined
            .map_err(|e| anyhow::anyhow!("forwarder task failed: {}", e))?
            .map_err(|e| anyhow::anyhow!("forwarder failed: {}", e))?;

        tracing::info!(
            inputs = report.inputs,
            failed_inputs = report.failed_inputs,
            sent = report.sender.sent,
            dropped = report.sender.dropped,
            retried = report.sender.retried,
            discarded = report.sender.discarded,
            "forwarder finished"
        );
        Ok(report)
    }
}

/// Signal that ended a following run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(not(unix), allow(dead_code))]
enum StopSignal {
    Terminate,
    Interrupt,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Interrupt => write!(f, "SIGINT"),
        }
    }
}

#[cfg(unix)]
async fn stop_signal() -> io::Result<StopSignal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    Ok(tokio::select! {
        _ = terminate.recv() => StopSignal::Terminate,
        _ = interrupt.recv() => StopSignal::Interrupt,
    })
}

#[cfg(not(unix))]
async fn stop_signal() -> io::Result<StopSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(StopSignal::Interrupt)
}
