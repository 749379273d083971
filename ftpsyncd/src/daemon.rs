use std::future::Future;

use anyhow::Context;
use ftpsync_core::FtpClient;
use time::OffsetDateTime;

use crate::config::SyncConfig;
use crate::network;
use crate::sync::engine::{CycleOutcome, SyncEngine};
use crate::sync::remote::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// One-shot cycle finished; individual files may still have been abandoned.
    Completed,
    /// One-shot cycle aborted.
    Failed,
    /// Interrupted by Ctrl-C.
    Stopped,
}

pub struct DaemonRuntime<C> {
    config: SyncConfig,
    engine: SyncEngine<C>,
}

impl DaemonRuntime<FtpClient> {
    pub async fn bootstrap(config: SyncConfig) -> anyhow::Result<Self> {
        if let Some(ssid) = network::prepare(&config.network).await? {
            tracing::info!(ssid, "wireless network joined");
        }
        tokio::fs::create_dir_all(&config.local_root)
            .await
            .with_context(|| format!("failed to create local root at {:?}", config.local_root))?;

        let client = FtpClient::new(config.ftp.clone()).context("failed to set up FTP client")?;
        Ok(Self::with_connector(config, client))
    }
}

impl<C: Connector> DaemonRuntime<C> {
    pub fn with_connector(config: SyncConfig, connector: C) -> Self {
        let engine = SyncEngine::new(connector, config.engine_settings());
        Self { config, engine }
    }

    pub async fn run(self) -> RunOutcome {
        self.run_until(shutdown_signal()).await
    }

    /// Runs cycles until `shutdown` resolves. Without daemon mode only one cycle runs.
    pub async fn run_until<F: Future<Output = ()>>(&self, shutdown: F) -> RunOutcome {
        tokio::pin!(shutdown);
        tracing::info!(
            host = %self.config.ftp.host,
            remote_root = %self.config.remote_root,
            local_root = %self.config.local_root.display(),
            daemon = self.config.daemon,
            "started"
        );

        loop {
            let succeeded = tokio::select! {
                succeeded = self.run_once() => succeeded,
                () = &mut shutdown => {
                    tracing::info!("interrupted during sync, stopping");
                    return RunOutcome::Stopped;
                }
            };
            if !self.config.daemon {
                return if succeeded {
                    RunOutcome::Completed
                } else {
                    RunOutcome::Failed
                };
            }

            match OffsetDateTime::now_utc().checked_add(wait_duration(self.config.interval)) {
                Some(next_run) => tracing::info!(%next_run, "waiting for next cycle"),
                None => tracing::info!(
                    interval_secs = self.config.interval.as_secs(),
                    "waiting for next cycle"
                ),
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => {}
                () = &mut shutdown => {
                    tracing::info!("stopping");
                    return RunOutcome::Stopped;
                }
            }
        }
    }

    /// Runs a single cycle and logs its result. Returns whether the cycle completed.
    pub async fn run_once(&self) -> bool {
        match self.engine.run_cycle().await {
            Ok(outcome) => {
                log_outcome(&outcome);
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "sync failed");
                false
            }
        }
    }
}

fn log_outcome(outcome: &CycleOutcome) {
    let report = &outcome.report;
    tracing::info!(
        remote_files = outcome.remote_files,
        selected = outcome.selected,
        downloaded = report.succeeded.len(),
        abandoned = report.abandoned.len(),
        bytes = report.bytes,
        capacity_reductions = report.capacity_reductions,
        final_ceiling = report.final_ceiling,
        "sync completed"
    );
    for abandoned in &report.abandoned {
        tracing::warn!(
            path = %abandoned.path,
            attempts = abandoned.attempts,
            error = %abandoned.error,
            "file not synced"
        );
    }
}

fn wait_duration(interval: std::time::Duration) -> time::Duration {
    time::Duration::try_from(interval).unwrap_or(time::Duration::MAX)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
