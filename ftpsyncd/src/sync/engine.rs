use std::path::PathBuf;

use ftpsync_core::FtpError;
use thiserror::Error;

use super::diff::{diff, filter_extensions};
use super::paths::PathError;
use super::queue::DownloadTask;
use super::remote::{Connector, RemoteSession};
use super::scan::{FileTree, ScanError, scan_local, scan_remote};
use super::scheduler::{Scheduler, SchedulerConfig, SchedulerError, SchedulerReport};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to open control session: {0}")]
    Connect(#[source] FtpError),
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub remote_root: String,
    pub local_root: PathBuf,
    /// Extension allow-list, lowercase without dots. Empty keeps every file.
    pub file_types: Vec<String>,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub remote_files: usize,
    pub local_files: usize,
    pub selected: usize,
    pub report: SchedulerReport,
}

pub struct SyncEngine<C> {
    connector: C,
    settings: EngineSettings,
}

impl<C: Connector> SyncEngine<C> {
    pub fn new(connector: C, settings: EngineSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    /// One pass: list the remote tree over a fresh control session, compare it with the
    /// local mirror and download what is missing or stale.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        let mut control = self.connector.connect().await.map_err(CycleError::Connect)?;
        let remote = scan_remote(&mut control, &self.settings.remote_root).await;
        // Released before downloads start so the control session does not take a server slot.
        control.close().await;

        let remote = filter_extensions(remote?, &self.settings.file_types);
        let local = scan_local(&self.settings.local_root).await?;
        let tasks = self.plan(&remote, &local)?;
        let selected = tasks.len();
        tracing::info!(
            remote_files = remote.len(),
            local_files = local.len(),
            selected,
            "trees compared"
        );

        let report = if tasks.is_empty() {
            SchedulerReport {
                final_ceiling: self.settings.scheduler.max_concurrency.max(1),
                ..Default::default()
            }
        } else {
            Scheduler::new(&self.connector, self.settings.scheduler.clone())
                .run(tasks)
                .await?
        };

        Ok(CycleOutcome {
            remote_files: remote.len(),
            local_files: local.len(),
            selected,
            report,
        })
    }

    fn plan(&self, remote: &FileTree, local: &FileTree) -> Result<Vec<DownloadTask>, PathError> {
        diff(remote, local)
            .into_iter()
            .map(|record| {
                DownloadTask::new(
                    record,
                    &self.settings.remote_root,
                    &self.settings.local_root,
                )
            })
            .collect()
    }
}
