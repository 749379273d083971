use std::io;
use std::path::{Path, PathBuf};

use ftpsync_core::FtpError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::queue::DownloadTask;
use super::remote::{Connector, RemoteSession};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("connection failed: {0}")]
    Connect(#[source] FtpError),
    #[error("transfer failed: {0}")]
    Transfer(#[source] FtpError),
    #[error("local filesystem error: {0}")]
    Filesystem(#[from] io::Error),
    #[error("interrupted to release connections")]
    Interrupted,
}

impl TaskError {
    pub fn is_too_many_connections(&self) -> bool {
        match self {
            TaskError::Connect(err) | TaskError::Transfer(err) => err.is_too_many_connections(),
            _ => false,
        }
    }

    fn from_transfer(err: FtpError) -> Self {
        match err {
            FtpError::Local { source, .. } => TaskError::Filesystem(source),
            other => TaskError::Transfer(other),
        }
    }
}

/// Downloads one file over its own session.
///
/// The session is closed on every path, including cancellation. The file is written to a
/// `.partial` sibling first and only renamed onto the destination once complete.
pub async fn execute<C: Connector>(
    connector: &C,
    task: &DownloadTask,
    cancel: &CancellationToken,
) -> Result<u64, TaskError> {
    let mut session = tokio::select! {
        connected = connector.connect() => connected.map_err(TaskError::Connect)?,
        _ = cancel.cancelled() => return Err(TaskError::Interrupted),
    };

    let partial = partial_path(&task.local_path);
    let result = tokio::select! {
        fetched = fetch(&mut session, task, &partial) => fetched,
        _ = cancel.cancelled() => Err(TaskError::Interrupted),
    };
    session.close().await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    result
}

async fn fetch<S: RemoteSession>(
    session: &mut S,
    task: &DownloadTask,
    partial: &Path,
) -> Result<u64, TaskError> {
    if let Some(parent) = task.local_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = session
        .download_to(partial, &task.remote_path)
        .await
        .map_err(TaskError::from_transfer)?;
    tokio::fs::rename(partial, &task.local_path).await?;
    Ok(bytes)
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
