use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{PathError, local_path_for, remote_path_for};
use super::scan::FileRecord;

/// A remote file selected for download, with both ends resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub record: FileRecord,
    pub remote_path: String,
    pub local_path: PathBuf,
}

impl DownloadTask {
    pub fn new(record: FileRecord, remote_root: &str, local_root: &Path) -> Result<Self, PathError> {
        Ok(Self {
            local_path: local_path_for(local_root, &record.path)?,
            remote_path: remote_path_for(remote_root, &record.path),
            record,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub task: DownloadTask,
    /// Failed attempts charged so far; capacity interruptions are not charged.
    pub attempt: u32,
    /// Wait before reconnecting.
    pub delay: Option<Duration>,
}

impl QueuedTask {
    pub fn new(task: DownloadTask) -> Self {
        Self {
            task,
            attempt: 0,
            delay: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct DownloadQueue {
    inner: VecDeque<QueuedTask>,
}

impl DownloadQueue {
    pub fn enqueue(&mut self, task: QueuedTask) {
        self.inner.push_back(task);
    }

    /// Puts `tasks` back at the head, keeping their relative order.
    pub fn requeue_front(&mut self, tasks: Vec<QueuedTask>) {
        for task in tasks.into_iter().rev() {
            self.inner.push_front(task);
        }
    }

    pub fn dequeue(&mut self) -> Option<QueuedTask> {
        self.inner.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl FromIterator<DownloadTask> for DownloadQueue {
    fn from_iter<I: IntoIterator<Item = DownloadTask>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(QueuedTask::new).collect(),
        }
    }
}
