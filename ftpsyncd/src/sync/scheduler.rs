use futures_util::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::queue::{DownloadQueue, DownloadTask, QueuedTask};
use super::remote::Connector;
use super::transfer::{self, TaskError};

pub const DEFAULT_MAX_CONCURRENCY: usize = 9;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_CAPACITY_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Ceiling at the start of every run.
    pub max_concurrency: usize,
    /// Retries granted to a task after ordinary failures before it is abandoned.
    pub max_retries: u32,
    /// Refusals tolerated in a row once the ceiling is down to one session.
    pub capacity_retries: u32,
    pub backoff: Backoff,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            capacity_retries: DEFAULT_CAPACITY_RETRIES,
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonedTask {
    pub path: String,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub succeeded: Vec<String>,
    pub abandoned: Vec<AbandonedTask>,
    pub bytes: u64,
    pub capacity_reductions: u32,
    pub final_ceiling: usize,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(
        "server refused {refusals} connections in a row at a single session; {remaining} downloads left"
    )]
    Exhausted { refusals: u32, remaining: usize },
}

/// Sliding-window downloader: one dedicated session per in-flight task, at most `ceiling`
/// of them, where the ceiling shrinks whenever the server answers 421.
///
/// All scheduler state lives in `run` and is only touched between polls of the in-flight set.
pub struct Scheduler<'a, C> {
    connector: &'a C,
    config: SchedulerConfig,
}

impl<'a, C: Connector> Scheduler<'a, C> {
    pub fn new(connector: &'a C, config: SchedulerConfig) -> Self {
        Self { connector, config }
    }

    pub async fn run(&self, tasks: Vec<DownloadTask>) -> Result<SchedulerReport, SchedulerError> {
        let mut queue: DownloadQueue = tasks.into_iter().collect();
        let mut ceiling = self.config.max_concurrency.max(1);
        let mut report = SchedulerReport::default();
        let mut in_flight = FuturesUnordered::new();
        let mut cancel = CancellationToken::new();
        let mut refusals_at_floor = 0u32;

        loop {
            while in_flight.len() < ceiling {
                let Some(queued) = queue.dequeue() else {
                    break;
                };
                in_flight.push(self.attempt(queued, cancel.clone()));
            }
            let Some((queued, outcome)) = in_flight.next().await else {
                break;
            };

            match outcome {
                Ok(bytes) => {
                    refusals_at_floor = 0;
                    succeed(queued, bytes, &mut report);
                }
                Err(err) if err.is_too_many_connections() => {
                    tracing::warn!(
                        path = %queued.task.remote_path,
                        ceiling,
                        in_flight = in_flight.len(),
                        "server refused connection, releasing transfer sessions"
                    );
                    cancel.cancel();
                    let mut interrupted = vec![queued];
                    while let Some((other, outcome)) = in_flight.next().await {
                        match outcome {
                            Ok(bytes) => succeed(other, bytes, &mut report),
                            Err(TaskError::Interrupted) => interrupted.push(other),
                            Err(err) if err.is_too_many_connections() => interrupted.push(other),
                            Err(err) => self.fail(other, err, &mut queue, &mut report),
                        }
                    }
                    cancel = CancellationToken::new();

                    if ceiling > 1 {
                        ceiling -= 1;
                        report.capacity_reductions += 1;
                        tracing::info!(ceiling, "lowered transfer ceiling");
                    } else {
                        refusals_at_floor += 1;
                        if refusals_at_floor > self.config.capacity_retries {
                            return Err(SchedulerError::Exhausted {
                                refusals: refusals_at_floor,
                                remaining: queue.len() + interrupted.len(),
                            });
                        }
                    }

                    let delay = self.config.backoff.delay(refusals_at_floor);
                    for task in &mut interrupted {
                        task.delay = Some(delay);
                    }
                    queue.requeue_front(interrupted);
                }
                Err(TaskError::Interrupted) => queue.requeue_front(vec![queued]),
                Err(err) => self.fail(queued, err, &mut queue, &mut report),
            }
        }

        report.final_ceiling = ceiling;
        Ok(report)
    }

    async fn attempt(
        &self,
        queued: QueuedTask,
        cancel: CancellationToken,
    ) -> (QueuedTask, Result<u64, TaskError>) {
        if let Some(delay) = queued.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return (queued, Err(TaskError::Interrupted)),
            }
        }
        tracing::debug!(
            path = %queued.task.remote_path,
            attempt = queued.attempt,
            "starting download"
        );
        let result = transfer::execute(self.connector, &queued.task, &cancel).await;
        (queued, result)
    }

    fn fail(
        &self,
        mut queued: QueuedTask,
        err: TaskError,
        queue: &mut DownloadQueue,
        report: &mut SchedulerReport,
    ) {
        queued.attempt += 1;
        let path = queued.task.record.path.clone();
        if queued.attempt > self.config.max_retries {
            tracing::error!(path = %path, attempts = queued.attempt, error = %err, "download abandoned");
            report.abandoned.push(AbandonedTask {
                path,
                attempts: queued.attempt,
                error: err.to_string(),
            });
            return;
        }

        let delay = self.config.backoff.delay(queued.attempt - 1);
        tracing::warn!(
            path = %path,
            attempt = queued.attempt,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "download failed, will retry"
        );
        queued.delay = Some(delay);
        queue.enqueue(queued);
    }
}

fn succeed(queued: QueuedTask, bytes: u64, report: &mut SchedulerReport) {
    tracing::info!(path = %queued.task.record.path, bytes, "downloaded");
    report.bytes += bytes;
    report.succeeded.push(queued.task.record.path);
}
