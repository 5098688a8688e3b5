use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::error::SupervisorError;
use crate::scheduler::job::Task;
use crate::scheduler::ledger::{JobLedger, RecordOutcome};
use crate::scheduler::pool::{ReleaseStatus, WorkerPool};
use crate::scheduler::queue::TaskQueue;
use crate::worker::WorkerClient;

/// What a single dispatch attempt did with its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Result stored; the job needs more.
    Recorded,
    /// Result stored and it completed the job.
    Completed,
    /// Result arrived for a slot that was already filled and was dropped.
    Duplicate,
    /// The remote call failed; the task is back on the queue.
    Requeued { attempts: u32 },
    /// The remote call failed and the task ran out of attempts; its job was abandoned.
    Abandoned,
    /// The task's job is no longer accepting results.
    Skipped,
}

/// Moves tasks from the task queue to workers and results into the ledger.
///
/// Cloning is cheap; the node runs one clone per dispatch loop.
#[derive(Clone)]
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    ledger: Arc<JobLedger>,
    queue: TaskQueue,
    client: Arc<dyn WorkerClient>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<WorkerPool>,
        ledger: Arc<JobLedger>,
        queue: TaskQueue,
        client: Arc<dyn WorkerClient>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            pool,
            ledger,
            queue,
            client,
            config,
        }
    }

    /// Run one task on the best idle worker.
    ///
    /// Waits for a worker if none is idle. A failed remote call never drops
    /// the task: it is requeued with its attempt counter bumped (or, once
    /// attempts run out, its whole job is abandoned) and the worker goes into
    /// cooldown.
    pub async fn dispatch_once(&self, mut task: Task) -> DispatchOutcome {
        if !self.ledger.is_open(&task.job_id).await {
            tracing::debug!(job_id = %task.job_id, index = task.index, "Skipping task of closed job");
            return DispatchOutcome::Skipped;
        }

        let worker = self.pool.acquire().await;
        let remote_job = task.to_remote_job();

        let result = match tokio::time::timeout(
            self.config.request_timeout,
            self.client.execute(&worker, &remote_job),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SupervisorError::DispatchTransport {
                hostname: worker.hostname.clone(),
                reason: format!("no response within {:?}", self.config.request_timeout),
            }),
        };

        match result {
            Ok(output) => {
                tracing::debug!(
                    job_id = %task.job_id,
                    index = task.index,
                    worker_id = worker.id,
                    "Task succeeded"
                );
                self.pool.release(worker, ReleaseStatus::Success).await;
                match self
                    .ledger
                    .record_result(task.job_id, task.index, output)
                    .await
                {
                    Ok(RecordOutcome::Recorded) => DispatchOutcome::Recorded,
                    Ok(RecordOutcome::Completed) => DispatchOutcome::Completed,
                    Ok(RecordOutcome::Duplicate) => DispatchOutcome::Duplicate,
                    Ok(RecordOutcome::Ignored) => DispatchOutcome::Skipped,
                    Err(e) => {
                        tracing::warn!(job_id = %task.job_id, error = %e, "Result could not be recorded");
                        DispatchOutcome::Skipped
                    }
                }
            }
            Err(e) => {
                task.attempts += 1;
                tracing::warn!(
                    job_id = %task.job_id,
                    index = task.index,
                    worker_id = worker.id,
                    hostname = %worker.hostname,
                    attempts = task.attempts,
                    transport = e.is_transport(),
                    error = %e,
                    "Dispatch failed"
                );
                self.pool.release(worker, ReleaseStatus::Failure).await;

                if self.config.attempts_exhausted(task.attempts) {
                    let reason = format!(
                        "task {} failed {} dispatch attempts, last error: {}",
                        task.index, task.attempts, e
                    );
                    self.ledger.abandon(task.job_id, reason).await;
                    DispatchOutcome::Abandoned
                } else {
                    let attempts = task.attempts;
                    self.queue.push(task);
                    DispatchOutcome::Requeued { attempts }
                }
            }
        }
    }

    /// Pull tasks until `cancel` fires. An in-flight dispatch always runs to
    /// completion before the loop checks for cancellation again.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let task = tokio::select! {
                _ = cancel.cancelled() => break,
                task = self.queue.recv() => task,
            };
            match task {
                Some(task) => {
                    self.dispatch_once(task).await;
                }
                None => break,
            }
        }
        tracing::debug!("Dispatch loop stopped");
    }
}
