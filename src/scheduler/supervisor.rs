use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{Result, SupervisorError};
use crate::scheduler::decomposer::decompose;
use crate::scheduler::dispatcher::Dispatcher;
use crate::scheduler::job::{Job, JobResults};
use crate::scheduler::ledger::{JobLedger, Retrieval};
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::queue::TaskQueue;
use crate::worker::WorkerClient;

/// Point-in-time counters for the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub idle_workers: usize,
    pub registered_workers: usize,
    pub pending_tasks: usize,
    pub jobs_in_flight: usize,
}

/// Owns the worker pool, the job ledger and the task queue.
///
/// Built once at startup; every dispatch loop, the supervisor loop and the
/// HTTP handlers share it through cheap clones.
#[derive(Clone)]
pub struct Scheduler {
    pool: Arc<WorkerPool>,
    ledger: Arc<JobLedger>,
    queue: TaskQueue,
    config: DispatchConfig,
}

impl Scheduler {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            pool: Arc::new(WorkerPool::new(config.cooldown)),
            ledger: Arc::new(JobLedger::with_limits(
                config.max_jobs,
                config.result_retention,
            )),
            queue: TaskQueue::new(),
            config,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn dispatcher(&self, client: Arc<dyn WorkerClient>) -> Dispatcher {
        Dispatcher::new(
            self.pool.clone(),
            self.ledger.clone(),
            self.queue.clone(),
            client,
            self.config.clone(),
        )
    }

    /// Start the configured number of dispatch loops.
    pub fn spawn_dispatchers(
        &self,
        client: Arc<dyn WorkerClient>,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        tracing::info!(loops = self.config.dispatch_loops, "Starting dispatch loops");
        (0..self.config.dispatch_loops)
            .map(|_| {
                let dispatcher = self.dispatcher(client.clone());
                tokio::spawn(dispatcher.run(cancel.child_token()))
            })
            .collect()
    }

    /// Start the task that drops finished results nobody collected.
    pub fn spawn_sweeper(&self, cancel: &CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.ledger.clone().run_sweeper(cancel.child_token()))
    }

    /// Decompose `job`, open its ledger entry and queue its tasks. The results
    /// are collected later by id.
    ///
    /// A job that decomposes into zero tasks is complete as soon as this returns.
    pub async fn submit(&self, job: Job) -> Result<Uuid> {
        self.submit_with(job, Retrieval::Detached).await
    }

    pub async fn submit_with(&self, job: Job, retrieval: Retrieval) -> Result<Uuid> {
        job.validate()?;

        let idle_workers = self.pool.size().await;
        let tasks = decompose(&job, idle_workers);
        self.ledger.open_with(job.id, tasks.len(), retrieval).await?;

        if tasks.is_empty() {
            tracing::info!(job_id = %job.id, "Job decomposed into no tasks, completing immediately");
        } else {
            tracing::info!(
                job_id = %job.id,
                tasks = tasks.len(),
                parameterized = job.is_parameterized(),
                "Job accepted"
            );
        }
        self.queue.extend(tasks);
        Ok(job.id)
    }

    /// Wait for a submitted job to finish and collect its results.
    pub async fn wait(&self, job_id: Uuid) -> Result<JobResults> {
        self.ledger.wait(job_id).await
    }

    /// Like [`wait`](Scheduler::wait), restricted to detached submissions.
    pub async fn collect(&self, job_id: Uuid) -> Result<JobResults> {
        self.ledger.collect(job_id).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            idle_workers: self.pool.size().await,
            registered_workers: self.pool.registered().await,
            pending_tasks: self.queue.len(),
            jobs_in_flight: self.ledger.in_flight().await,
        }
    }
}

#[derive(Debug)]
struct Submission {
    job: Job,
    ack: oneshot::Sender<Result<Uuid>>,
    completion: Option<oneshot::Sender<Result<JobResults>>>,
}

/// Client side of the intake queue.
#[derive(Debug, Clone)]
pub struct SubmissionSender {
    tx: mpsc::Sender<Submission>,
}

impl SubmissionSender {
    fn enqueue(&self, submission: Submission) -> Result<()> {
        self.tx.try_send(submission).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SupervisorError::IntakeFull,
            mpsc::error::TrySendError::Closed(_) => SupervisorError::IntakeClosed,
        })
    }

    /// Submit and return as soon as the job has been accepted or rejected.
    pub async fn submit_async(&self, job: Job) -> Result<Uuid> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.enqueue(Submission {
            job,
            ack: ack_tx,
            completion: None,
        })?;
        ack_rx.await.map_err(|_| SupervisorError::IntakeClosed)?
    }

    /// Submit and wait for the job's aggregated results.
    pub async fn submit_sync(&self, job: Job) -> Result<JobResults> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(Submission {
            job,
            ack: ack_tx,
            completion: Some(done_tx),
        })?;
        ack_rx.await.map_err(|_| SupervisorError::IntakeClosed)??;
        done_rx.await.map_err(|_| SupervisorError::IntakeClosed)?
    }
}

/// The intake loop: takes submissions in arrival order and feeds the scheduler.
///
/// Waiting for a synchronous submission happens on its own task, so many jobs
/// can be in flight while the loop keeps accepting new ones.
pub struct Supervisor {
    scheduler: Scheduler,
    intake: mpsc::Receiver<Submission>,
}

impl Supervisor {
    pub fn new(scheduler: Scheduler, capacity: usize) -> (Self, SubmissionSender) {
        let (tx, intake) = mpsc::channel(capacity.max(1));
        (Self { scheduler, intake }, SubmissionSender { tx })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Supervisor loop started");
        loop {
            let submission = tokio::select! {
                _ = cancel.cancelled() => break,
                submission = self.intake.recv() => submission,
            };
            let Some(submission) = submission else {
                break;
            };
            self.accept(submission).await;
        }
        tracing::info!("Supervisor loop stopped");
    }

    async fn accept(&self, submission: Submission) {
        let Submission {
            job,
            ack,
            completion,
        } = submission;

        let retrieval = if completion.is_some() {
            Retrieval::Attached
        } else {
            Retrieval::Detached
        };
        let job_id = match self.scheduler.submit_with(job, retrieval).await {
            Ok(job_id) => job_id,
            Err(e) => {
                tracing::warn!(error = %e, "Job rejected");
                let _ = ack.send(Err(e));
                return;
            }
        };
        let _ = ack.send(Ok(job_id));

        if let Some(completion) = completion {
            let scheduler = self.scheduler.clone();
            tokio::spawn(async move {
                let outcome = scheduler.wait(job_id).await;
                if completion.send(outcome).is_err() {
                    tracing::debug!(job_id = %job_id, "Submitter went away before completion");
                }
            });
        }
    }
}
