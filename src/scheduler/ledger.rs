use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, SupervisorError};
use crate::scheduler::job::JobResults;

/// Jobs tracked at once, finished or not, before new ones are refused.
pub const DEFAULT_MAX_JOBS: usize = 10_000;

/// How long a finished job's results wait to be collected before they are dropped.
pub const DEFAULT_RESULT_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryStatus {
    Open,
    Complete,
    Abandoned(String),
}

/// Who takes a job's results out of the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Retrieval {
    /// Collected later by id through [`JobLedger::collect`].
    #[default]
    Detached,
    /// A waiter attached at submission owns the results; `collect` refuses them.
    Attached,
}

/// What happened to a result handed to [`JobLedger::record_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Stored; the job still waits for more results.
    Recorded,
    /// Stored, and it was the last one missing. Reported to exactly one caller per job.
    Completed,
    /// The slot already held a result; the first one is kept.
    Duplicate,
    /// The job was abandoned; the result is dropped.
    Ignored,
}

#[derive(Debug)]
struct LedgerEntry {
    slots: Vec<Option<String>>,
    received: usize,
    status: EntryStatus,
    retrieval: Retrieval,
    finished_at: Option<Instant>,
    done_tx: watch::Sender<bool>,
}

impl LedgerEntry {
    fn new(expected: usize, retrieval: Retrieval) -> Self {
        let (status, finished_at) = if expected == 0 {
            (EntryStatus::Complete, Some(Instant::now()))
        } else {
            (EntryStatus::Open, None)
        };
        let (done_tx, _) = watch::channel(status != EntryStatus::Open);
        Self {
            slots: vec![None; expected],
            received: 0,
            status,
            retrieval,
            finished_at,
            done_tx,
        }
    }

    fn expected(&self) -> usize {
        self.slots.len()
    }

    fn finish(&mut self, status: EntryStatus) {
        self.status = status;
        self.finished_at = Some(Instant::now());
        self.done_tx.send_replace(true);
    }

    fn expired(&self, now: Instant, retention: Duration) -> bool {
        self.finished_at
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }
}

/// Per-job accounting of expected versus received task results.
///
/// All mutation happens under one lock, so the "was this the completing
/// result" check is atomic with the slot write.
///
/// The ledger is bounded: at most `max_jobs` entries are tracked, and a
/// finished entry nobody collects is dropped once `retention` has passed
/// (see [`sweep`](JobLedger::sweep)).
#[derive(Debug)]
pub struct JobLedger {
    entries: Mutex<HashMap<Uuid, LedgerEntry>>,
    max_jobs: usize,
    retention: Duration,
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLedger {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_JOBS, DEFAULT_RESULT_RETENTION)
    }

    pub fn with_limits(max_jobs: usize, retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_jobs: max_jobs.max(1),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Start tracking a job that will produce `expected` results, collected by id.
    pub async fn open(&self, job_id: Uuid, expected: usize) -> Result<()> {
        self.open_with(job_id, expected, Retrieval::Detached).await
    }

    /// Start tracking a job. Expired entries are dropped first; if the ledger
    /// is still full the job is refused with [`SupervisorError::LedgerFull`].
    pub async fn open_with(
        &self,
        job_id: Uuid,
        expected: usize,
        retrieval: Retrieval,
    ) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&job_id) {
            return Err(SupervisorError::DuplicateJob(job_id));
        }
        if entries.len() >= self.max_jobs {
            let now = Instant::now();
            entries.retain(|_, entry| !entry.expired(now, self.retention));
            if entries.len() >= self.max_jobs {
                return Err(SupervisorError::LedgerFull(self.max_jobs));
            }
        }
        entries.insert(job_id, LedgerEntry::new(expected, retrieval));
        tracing::debug!(job_id = %job_id, expected, ?retrieval, "Ledger entry opened");
        Ok(())
    }

    /// Store the result for task slot `index` of `job_id`.
    pub async fn record_result(
        &self,
        job_id: Uuid,
        index: usize,
        result: String,
    ) -> Result<RecordOutcome> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&job_id)
            .ok_or(SupervisorError::UnknownJob(job_id))?;

        let expected = entry.expected();
        match entry.status {
            EntryStatus::Abandoned(_) => return Ok(RecordOutcome::Ignored),
            EntryStatus::Complete => return Ok(RecordOutcome::Duplicate),
            EntryStatus::Open => {}
        }

        let slot = entry
            .slots
            .get_mut(index)
            .ok_or(SupervisorError::SlotOutOfRange {
                job_id,
                index,
                expected,
            })?;
        if slot.is_some() {
            tracing::debug!(job_id = %job_id, index, "Duplicate result dropped");
            return Ok(RecordOutcome::Duplicate);
        }
        *slot = Some(result);
        entry.received += 1;

        if entry.received == expected {
            entry.finish(EntryStatus::Complete);
            tracing::info!(job_id = %job_id, results = expected, "Job complete");
            Ok(RecordOutcome::Completed)
        } else {
            Ok(RecordOutcome::Recorded)
        }
    }

    /// Give up on an open job. Waiters receive [`SupervisorError::JobAbandoned`].
    /// Returns false if the job was not open.
    pub async fn abandon(&self, job_id: Uuid, reason: impl Into<String>) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&job_id) else {
            return false;
        };
        if entry.status != EntryStatus::Open {
            return false;
        }
        let reason = reason.into();
        tracing::warn!(job_id = %job_id, reason = %reason, "Job abandoned");
        entry.finish(EntryStatus::Abandoned(reason));
        true
    }

    /// True while the job still accepts results.
    pub async fn is_open(&self, job_id: &Uuid) -> bool {
        self.entries
            .lock()
            .await
            .get(job_id)
            .is_some_and(|e| e.status == EntryStatus::Open)
    }

    /// Number of jobs currently tracked, finished or not.
    pub async fn in_flight(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Drop finished entries older than the retention period. Returns how many went.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.expired(now, self.retention));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, "Dropped uncollected job results");
        }
        removed
    }

    /// Sweep periodically until `cancel` fires.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let period = (self.retention / 2).clamp(Duration::from_millis(10), Duration::from_secs(60));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
        tracing::debug!("Ledger sweeper stopped");
    }

    /// Wait until `job_id` is finished, then remove its entry and return the
    /// results ordered by task index.
    pub async fn wait(&self, job_id: Uuid) -> Result<JobResults> {
        self.take(job_id, false).await
    }

    /// Like [`wait`](JobLedger::wait), but only for jobs submitted with
    /// [`Retrieval::Detached`]. Jobs owned by an attached waiter look unknown.
    pub async fn collect(&self, job_id: Uuid) -> Result<JobResults> {
        self.take(job_id, true).await
    }

    async fn take(&self, job_id: Uuid, detached_only: bool) -> Result<JobResults> {
        let mut done_rx = {
            let entries = self.entries.lock().await;
            let entry = entries
                .get(&job_id)
                .filter(|e| !detached_only || e.retrieval == Retrieval::Detached)
                .ok_or(SupervisorError::UnknownJob(job_id))?;
            entry.done_tx.subscribe()
        };

        done_rx
            .wait_for(|done| *done)
            .await
            .map_err(|_| SupervisorError::UnknownJob(job_id))?;

        let entry = self
            .entries
            .lock()
            .await
            .remove(&job_id)
            .ok_or(SupervisorError::UnknownJob(job_id))?;

        match entry.status {
            EntryStatus::Complete => Ok(JobResults {
                job_id,
                results: entry.slots.into_iter().flatten().collect(),
            }),
            EntryStatus::Abandoned(reason) => Err(SupervisorError::JobAbandoned { job_id, reason }),
            EntryStatus::Open => Err(SupervisorError::Internal(format!(
                "job {job_id} signalled done while still open"
            ))),
        }
    }
}
