use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::error::{Result, SupervisorError};
use crate::scheduler::heap::PriorityHeap;
use crate::scheduler::job::{Registration, Worker};

/// Consecutive failures after which a worker is reported as degraded.
const DEGRADED_FAILURE_THRESHOLD: u32 = 3;

/// How the task a worker just ran ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy)]
struct IdleSlot {
    worker_id: u64,
    priority: u64,
    /// Stamped at idle insertion; lower means idle for longer.
    seq: u64,
}

#[derive(Debug)]
struct PoolState {
    idle: PriorityHeap<u64, IdleSlot>,
    workers: HashMap<u64, Worker>,
    by_hostname: HashMap<String, u64>,
    next_id: u64,
    next_seq: u64,
}

impl PoolState {
    fn new() -> Self {
        Self {
            idle: PriorityHeap::new(|a: &IdleSlot, b: &IdleSlot| {
                a.priority.cmp(&b.priority).then_with(|| b.seq.cmp(&a.seq))
            }),
            workers: HashMap::new(),
            by_hostname: HashMap::new(),
            next_id: 1,
            next_seq: 0,
        }
    }

    /// Put a busy (or newly registered) worker back in the idle set.
    fn make_idle(&mut self, worker_id: u64) -> bool {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            return false;
        };
        if self.idle.contains(&worker_id) {
            return false;
        }
        worker.busy = false;
        let slot = IdleSlot {
            worker_id,
            priority: worker.priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.idle.push(worker_id, slot);
        true
    }

    fn take_next(&mut self) -> Option<Worker> {
        let slot = self.idle.pop()?;
        let worker = self.workers.get_mut(&slot.worker_id)?;
        worker.busy = true;
        Some(worker.clone())
    }
}

/// Priority-ordered pool of registered workers.
///
/// Idle workers sit in a max-heap keyed by priority, ties broken in favour
/// of the worker that has been idle longest. A worker handed out by
/// [`acquire`](WorkerPool::acquire) is busy until it comes back through
/// [`release`](WorkerPool::release); nothing else touches the busy flag.
#[derive(Debug)]
pub struct WorkerPool {
    state: Mutex<PoolState>,
    available: Notify,
    cooldown: Duration,
}

impl WorkerPool {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(PoolState::new()),
            available: Notify::new(),
            cooldown,
        }
    }

    /// Register a worker, or refresh the one already known under the same hostname.
    pub async fn register(&self, registration: Registration) -> Result<Worker> {
        let hostname = registration.hostname.trim().to_string();
        if hostname.is_empty() {
            return Err(SupervisorError::InvalidRegistration(
                "hostname must not be empty".to_string(),
            ));
        }
        let priority = registration.priority();

        let mut state = self.state.lock().await;

        if let Some(&id) = state.by_hostname.get(&hostname) {
            let worker = state
                .workers
                .get_mut(&id)
                .ok_or_else(|| SupervisorError::Internal(format!("worker {id} missing")))?;
            worker.priority = priority;
            worker.registration = registration;
            let refreshed = worker.clone();
            state.idle.fix(&id, |slot| slot.priority = priority);
            tracing::info!(worker_id = id, hostname = %hostname, priority, "Worker re-registered");
            return Ok(refreshed);
        }

        let id = state.next_id;
        state.next_id += 1;
        let worker = Worker {
            id,
            hostname: hostname.clone(),
            busy: false,
            priority,
            consecutive_failures: 0,
            registration,
        };
        state.workers.insert(id, worker.clone());
        state.by_hostname.insert(hostname.clone(), id);
        state.make_idle(id);
        drop(state);

        self.available.notify_one();
        tracing::info!(worker_id = id, hostname = %hostname, priority, "Worker registered");
        Ok(worker)
    }

    /// Wait for an idle worker and take the highest-priority one.
    pub async fn acquire(&self) -> Worker {
        loop {
            // Register interest before looking, so a release that lands in
            // between is not lost.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(worker) = self.try_acquire().await {
                return worker;
            }
            notified.await;
        }
    }

    pub async fn try_acquire(&self) -> Option<Worker> {
        let worker = self.state.lock().await.take_next()?;
        tracing::debug!(worker_id = worker.id, hostname = %worker.hostname, "Worker acquired");
        Some(worker)
    }

    /// Hand a worker back. Failed workers rejoin the idle set only after the cooldown.
    pub async fn release(self: &Arc<Self>, worker: Worker, status: ReleaseStatus) {
        match status {
            ReleaseStatus::Success => {
                let mut state = self.state.lock().await;
                if let Some(known) = state.workers.get_mut(&worker.id) {
                    known.consecutive_failures = 0;
                }
                let requeued = state.make_idle(worker.id);
                drop(state);
                if requeued {
                    self.available.notify_one();
                }
            }
            ReleaseStatus::Failure => {
                let failures = {
                    let mut state = self.state.lock().await;
                    match state.workers.get_mut(&worker.id) {
                        Some(known) => {
                            known.consecutive_failures += 1;
                            known.consecutive_failures
                        }
                        None => return,
                    }
                };
                if failures >= DEGRADED_FAILURE_THRESHOLD {
                    tracing::warn!(
                        worker_id = worker.id,
                        hostname = %worker.hostname,
                        consecutive_failures = failures,
                        "Worker failing repeatedly"
                    );
                }
                let pool = Arc::clone(self);
                let cooldown = self.cooldown;
                tokio::spawn(async move {
                    tokio::time::sleep(cooldown).await;
                    let requeued = pool.state.lock().await.make_idle(worker.id);
                    if requeued {
                        pool.available.notify_one();
                        tracing::debug!(worker_id = worker.id, "Worker back from cooldown");
                    }
                });
            }
        }
    }

    /// Number of idle workers.
    pub async fn size(&self) -> usize {
        self.state.lock().await.idle.len()
    }

    /// Number of known workers, idle or not.
    pub async fn registered(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    /// All known workers ordered by id.
    pub async fn snapshot(&self) -> Vec<Worker> {
        let state = self.state.lock().await;
        let mut workers: Vec<Worker> = state.workers.values().cloned().collect();
        workers.sort_by_key(|w| w.id);
        workers
    }
}
