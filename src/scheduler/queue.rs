use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::scheduler::job::Task;

/// Unbounded queue of tasks waiting for a worker.
///
/// Cloning yields another handle to the same queue; any number of dispatch
/// loops may `recv` concurrently. `push` never blocks, so a failed dispatch
/// can requeue its task without stalling.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
    pending: Arc<AtomicUsize>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn push(&self, task: Task) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(task)) = self.tx.send(task) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::error!(job_id = %task.job_id, index = task.index, "Task queue closed, task dropped");
        }
    }

    pub fn extend(&self, tasks: impl IntoIterator<Item = Task>) {
        for task in tasks {
            self.push(task);
        }
    }

    /// Wait for the next task.
    pub async fn recv(&self) -> Option<Task> {
        let task = self.rx.lock().await.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(task)
    }

    /// Tasks queued and not yet picked up by a dispatch loop.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
