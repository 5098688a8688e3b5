use std::net::SocketAddr;
use std::time::Duration;

use crate::scheduler::ledger::{DEFAULT_MAX_JOBS, DEFAULT_RESULT_RETENTION};

/// Tuning for the dispatch loops and the retry policy.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of concurrent dispatch loops pulling from the task queue.
    pub dispatch_loops: usize,
    /// Delay before a worker that just failed a task is eligible again.
    pub cooldown: Duration,
    /// Upper bound on a single remote call.
    pub request_timeout: Duration,
    /// Attempts per task before its job is abandoned. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Jobs the ledger tracks at once before refusing new submissions.
    pub max_jobs: usize,
    /// How long finished results wait to be collected before they are dropped.
    pub result_retention: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dispatch_loops: 64,
            cooldown: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            max_attempts: Some(10),
            max_jobs: DEFAULT_MAX_JOBS,
            result_retention: DEFAULT_RESULT_RETENTION,
        }
    }
}

impl DispatchConfig {
    pub fn with_dispatch_loops(mut self, loops: usize) -> Self {
        self.dispatch_loops = loops.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// `0` is treated as "no limit".
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = if attempts == 0 { None } else { Some(attempts) };
        self
    }

    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs.max(1);
        self
    }

    pub fn with_result_retention(mut self, retention: Duration) -> Self {
        self.result_retention = retention;
        self
    }

    /// True once a task with `attempts` failed dispatches should be given up on.
    pub fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub listen_addr: SocketAddr,
    pub intake_capacity: usize,
    pub dispatch: DispatchConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            intake_capacity: 100,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_intake_capacity(mut self, capacity: usize) -> Self {
        self.intake_capacity = capacity.max(1);
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }
}
