use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SupervisorError};

/// Upper bound on the number of tasks a single parameterized job may expand to.
pub const MAX_TASKS_PER_JOB: u64 = 100_000;

/// The executable part of a job, shipped verbatim to workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub code: Vec<u8>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// A client-submitted unit of work.
///
/// A job is parameterized when `parameter_start <= parameter_end`: one task
/// runs per integer of the inclusive range. Otherwise it is replicated: the
/// payload runs `repeat` times, or once per idle worker when `repeat` is 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub machines: u32,
    #[serde(default = "unparameterized_start")]
    pub parameter_start: i64,
    #[serde(default)]
    pub parameter_end: i64,
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(default)]
    pub repeat: u32,
}

fn unparameterized_start() -> i64 {
    1
}

impl Job {
    /// A replicated job: `repeat` runs of `payload` (0 = one per idle worker).
    pub fn replicated(payload: Payload, repeat: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            submitted_at: Utc::now(),
            machines: 0,
            parameter_start: 1,
            parameter_end: 0,
            payload,
            repeat,
        }
    }

    /// A parameterized job over the inclusive range `[start, end]`.
    pub fn parameterized(payload: Payload, start: i64, end: i64) -> Self {
        Self {
            parameter_start: start,
            parameter_end: end,
            ..Self::replicated(payload, 0)
        }
    }

    pub fn is_parameterized(&self) -> bool {
        self.parameter_start <= self.parameter_end
    }

    /// Number of integers covered by the parameter range, 0 when not parameterized.
    /// A range spanning all of `i64` saturates at `u64::MAX`.
    pub fn range_len(&self) -> u64 {
        if self.is_parameterized() {
            self.parameter_end
                .abs_diff(self.parameter_start)
                .saturating_add(1)
        } else {
            0
        }
    }

    /// Rejects submissions that must never enter the task queue.
    pub fn validate(&self) -> Result<()> {
        if self.is_parameterized() {
            if self.repeat > 1 {
                return Err(SupervisorError::InvalidJob(format!(
                    "job {} sets both a parameter range and a repeat count of {}",
                    self.id, self.repeat
                )));
            }
            if self.range_len() > MAX_TASKS_PER_JOB {
                return Err(SupervisorError::InvalidJob(format!(
                    "parameter range [{}, {}] exceeds {} tasks",
                    self.parameter_start, self.parameter_end, MAX_TASKS_PER_JOB
                )));
            }
        } else if u64::from(self.repeat) > MAX_TASKS_PER_JOB {
            return Err(SupervisorError::InvalidJob(format!(
                "repeat count {} exceeds {} tasks",
                self.repeat, MAX_TASKS_PER_JOB
            )));
        }
        Ok(())
    }
}

/// One independently dispatchable slice of a [`Job`].
#[derive(Debug, Clone)]
pub struct Task {
    pub job_id: Uuid,
    /// Position in the decomposition; doubles as the ledger result slot.
    pub index: usize,
    pub payload: Arc<Payload>,
    pub parameterized: bool,
    pub parameter: i64,
    pub attempts: u32,
}

impl Task {
    /// The single-task job sent to a worker's `/newjob` endpoint.
    pub fn to_remote_job(&self) -> Job {
        let (start, end) = if self.parameterized {
            (self.parameter, self.parameter)
        } else {
            (1, 0)
        };
        Job {
            id: self.job_id,
            submitted_at: Utc::now(),
            machines: 1,
            parameter_start: start,
            parameter_end: end,
            payload: (*self.payload).clone(),
            repeat: 1,
        }
    }
}

/// Metadata a worker reports when it joins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(alias = "Hostname")]
    pub hostname: String,
    #[serde(alias = "Cores", default)]
    pub cores: u32,
    #[serde(alias = "ModelName", default)]
    pub model_name: String,
    /// MHz.
    #[serde(alias = "CpuSpeed", default)]
    pub cpu_speed: f64,
    /// MB.
    #[serde(alias = "MemAvailable", default)]
    pub mem_available: u64,
}

const SERVER_CLASS_MODELS: [&str; 3] = ["Xeon", "EPYC", "Threadripper"];

impl Registration {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }

    /// Dispatch priority derived from the reported hardware; higher goes first.
    pub fn priority(&self) -> u64 {
        let cores = u64::from(self.cores) * 1000;
        let speed = if self.cpu_speed.is_finite() && self.cpu_speed > 0.0 {
            self.cpu_speed.round() as u64
        } else {
            0
        };
        let memory = self.mem_available / 1024 * 10;
        let class_bonus = if SERVER_CLASS_MODELS
            .iter()
            .any(|m| self.model_name.contains(m))
        {
            500
        } else {
            0
        };
        cores + speed + memory + class_bonus
    }
}

/// A registered remote executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: u64,
    pub hostname: String,
    pub busy: bool,
    pub priority: u64,
    #[serde(skip)]
    pub consecutive_failures: u32,
    #[serde(skip)]
    pub registration: Registration,
}

/// Aggregated results of a completed job, ordered by task index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: Uuid,
    pub results: Vec<String>,
}
