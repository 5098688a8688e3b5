use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Job already open in ledger: {0}")]
    DuplicateJob(Uuid),

    #[error("Job not found in ledger: {0}")]
    UnknownJob(Uuid),

    #[error("Result slot {index} out of range for job {job_id} (expected {expected} results)")]
    SlotOutOfRange {
        job_id: Uuid,
        index: usize,
        expected: usize,
    },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Dispatch to {hostname} failed: {reason}")]
    DispatchTransport { hostname: String, reason: String },

    #[error("Job {job_id} abandoned: {reason}")]
    JobAbandoned { job_id: Uuid, reason: String },

    #[error("Job intake queue is full")]
    IntakeFull,

    #[error("Job intake is closed")]
    IntakeClosed,

    #[error("Job ledger is full ({0} jobs tracked)")]
    LedgerFull(usize),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SupervisorError {
    /// Transport-level failures are recovered by the dispatcher and never
    /// reach a submitter.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SupervisorError::DispatchTransport { .. } | SupervisorError::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
