pub mod decomposer;
pub mod dispatcher;
pub mod heap;
pub mod job;
pub mod ledger;
pub mod pool;
pub mod queue;
pub mod supervisor;

pub use decomposer::decompose;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use job::{Job, JobResults, Payload, Registration, Task, Worker};
pub use ledger::{JobLedger, RecordOutcome, Retrieval};
pub use pool::{ReleaseStatus, WorkerPool};
pub use queue::TaskQueue;
pub use supervisor::{Scheduler, SchedulerStatus, SubmissionSender, Supervisor};
