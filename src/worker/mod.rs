//! Supervisor side of the worker protocol.
//!
//! Workers are remote executors. The supervisor only needs to hand one task
//! at a time to a worker and read back its result:
//!
//! - [`WorkerClient`]: the seam the dispatcher calls through
//! - [`HttpWorkerClient`]: `POST http://<hostname>/newjob` with the
//!   single-task job as JSON; a 2xx body is the task's result
//!
//! Anything else (connection refused, timeout, non-2xx) is a transport
//! failure and the task goes back on the queue.

pub mod client;

pub use client::{HttpWorkerClient, WorkerClient};
