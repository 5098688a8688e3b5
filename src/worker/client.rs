use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, SupervisorError};
use crate::scheduler::job::{Job, Worker};

/// Path on a worker that accepts a single-task job.
pub const ENDPOINT_NEW_JOB: &str = "/newjob";

/// Sends one task to one worker and returns the worker's result string.
///
/// Any error is treated by the dispatcher as a transport failure: the task is
/// requeued and the worker is put into cooldown.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn execute(&self, worker: &Worker, job: &Job) -> Result<String>;
}

/// Talks to workers over HTTP: `POST http://<hostname>/newjob`.
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    http: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    fn endpoint(hostname: &str) -> String {
        if hostname.starts_with("http://") || hostname.starts_with("https://") {
            format!("{}{}", hostname.trim_end_matches('/'), ENDPOINT_NEW_JOB)
        } else {
            format!("http://{}{}", hostname, ENDPOINT_NEW_JOB)
        }
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn execute(&self, worker: &Worker, job: &Job) -> Result<String> {
        let url = Self::endpoint(&worker.hostname);
        tracing::debug!(worker_id = worker.id, url = %url, job_id = %job.id, "Sending task");

        let transport = |reason: String| SupervisorError::DispatchTransport {
            hostname: worker.hostname.clone(),
            reason,
        };

        let response = self
            .http
            .post(&url)
            .json(job)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport(format!("worker responded with {status}")));
        }

        response.text().await.map_err(|e| transport(e.to_string()))
    }
}
