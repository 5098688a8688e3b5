use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::scheduler::{Scheduler, Supervisor};
use crate::worker::{HttpWorkerClient, WorkerClient};

/// The supervisor process: scheduler, dispatch loops, intake loop and HTTP server.
pub struct Node {
    pub config: SupervisorConfig,
    pub scheduler: Scheduler,
    client: Arc<dyn WorkerClient>,
}

impl Node {
    /// A node that reaches workers over HTTP.
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        let client = HttpWorkerClient::new(config.dispatch.request_timeout)?;
        Ok(Self::with_client(config, Arc::new(client)))
    }

    pub fn with_client(config: SupervisorConfig, client: Arc<dyn WorkerClient>) -> Self {
        Self {
            scheduler: Scheduler::new(config.dispatch.clone()),
            config,
            client,
        }
    }

    /// Run every component until `cancel` fires.
    ///
    /// 1. Spawns the dispatch loops (one per configured slot)
    /// 2. Spawns the ledger sweeper that drops uncollected results
    /// 3. Spawns the supervisor intake loop
    /// 4. Runs the HTTP intake server (blocking)
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP listener cannot be bound or fails.
    pub async fn run(
        self,
        cancel: CancellationToken,
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dispatchers = self.scheduler.spawn_dispatchers(self.client.clone(), &cancel);
        let sweeper = self.scheduler.spawn_sweeper(&cancel);

        let (supervisor, intake) =
            Supervisor::new(self.scheduler.clone(), self.config.intake_capacity);
        let supervisor_handle = tokio::spawn(supervisor.run(cancel.child_token()));

        let state = ApiState {
            scheduler: self.scheduler.clone(),
            intake,
        };
        let served = run_api(self.config.listen_addr, state, cancel.clone()).await;

        cancel.cancel();
        if let Err(e) = supervisor_handle.await {
            tracing::warn!(error = %e, "Supervisor loop ended abnormally");
        }
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "Ledger sweeper ended abnormally");
        }
        for handle in dispatchers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Dispatch loop ended abnormally");
            }
        }

        let status = self.scheduler.status().await;
        tracing::info!(
            pending_tasks = status.pending_tasks,
            jobs_in_flight = status.jobs_in_flight,
            "Supervisor stopped"
        );

        served?;
        Ok(())
    }
}
