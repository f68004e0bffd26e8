//! In-process workflow runner
//!
//! Spawns one task per workflow against the shared scheduler. Cross-
//! workflow parallelism is the throughput source; within a workflow,
//! stages run sequentially on a single task.

use std::sync::Arc;

use qlflow_core::{EngineError, PipelineVariant, WorkflowInput, WorkflowRecord, WorkflowStatus};
use qlflow_engine::{Scheduler, WorkflowStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Drives workflows in-process
pub struct Runner {
    scheduler: Arc<Scheduler>,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            shutdown: CancellationToken::new(),
        }
    }

    /// The underlying scheduler
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Submit a workflow and start driving it in the background
    #[instrument(skip(self, input))]
    pub async fn submit(
        &self,
        variant: PipelineVariant,
        input: WorkflowInput,
    ) -> Result<WorkflowRecord, EngineError> {
        let record = self.scheduler.submit(variant, input).await?;
        self.spawn(record.id);
        Ok(record)
    }

    /// Spawn a driving task for an existing workflow
    pub fn spawn(&self, workflow_id: Uuid) {
        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown.child_token();

        tokio::spawn(async move {
            if let Err(err) = scheduler.run_workflow(workflow_id, shutdown).await {
                error!(%workflow_id, error = %err, "workflow run aborted");
            }
        });
    }

    /// Request cooperative cancellation of a workflow
    pub async fn cancel(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        Ok(self.scheduler.store().request_cancel(workflow_id).await?)
    }

    /// Pause a workflow at the next inter-stage boundary
    pub async fn pause(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        Ok(self.scheduler.store().request_pause(workflow_id).await?)
    }

    /// Resume a paused workflow
    pub async fn resume(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        self.scheduler.store().clear_pause(workflow_id).await?;
        self.spawn(workflow_id);
        Ok(())
    }

    /// Re-spawn drivers for workflows left non-terminal by a previous
    /// process (crash recovery at startup)
    pub async fn resume_incomplete(&self) -> Result<usize, EngineError> {
        let mut resumed = 0;
        for status in [WorkflowStatus::Pending, WorkflowStatus::Running] {
            let stranded = self
                .scheduler
                .store()
                .list_workflows(Some(status), 1000, 0)
                .await?;
            for workflow in stranded {
                self.spawn(workflow.id);
                resumed += 1;
            }
        }
        if resumed > 0 {
            info!(resumed, "resuming incomplete workflows");
        }
        Ok(resumed)
    }

    /// Signal every driving task to stop at its next cancellation point
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
