//! WorkflowStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use qlflow_core::{ActivityRecord, EngineError, WorkflowRecord, WorkflowStatus};
use uuid::Uuid;

/// Error type for workflow store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Caller does not hold the workflow lease
    #[error("lease for workflow {workflow_id} not held by {owner}")]
    LeaseNotHeld { workflow_id: Uuid, owner: String },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WorkflowNotFound(id) => {
                EngineError::not_found(format!("workflow {id} not found"))
            }
            StoreError::LeaseNotHeld { .. } => EngineError::internal(err.to_string()),
            StoreError::Database(msg) | StoreError::Serialization(msg) => {
                EngineError::internal(format!("workflow store: {msg}"))
            }
        }
    }
}

/// Control flags requested through the API, honored between stages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlags {
    pub cancel_requested: bool,
    pub pause_requested: bool,
}

/// Store for workflow state, stage checkpoints, and scheduler leases
///
/// Implementations must be thread-safe. Writes for a given workflow are
/// serialized by the owning scheduler holding the lease; `checkpoint`
/// verifies lease ownership so a worker that lost its lease cannot write.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // =========================================================================
    // Workflow Operations
    // =========================================================================

    /// Persist a newly submitted workflow
    async fn create_workflow(&self, record: &WorkflowRecord) -> Result<(), StoreError>;

    /// Load a workflow with its stage records
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowRecord, StoreError>;

    /// List workflows, newest first
    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkflowRecord>, StoreError>;

    /// Durably write the full workflow state (stage checkpoint)
    ///
    /// The caller must hold the lease as `owner`; the write is rejected
    /// with [`StoreError::LeaseNotHeld`] otherwise. This is the fencing
    /// point: a worker that lost its lease ceases side effects here.
    async fn checkpoint(&self, record: &WorkflowRecord, owner: &str) -> Result<(), StoreError>;

    // =========================================================================
    // Activity Records
    // =========================================================================

    /// Append an activity call record
    async fn append_activity(&self, record: &ActivityRecord) -> Result<(), StoreError>;

    /// All activity records for a workflow, oldest first
    async fn list_activities(&self, workflow_id: Uuid) -> Result<Vec<ActivityRecord>, StoreError>;

    // =========================================================================
    // Control Flags
    // =========================================================================

    /// Request cooperative cancellation
    async fn request_cancel(&self, workflow_id: Uuid) -> Result<(), StoreError>;

    /// Request a pause at the next inter-stage boundary
    async fn request_pause(&self, workflow_id: Uuid) -> Result<(), StoreError>;

    /// Clear a pause request (resume)
    async fn clear_pause(&self, workflow_id: Uuid) -> Result<(), StoreError>;

    /// Read the control flags
    async fn control_flags(&self, workflow_id: Uuid) -> Result<ControlFlags, StoreError>;

    // =========================================================================
    // Scheduler Lease
    // =========================================================================

    /// Try to take the scheduler lease for a workflow
    ///
    /// Returns false when another live owner holds it. An expired lease
    /// may be taken over.
    async fn acquire_lease(
        &self,
        workflow_id: Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Extend a held lease; returns false when the lease was lost
    async fn renew_lease(
        &self,
        workflow_id: Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Release a held lease
    async fn release_lease(&self, workflow_id: Uuid, owner: &str) -> Result<(), StoreError>;
}
