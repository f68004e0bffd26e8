//! In-memory implementation of WorkflowStore for testing

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use qlflow_core::{ActivityRecord, WorkflowRecord, WorkflowStatus};
use uuid::Uuid;

use super::store::{ControlFlags, StoreError, WorkflowStore};

struct LeaseState {
    owner: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    workflows: HashMap<Uuid, WorkflowRecord>,
    activities: Vec<ActivityRecord>,
    flags: HashMap<Uuid, ControlFlags>,
    leases: HashMap<Uuid, LeaseState>,

    /// Submission order, for list()
    order: Vec<Uuid>,
}

/// In-memory workflow store
///
/// Provides the same semantics as the PostgreSQL implementation,
/// including lease fencing on checkpoint writes.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    inner: RwLock<Inner>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forcibly expire a lease (test hook for crash simulation)
    pub fn expire_lease(&self, workflow_id: Uuid) {
        let mut inner = self.inner.write();
        if let Some(lease) = inner.leases.get_mut(&workflow_id) {
            lease.expires_at = Instant::now() - Duration::from_secs(1);
        }
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn create_workflow(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.order.push(record.id);
        inner.workflows.insert(record.id, record.clone());
        inner.flags.insert(record.id, ControlFlags::default());
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowRecord, StoreError> {
        self.inner
            .read()
            .workflows
            .get(&workflow_id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkflowRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.workflows.get(id))
            .filter(|w| status.map(|s| w.status == s).unwrap_or(true))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn checkpoint(&self, record: &WorkflowRecord, owner: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();

        match inner.leases.get(&record.id) {
            Some(lease) if lease.owner == owner && lease.expires_at > Instant::now() => {}
            _ => {
                return Err(StoreError::LeaseNotHeld {
                    workflow_id: record.id,
                    owner: owner.to_string(),
                })
            }
        }

        if !inner.workflows.contains_key(&record.id) {
            return Err(StoreError::WorkflowNotFound(record.id));
        }
        inner.workflows.insert(record.id, record.clone());
        Ok(())
    }

    async fn append_activity(&self, record: &ActivityRecord) -> Result<(), StoreError> {
        self.inner.write().activities.push(record.clone());
        Ok(())
    }

    async fn list_activities(&self, workflow_id: Uuid) -> Result<Vec<ActivityRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .activities
            .iter()
            .filter(|a| a.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn request_cancel(&self, workflow_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.workflows.contains_key(&workflow_id) {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }
        inner.flags.entry(workflow_id).or_default().cancel_requested = true;
        Ok(())
    }

    async fn request_pause(&self, workflow_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.workflows.contains_key(&workflow_id) {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }
        inner.flags.entry(workflow_id).or_default().pause_requested = true;
        Ok(())
    }

    async fn clear_pause(&self, workflow_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.workflows.contains_key(&workflow_id) {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }
        inner.flags.entry(workflow_id).or_default().pause_requested = false;
        Ok(())
    }

    async fn control_flags(&self, workflow_id: Uuid) -> Result<ControlFlags, StoreError> {
        self.inner
            .read()
            .flags
            .get(&workflow_id)
            .copied()
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn acquire_lease(
        &self,
        workflow_id: Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let now = Instant::now();

        match inner.leases.get(&workflow_id) {
            Some(lease) if lease.owner != owner && lease.expires_at > now => Ok(false),
            _ => {
                inner.leases.insert(
                    workflow_id,
                    LeaseState {
                        owner: owner.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn renew_lease(
        &self,
        workflow_id: Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let now = Instant::now();

        match inner.leases.get_mut(&workflow_id) {
            Some(lease) if lease.owner == owner && lease.expires_at > now => {
                lease.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, workflow_id: Uuid, owner: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(lease) = inner.leases.get(&workflow_id) {
            if lease.owner == owner {
                inner.leases.remove(&workflow_id);
            }
        }
        Ok(())
    }
}
