//! # Durable orchestration engine
//!
//! A lease-fenced workflow scheduler for multi-stage generation
//! pipelines, with per-stage retry/backoff, circuit-broken and
//! cost-aware provider dispatch, bulkhead isolation, and durable stage
//! checkpoints.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                            │
//! │   (drives pipeline stages, owns the workflow lease)         │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │ WorkflowStore  │  │ ProviderDispatch │  │  ArtifactStore   │
//! │ (checkpoints,  │  │ (health, circuit,│  │ (versioned drops,│
//! │  leases)       │  │  cost ledger)    │  │  content-addr)   │
//! └────────────────┘  └──────────────────┘  └──────────────────┘
//! ```
//!
//! Execution is at-least-once with idempotent observable effect: the
//! combination of workflow lease, stage-level durable checkpoints, and
//! artifact versioning means a replayed stage writes an additional
//! artifact version and never corrupts state.

pub mod dispatch;
pub mod persistence;
pub mod reliability;
pub mod scheduler;

/// Prelude for common imports
pub mod prelude {
    pub use crate::dispatch::{CostLedger, Dispatched, ModelUsage, ProviderDispatcher};
    pub use crate::persistence::{
        ControlFlags, MemoryWorkflowStore, PostgresWorkflowStore, StoreError, WorkflowStore,
    };
    pub use crate::reliability::{Bulkhead, BulkheadRegistry, CircuitBreaker, RetryPolicy};
    pub use crate::scheduler::{
        ActivityRegistry, Scheduler, StageActivity, StageContext, StageOutput,
    };
}

pub use dispatch::{
    CostLedger, Dispatched, HealthRegistry, HealthSnapshot, ModelUsage, ProviderAttempt,
    ProviderDispatcher,
};
pub use persistence::{
    ControlFlags, MemoryWorkflowStore, PostgresWorkflowStore, StoreError, WorkflowStore,
};
pub use reliability::{Admission, Bulkhead, BulkheadRegistry, CircuitBreaker, CircuitState, RetryPolicy};
pub use scheduler::{ActivityRegistry, Scheduler, StageActivity, StageContext, StageOutput};
