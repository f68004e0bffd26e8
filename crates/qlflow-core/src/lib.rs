//! # Core domain types
//!
//! Shared data model for the orchestration and artifact-flow engine:
//! workflows and their stage records, artifacts ("drops"), activity call
//! records, capsules, the error taxonomy, engine events, metrics, and the
//! built-in pipeline definitions.
//!
//! This crate performs no IO; persistence and transport live in the
//! engine, store, and client crates.

pub mod activity;
pub mod artifact;
pub mod capsule;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pipeline;
pub mod workflow;

pub use activity::{idempotency_key, request_digest, ActivityOutcome, ActivityRecord};
pub use artifact::{content_hash, Artifact, ArtifactKind, ArtifactMeta};
pub use capsule::{merkle_root, Capsule, CapsuleFile, CapsuleMetadata, FileKind};
pub use config::{BulkheadParams, CircuitConfig, DeadlineConfig, EngineConfig, RetryParams};
pub use error::{EngineError, ErrorKind};
pub use events::{EngineEvent, EventSink, MemoryEventSink, SequencedEvent, TracingEventSink};
pub use metrics::MetricsRegistry;
pub use pipeline::{stage_names, stages, FailurePolicy, SkipRule, StageDef};
pub use workflow::{
    PipelineVariant, ProjectType, StageRecord, StageStatus, WorkflowInput, WorkflowRecord,
    WorkflowStatus,
};
