//! Structured engine events
//!
//! Every state transition emits an event through an [`EventSink`]. Events
//! for one workflow carry a monotone per-workflow sequence number and are
//! totally ordered; no ordering is guaranteed across workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::workflow::{StageStatus, WorkflowStatus};

/// Payload of an engine event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Workflow accepted and enqueued
    WorkflowSubmitted { variant: String },

    /// Workflow reached a terminal or paused state
    WorkflowTransitioned {
        from: WorkflowStatus,
        to: WorkflowStatus,
        error_kind: Option<ErrorKind>,
    },

    /// A stage changed status
    StageTransitioned {
        stage: String,
        from: StageStatus,
        to: StageStatus,
        attempt: u32,
        error_kind: Option<ErrorKind>,
        duration_ms: Option<u64>,
    },

    /// An activity attempt started
    ActivityStarted {
        stage: String,
        activity: String,
        attempt: u32,
        provider: Option<String>,
    },

    /// An activity attempt finished
    ActivityFinished {
        stage: String,
        activity: String,
        attempt: u32,
        provider: Option<String>,
        error_kind: Option<ErrorKind>,
        duration_ms: u64,
    },

    /// A provider circuit breaker changed state
    CircuitTransitioned {
        activity: String,
        provider: String,
        from: String,
        to: String,
    },

    /// An artifact was persisted
    ArtifactWritten {
        stage: String,
        kind: String,
        version: u32,
        size: u64,
    },
}

impl EngineEvent {
    /// Short name used for logging and counters
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowSubmitted { .. } => "workflow.submitted",
            Self::WorkflowTransitioned { .. } => "workflow.transitioned",
            Self::StageTransitioned { .. } => "stage.transitioned",
            Self::ActivityStarted { .. } => "activity.started",
            Self::ActivityFinished { .. } => "activity.finished",
            Self::CircuitTransitioned { .. } => "circuit.transitioned",
            Self::ArtifactWritten { .. } => "artifact.written",
        }
    }
}

/// An event stamped with its workflow and sequence number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub workflow_id: Uuid,

    /// Monotone per-workflow sequence number
    pub seq: u64,

    pub at: DateTime<Utc>,

    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Sink for engine events
///
/// Implementations must be cheap; the scheduler emits on its hot path.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: SequencedEvent);
}

/// Sink that logs every event through `tracing`
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SequencedEvent) {
        tracing::info!(
            workflow_id = %event.workflow_id,
            seq = event.seq,
            event = event.event.name(),
            payload = %serde_json::to_string(&event.event).unwrap_or_default(),
            "engine event"
        );
    }
}

/// Sink that records events in memory, for tests
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: parking_lot::Mutex<Vec<SequencedEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<SequencedEvent> {
        self.events.lock().clone()
    }

    /// Events for one workflow, in emission order
    pub fn events_for(&self, workflow_id: Uuid) -> Vec<SequencedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: SequencedEvent) {
        self.events.lock().push(event);
    }
}
