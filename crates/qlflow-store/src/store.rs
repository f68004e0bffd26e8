//! ArtifactStore trait definition

use async_trait::async_trait;
use qlflow_core::{Artifact, ArtifactKind, ArtifactMeta, EngineError};
use uuid::Uuid;

/// Error type for artifact store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Artifact not found
    #[error("artifact not found: {0}")]
    NotFound(Uuid),

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
            StoreError::NotFound(id) => EngineError::not_found(format!("artifact {id} not found")),
            StoreError::Database(msg) => EngineError::internal(format!("artifact store: {msg}")),
            StoreError::Serialization(msg) => {
                EngineError::internal(format!("artifact store: {msg}"))
            }
        }
    }
}

/// Write request for one artifact
#[derive(Debug, Clone)]
pub struct PutArtifact {
    pub workflow_id: Uuid,
    pub stage: String,
    pub kind: ArtifactKind,
    pub content: Vec<u8>,

    /// Overrides the kind's default content type when set
    pub content_type: Option<String>,

    /// Weak reference to the producing activity record
    pub producing_activity_id: Option<Uuid>,

    /// Set when the content came from a template fallback
    pub template_fallback: bool,
}

impl PutArtifact {
    pub fn new(
        workflow_id: Uuid,
        stage: impl Into<String>,
        kind: ArtifactKind,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            workflow_id,
            stage: stage.into(),
            kind,
            content: content.into(),
            content_type: None,
            producing_activity_id: None,
            template_fallback: false,
        }
    }

    pub fn with_producing_activity(mut self, id: Uuid) -> Self {
        self.producing_activity_id = Some(id);
        self
    }

    pub fn with_template_fallback(mut self) -> Self {
        self.template_fallback = true;
        self
    }
}

/// Durable, lineage-preserving storage of stage outputs
///
/// Invariants:
/// - `(workflow, stage, kind, version)` is unique; versions per key are a
///   contiguous sequence starting at 1
/// - content is addressed by sha256 and immutable once stored; duplicate
///   content for the same key gets a new version over the same blob
/// - a write is atomic: the artifact is fully visible with its metadata,
///   or not at all
/// - deletes are tombstoned, never in-place
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Store an artifact, assigning the next version for its key
    async fn put(&self, req: PutArtifact) -> Result<ArtifactMeta, StoreError>;

    /// Latest version for a key, if any
    async fn get_latest(
        &self,
        workflow_id: Uuid,
        stage: &str,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, StoreError>;

    /// Fetch an artifact by id
    async fn get_by_id(&self, artifact_id: Uuid) -> Result<Artifact, StoreError>;

    /// All artifact metadata for a workflow, oldest first
    async fn list(&self, workflow_id: Uuid) -> Result<Vec<ArtifactMeta>, StoreError>;

    /// Tombstone an artifact; reads no longer return it
    async fn delete(&self, artifact_id: Uuid) -> Result<(), StoreError>;
}
