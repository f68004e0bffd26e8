//! Stage activity contract and execution context

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qlflow_core::pipeline::StageDef;
use qlflow_core::{Artifact, ArtifactKind, EngineError, WorkflowRecord};
use qlflow_store::ArtifactStore;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{CostLedger, ProviderAttempt, ProviderDispatcher};

/// Output of one stage activity attempt
#[derive(Debug, Default)]
pub struct StageOutput {
    /// Artifact content, for stages that define an artifact kind
    pub content: Option<Vec<u8>>,

    /// Overrides the kind's default content type when set
    pub content_type: Option<String>,

    /// Provider that produced the content, for model stages
    pub provider: Option<String>,

    /// Provider attempts made inside the activity, for audit records
    pub attempts: Vec<ProviderAttempt>,

    /// Model cost charged by this attempt
    pub cost_usd: f64,
}

impl StageOutput {
    /// Output carrying artifact content
    pub fn with_content(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Output with no artifact (validation-style stages)
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A stage activity invokes one external specialist service
///
/// Activities are stateless; everything per-invocation arrives through
/// the [`StageContext`]. Return retryable error kinds for transient
/// failures; the scheduler owns the retry loop.
#[async_trait]
pub trait StageActivity: Send + Sync + 'static {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, EngineError>;
}

/// Context handed to a stage activity for one attempt
pub struct StageContext {
    /// Snapshot of the owning workflow
    pub workflow: WorkflowRecord,

    /// Definition of the executing stage
    pub stage: StageDef,

    /// Attempt number, 1-based
    pub attempt: u32,

    /// Deadline for this attempt; the activity is cancelled when it
    /// elapses
    pub deadline: Duration,

    /// Cancellation signal; fired on deadline elapse or worker shutdown
    pub cancel: CancellationToken,

    pub(crate) artifacts: Arc<dyn ArtifactStore>,
    pub(crate) dispatcher: Arc<ProviderDispatcher>,
    pub(crate) ledger: Arc<CostLedger>,
    pub(crate) model_attempts: u32,
    pub(crate) probe_probability: f64,
    pub(crate) max_tokens: u32,
}

impl StageContext {
    /// The provider dispatcher, for model stages
    pub fn dispatcher(&self) -> &Arc<ProviderDispatcher> {
        &self.dispatcher
    }

    /// The workflow's cost ledger
    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// Attempt budget for a provider fallback chain
    pub fn model_attempts(&self) -> u32 {
        self.model_attempts
    }

    /// Probability of admitting a half-open probe
    pub fn probe_probability(&self) -> f64 {
        self.probe_probability
    }

    /// Maximum tokens requested per generation call
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Declared provider affinity from the workflow requirements, if any
    pub fn provider_affinity(&self) -> Option<String> {
        self.workflow
            .input
            .requirements
            .as_ref()
            .and_then(|r| r.get("provider"))
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Latest artifact of `kind` produced by any earlier stage
    ///
    /// Scans the pipeline definition in order, so the producing stage
    /// does not need to be named.
    pub async fn artifact_of_kind(
        &self,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, EngineError> {
        for def in qlflow_core::pipeline::stages(self.workflow.variant) {
            if def.artifact_kind == Some(kind) {
                if let Some(artifact) = self
                    .artifacts
                    .get_latest(self.workflow.id, def.name, kind)
                    .await?
                {
                    return Ok(Some(artifact));
                }
            }
        }
        Ok(None)
    }

    /// Latest artifact of `kind` produced by a specific stage
    pub async fn artifact_from(
        &self,
        stage: &str,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, EngineError> {
        Ok(self.artifacts.get_latest(self.workflow.id, stage, kind).await?)
    }

    /// UTF-8 content of the latest artifact of `kind`, failing when absent
    ///
    /// Used by stages whose gates guarantee the artifact exists.
    pub async fn require_artifact_utf8(&self, kind: ArtifactKind) -> Result<String, EngineError> {
        self.artifact_of_kind(kind)
            .await?
            .map(|a| a.content_utf8())
            .ok_or_else(|| {
                EngineError::internal(format!(
                    "required {kind} artifact missing for workflow {}",
                    self.workflow.id
                ))
            })
    }
}

/// Registry mapping activity names to implementations
#[derive(Default)]
pub struct ActivityRegistry {
    activities: std::collections::HashMap<&'static str, Arc<dyn StageActivity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity under its name
    pub fn register(&mut self, name: &'static str, activity: Arc<dyn StageActivity>) {
        self.activities.insert(name, activity);
    }

    /// Look up an activity
    pub fn get(&self, name: &str) -> Option<Arc<dyn StageActivity>> {
        self.activities.get(name).cloned()
    }

    /// Registered activity names
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.activities.keys().copied().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl StageActivity for Noop {
        async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, EngineError> {
            Ok(StageOutput::empty())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ActivityRegistry::new();
        registry.register("enhance_prompt", Arc::new(Noop));

        assert!(registry.get("enhance_prompt").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["enhance_prompt"]);
    }

    #[test]
    fn test_stage_output_builders() {
        let output = StageOutput::with_content("hello");
        assert_eq!(output.content.as_deref(), Some(b"hello".as_ref()));

        let empty = StageOutput::empty();
        assert!(empty.content.is_none());
    }
}
