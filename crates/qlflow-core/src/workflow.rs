//! Workflow and stage data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, ErrorKind};

/// Largest accepted prompt, in bytes
pub const MAX_PROMPT_BYTES: usize = 64 * 1024;

/// Pipeline variant selecting the stage list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// Five-stage generation pipeline
    Basic,

    /// Twelve-stage pipeline with analysis and packaging stages
    Extended,
}

impl std::fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Extended => write!(f, "extended"),
        }
    }
}

impl std::str::FromStr for PipelineVariant {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Self::Basic),
            "extended" => Ok(Self::Extended),
            other => Err(EngineError::invalid_argument(format!(
                "unknown pipeline variant: {other}"
            ))),
        }
    }
}

/// Declared type of the project to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    Api,
    Web,
    Cli,
    Library,
    Function,
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api => write!(f, "api"),
            Self::Web => write!(f, "web"),
            Self::Cli => write!(f, "cli"),
            Self::Library => write!(f, "library"),
            Self::Function => write!(f, "function"),
        }
    }
}

/// User-submitted workflow input
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WorkflowInput {
    /// Natural-language requirement
    pub prompt: String,

    /// Declared target language (e.g. "python", "go", "rust")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Declared project type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_type: Option<ProjectType>,

    /// Optional free-form requirements map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub requirements: Option<serde_json::Map<String, serde_json::Value>>,

    /// Whether the extended pipeline should generate tests
    #[serde(default = "default_true")]
    pub generate_tests: bool,
}

fn default_true() -> bool {
    true
}

impl WorkflowInput {
    /// Create an input with only a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            language: None,
            project_type: None,
            requirements: None,
            generate_tests: true,
        }
    }

    /// Set the target language
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the project type
    pub fn with_project_type(mut self, project_type: ProjectType) -> Self {
        self.project_type = Some(project_type);
        self
    }

    /// Structural validation applied before any workflow is created
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty prompt or a prompt over
    /// [`MAX_PROMPT_BYTES`].
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.prompt.trim().is_empty() {
            return Err(EngineError::invalid_argument("prompt must not be empty"));
        }
        if self.prompt.len() > MAX_PROMPT_BYTES {
            return Err(EngineError::invalid_argument(format!(
                "prompt exceeds maximum size of {MAX_PROMPT_BYTES} bytes"
            )));
        }
        Ok(())
    }

    /// Target language, defaulting to python
    pub fn language_or_default(&self) -> &str {
        self.language.as_deref().unwrap_or("python")
    }
}

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but not yet picked up by a scheduler
    Pending,

    /// Owned by a scheduler and progressing through stages
    Running,

    /// Paused between stages
    Paused,

    /// All stages terminal, last stage succeeded
    Completed,

    /// A required stage failed
    Failed,

    /// Cancellation honored between stages
    Cancelled,
}

impl WorkflowStatus {
    /// Whether the workflow can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(EngineError::internal(format!(
                "unknown workflow status: {other}"
            ))),
        }
    }
}

/// Per-stage execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Whether the stage can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Legal transitions: NotStarted -> InProgress -> {Succeeded, Failed},
    /// NotStarted -> Skipped. Terminal states are immutable.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        match (self, next) {
            (Self::NotStarted, Self::InProgress) => true,
            (Self::NotStarted, Self::Skipped) => true,
            (Self::NotStarted, Self::Failed) => true,
            (Self::InProgress, Self::Succeeded) => true,
            (Self::InProgress, Self::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for StageStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(EngineError::internal(format!(
                "unknown stage status: {other}"
            ))),
        }
    }
}

/// Execution record for one stage of one workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage ordinal within the pipeline (0-based)
    pub ord: u32,

    /// Stage name from the pipeline definition
    pub name: String,

    /// Current status
    pub status: StageStatus,

    /// Number of attempts made so far
    pub attempts: u32,

    /// Kind of the last error, if any
    pub error_kind: Option<ErrorKind>,

    /// Message of the last error, if any
    pub error_message: Option<String>,

    /// When the stage entered InProgress
    pub started_at: Option<DateTime<Utc>>,

    /// When the stage reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,

    /// Reference to the produced artifact, if the stage defines one
    pub artifact_id: Option<Uuid>,
}

impl StageRecord {
    /// Fresh record for a pipeline stage
    pub fn new(ord: u32, name: impl Into<String>) -> Self {
        Self {
            ord,
            name: name.into(),
            status: StageStatus::NotStarted,
            attempts: 0,
            error_kind: None,
            error_message: None,
            started_at: None,
            finished_at: None,
            artifact_id: None,
        }
    }
}

/// A workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Globally unique id
    pub id: Uuid,

    /// Pipeline variant this instance runs
    pub variant: PipelineVariant,

    /// Submitted input
    pub input: WorkflowInput,

    /// Lifecycle status
    pub status: WorkflowStatus,

    /// Index of the stage currently executing (or next to execute)
    pub current_stage: u32,

    /// Terminal error kind, if the workflow failed
    pub error_kind: Option<ErrorKind>,

    /// Terminal error message, if the workflow failed
    pub error_message: Option<String>,

    /// Next event sequence number for this workflow
    pub event_seq: u64,

    /// Accumulated model cost in USD
    pub cost_usd: f64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Child stage records, one per pipeline stage, in order
    pub stages: Vec<StageRecord>,
}

impl WorkflowRecord {
    /// Create a pending workflow with NotStarted stage records
    pub fn new(variant: PipelineVariant, input: WorkflowInput, stage_names: &[&str]) -> Self {
        let stages = stage_names
            .iter()
            .enumerate()
            .map(|(i, name)| StageRecord::new(i as u32, *name))
            .collect();

        Self {
            id: Uuid::now_v7(),
            variant,
            input,
            status: WorkflowStatus::Pending,
            current_stage: 0,
            error_kind: None,
            error_message: None,
            event_seq: 0,
            cost_usd: 0.0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            stages,
        }
    }

    /// Look up a stage record by name
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prompt_rejected() {
        let input = WorkflowInput::new("   ");
        let err = input.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_prompt_size_boundary() {
        let at_max = WorkflowInput::new("x".repeat(MAX_PROMPT_BYTES));
        assert!(at_max.validate().is_ok());

        let over = WorkflowInput::new("x".repeat(MAX_PROMPT_BYTES + 1));
        let err = over.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_stage_transitions() {
        use StageStatus::*;

        assert!(NotStarted.can_transition_to(InProgress));
        assert!(NotStarted.can_transition_to(Skipped));
        assert!(InProgress.can_transition_to(Succeeded));
        assert!(InProgress.can_transition_to(Failed));

        // Terminal states are immutable
        assert!(!Succeeded.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(!Skipped.can_transition_to(InProgress));
        // No going backwards
        assert!(!InProgress.can_transition_to(NotStarted));
    }

    #[test]
    fn test_workflow_record_creation() {
        let record = WorkflowRecord::new(
            PipelineVariant::Basic,
            WorkflowInput::new("add two numbers"),
            &["enhance_prompt", "generate_code"],
        );

        assert_eq!(record.status, WorkflowStatus::Pending);
        assert_eq!(record.stages.len(), 2);
        assert_eq!(record.stages[1].ord, 1);
        assert_eq!(record.stages[1].status, StageStatus::NotStarted);
        assert!(record.stage("generate_code").is_some());
        assert!(record.stage("missing").is_none());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Paused,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            let parsed: WorkflowStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
    }
}
