//! Workflow submission and status routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use qlflow_core::{
    ErrorKind, PipelineVariant, ProjectType, StageStatus, WorkflowInput, WorkflowRecord,
    WorkflowStatus,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::{ApiError, AppState};

/// Request to submit a workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateRequest {
    pub prompt: String,

    #[serde(default)]
    pub language: Option<String>,

    #[serde(default, rename = "type")]
    pub project_type: Option<ProjectType>,

    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub requirements: Option<serde_json::Map<String, serde_json::Value>>,

    /// Extended pipeline only
    #[serde(default)]
    pub generate_tests: Option<bool>,
}

impl GenerateRequest {
    fn into_input(self) -> WorkflowInput {
        WorkflowInput {
            prompt: self.prompt,
            language: self.language,
            project_type: self.project_type,
            requirements: self.requirements,
            generate_tests: self.generate_tests.unwrap_or(true),
        }
    }
}

/// Submission acknowledgement
#[derive(Debug, Serialize, ToSchema)]
pub struct GenerateResponse {
    pub workflow_id: Uuid,
    pub status: &'static str,
}

/// One stage in a status response
#[derive(Debug, Serialize, ToSchema)]
pub struct StageView {
    pub name: String,
    pub status: StageStatus,
    pub attempts: u32,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Workflow status response
#[derive(Debug, Serialize, ToSchema)]
pub struct WorkflowView {
    pub id: Uuid,
    pub variant: PipelineVariant,
    pub status: WorkflowStatus,
    pub current_stage: u32,
    pub stages: Vec<StageView>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl From<WorkflowRecord> for WorkflowView {
    fn from(record: WorkflowRecord) -> Self {
        Self {
            id: record.id,
            variant: record.variant,
            status: record.status,
            current_stage: record.current_stage,
            stages: record
                .stages
                .into_iter()
                .map(|s| StageView {
                    name: s.name,
                    status: s.status,
                    attempts: s.attempts,
                    started: s.started_at,
                    finished: s.finished_at,
                    error_kind: s.error_kind,
                })
                .collect(),
            error_kind: record.error_kind,
        }
    }
}

/// Query parameters for listing workflows
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListWorkflowsParams {
    pub status: Option<WorkflowStatus>,

    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows/generate", post(generate))
        .route("/api/v1/workflows/generate-extended", post(generate_extended))
        .route("/api/v1/workflows", get(list_workflows))
        .route("/api/v1/workflows/:id", get(get_workflow))
        .route("/api/v1/workflows/:id/cancel", post(cancel_workflow))
        .with_state(state)
}

/// POST /api/v1/workflows/generate - Submit a basic workflow
#[utoipa::path(
    post,
    path = "/api/v1/workflows/generate",
    request_body = GenerateRequest,
    responses(
        (status = 201, description = "Workflow started", body = GenerateResponse),
        (status = 400, description = "Invalid input", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError> {
    submit(state, PipelineVariant::Basic, req).await
}

/// POST /api/v1/workflows/generate-extended - Submit an extended workflow
#[utoipa::path(
    post,
    path = "/api/v1/workflows/generate-extended",
    request_body = GenerateRequest,
    responses(
        (status = 201, description = "Workflow started", body = GenerateResponse),
        (status = 400, description = "Invalid input", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn generate_extended(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError> {
    submit(state, PipelineVariant::Extended, req).await
}

async fn submit(
    state: AppState,
    variant: PipelineVariant,
    req: GenerateRequest,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError> {
    let record = state.runner.submit(variant, req.into_input()).await?;

    tracing::info!(workflow_id = %record.id, %variant, "workflow accepted");
    Ok((
        StatusCode::CREATED,
        Json(GenerateResponse {
            workflow_id: record.id,
            status: "started",
        }),
    ))
}

/// GET /api/v1/workflows - List workflows
#[utoipa::path(
    get,
    path = "/api/v1/workflows",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("limit" = Option<i64>, Query, description = "Max results (default 20)"),
        ("offset" = Option<i64>, Query, description = "Offset for pagination")
    ),
    responses(
        (status = 200, description = "List of workflows", body = Vec<WorkflowView>)
    ),
    tag = "workflows"
)]
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(params): Query<ListWorkflowsParams>,
) -> Result<Json<Vec<WorkflowView>>, ApiError> {
    let records = state
        .store
        .list_workflows(params.status, params.limit, params.offset)
        .await?;
    Ok(Json(records.into_iter().map(WorkflowView::from).collect()))
}

/// GET /api/v1/workflows/:id - Workflow status
#[utoipa::path(
    get,
    path = "/api/v1/workflows/{id}",
    params(("id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow status", body = WorkflowView),
        (status = 404, description = "Workflow not found", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowView>, ApiError> {
    let record = state.store.get_workflow(id).await?;
    Ok(Json(record.into()))
}

/// POST /api/v1/workflows/:id/cancel - Request cancellation
#[utoipa::path(
    post,
    path = "/api/v1/workflows/{id}/cancel",
    params(("id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 404, description = "Workflow not found", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.runner.cancel(id).await?;
    tracing::info!(workflow_id = %id, "cancellation requested");
    Ok(StatusCode::ACCEPTED)
}
