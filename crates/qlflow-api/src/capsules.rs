//! Capsule assembly and download routes

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use qlflow_core::CapsuleMetadata;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::{ApiError, AppState};

/// Request to assemble a capsule from a completed workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct FromWorkflowRequest {
    pub workflow_id: Uuid,
}

/// Assembly acknowledgement
#[derive(Debug, Serialize, ToSchema)]
pub struct FromWorkflowResponse {
    pub capsule_id: Uuid,
    pub size: u64,
}

/// Capsule metadata view
#[derive(Debug, Serialize, ToSchema)]
pub struct CapsuleView {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub metadata: CapsuleMetadata,
    pub file_count: usize,
    pub total_size: u64,
    pub content_hash: String,
    pub created: DateTime<Utc>,
}

/// Create capsule routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/capsules/from-workflow", post(from_workflow))
        .route("/api/v1/capsules/:id", get(get_capsule))
        .route("/api/v1/capsules/:id/download", get(download_capsule))
        .with_state(state)
}

/// POST /api/v1/capsules/from-workflow - Assemble a capsule
#[utoipa::path(
    post,
    path = "/api/v1/capsules/from-workflow",
    request_body = FromWorkflowRequest,
    responses(
        (status = 201, description = "Capsule assembled", body = FromWorkflowResponse),
        (status = 400, description = "Workflow not completed", body = ApiError),
        (status = 404, description = "Workflow or code artifact not found", body = ApiError)
    ),
    tag = "capsules"
)]
pub async fn from_workflow(
    State(state): State<AppState>,
    Json(req): Json<FromWorkflowRequest>,
) -> Result<(StatusCode, Json<FromWorkflowResponse>), ApiError> {
    let workflow = state.store.get_workflow(req.workflow_id).await?;

    let inputs = qlflow_capsule::resolve_inputs(state.artifacts.as_ref(), &workflow).await?;
    let capsule = qlflow_capsule::assemble(&workflow, &inputs)?;

    tracing::info!(
        workflow_id = %workflow.id,
        capsule_id = %capsule.id,
        size = capsule.total_size,
        "capsule assembled"
    );

    let capsule = state.capsules.insert(capsule);
    Ok((
        StatusCode::CREATED,
        Json(FromWorkflowResponse {
            capsule_id: capsule.id,
            size: capsule.total_size,
        }),
    ))
}

/// GET /api/v1/capsules/:id - Capsule metadata
#[utoipa::path(
    get,
    path = "/api/v1/capsules/{id}",
    params(("id" = Uuid, Path, description = "Capsule ID")),
    responses(
        (status = 200, description = "Capsule metadata", body = CapsuleView),
        (status = 404, description = "Capsule not found", body = ApiError)
    ),
    tag = "capsules"
)]
pub async fn get_capsule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CapsuleView>, ApiError> {
    let capsule = state
        .capsules
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("capsule {id} not found")))?;

    Ok(Json(CapsuleView {
        id: capsule.id,
        workflow_id: capsule.workflow_id,
        metadata: capsule.metadata.clone(),
        file_count: capsule.files.len(),
        total_size: capsule.total_size,
        content_hash: capsule.content_hash.clone(),
        created: capsule.created_at,
    }))
}

/// GET /api/v1/capsules/:id/download - tar+gz archive
#[utoipa::path(
    get,
    path = "/api/v1/capsules/{id}/download",
    params(("id" = Uuid, Path, description = "Capsule ID")),
    responses(
        (status = 200, description = "Capsule archive", content_type = "application/gzip"),
        (status = 404, description = "Capsule not found", body = ApiError)
    ),
    tag = "capsules"
)]
pub async fn download_capsule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let capsule = state
        .capsules
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("capsule {id} not found")))?;

    let archive = qlflow_capsule::to_tar_gz(&capsule)?;
    let filename = format!("{}-{}.tar.gz", capsule.metadata.name, capsule.id);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        archive,
    )
        .into_response())
}
