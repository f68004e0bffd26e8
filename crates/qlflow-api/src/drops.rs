//! Artifact ("drop") read routes

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use qlflow_core::ArtifactKind;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::{ApiError, AppState};

/// One artifact in a listing
#[derive(Debug, Serialize, ToSchema)]
pub struct DropView {
    pub id: Uuid,
    pub stage: String,
    pub kind: ArtifactKind,
    pub version: u32,
    pub size: u64,
    pub hash: String,
    pub template_fallback: bool,
    pub created: DateTime<Utc>,
}

/// Create drop routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows/:id/drops", get(list_drops))
        .route("/api/v1/drops/:artifact_id", get(get_drop))
        .with_state(state)
}

/// GET /api/v1/workflows/:id/drops - List a workflow's artifacts
#[utoipa::path(
    get,
    path = "/api/v1/workflows/{id}/drops",
    params(("id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Artifact list", body = Vec<DropView>),
        (status = 404, description = "Workflow not found", body = ApiError)
    ),
    tag = "drops"
)]
pub async fn list_drops(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DropView>>, ApiError> {
    // 404 for unknown workflows rather than an empty list
    state.store.get_workflow(id).await?;

    let metas = state.artifacts.list(id).await?;
    Ok(Json(
        metas
            .into_iter()
            .map(|m| DropView {
                id: m.id,
                stage: m.stage,
                kind: m.kind,
                version: m.version,
                size: m.size,
                hash: m.hash,
                template_fallback: m.template_fallback,
                created: m.created_at,
            })
            .collect(),
    ))
}

/// GET /api/v1/drops/:artifact_id - Raw artifact content
#[utoipa::path(
    get,
    path = "/api/v1/drops/{artifact_id}",
    params(("artifact_id" = Uuid, Path, description = "Artifact ID")),
    responses(
        (status = 200, description = "Raw artifact content"),
        (status = 404, description = "Artifact not found", body = ApiError)
    ),
    tag = "drops"
)]
pub async fn get_drop(
    State(state): State<AppState>,
    Path(artifact_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let artifact = state.artifacts.get_by_id(artifact_id).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.meta.content_type.clone()),
            (header::ETAG, format!("\"{}\"", artifact.meta.hash)),
        ],
        artifact.content,
    )
        .into_response())
}
