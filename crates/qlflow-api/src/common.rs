//! Shared API state and error responses

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use qlflow_core::{Capsule, EngineError, ErrorKind};
use qlflow_engine::WorkflowStore;
use qlflow_store::ArtifactStore;
use qlflow_worker::Runner;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<Runner>,
    pub store: Arc<dyn WorkflowStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub capsules: Arc<CapsuleRegistry>,
}

/// In-process registry of assembled capsules
///
/// Capsules are immutable; long-term retention belongs to the external
/// capsule builder, this registry serves the download window.
#[derive(Default)]
pub struct CapsuleRegistry {
    capsules: DashMap<Uuid, Arc<Capsule>>,
}

impl CapsuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, capsule: Capsule) -> Arc<Capsule> {
        let capsule = Arc::new(capsule);
        self.capsules.insert(capsule.id, capsule.clone());
        capsule
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Capsule>> {
        self.capsules.get(&id).map(|c| c.value().clone())
    }
}

/// Error body returned by every route
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error_kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(err: EngineError) -> Self {
        Self {
            error_kind: err.kind,
            message: err.message,
            retryable: err.kind.is_retryable(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(EngineError::not_found(message))
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::new(err)
    }
}

impl From<qlflow_engine::StoreError> for ApiError {
    fn from(err: qlflow_engine::StoreError) -> Self {
        Self::new(err.into())
    }
}

impl From<qlflow_store::StoreError> for ApiError {
    fn from(err: qlflow_store::StoreError) -> Self {
        Self::new(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error_kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_carries_retryability() {
        let err = ApiError::new(EngineError::overloaded("queue full"));
        assert!(err.retryable);
        assert_eq!(err.error_kind, ErrorKind::Overloaded);

        let err = ApiError::new(EngineError::invalid_argument("bad prompt"));
        assert!(!err.retryable);
    }

    #[test]
    fn test_error_body_shape() {
        let err = ApiError::new(EngineError::not_found("workflow missing"));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error_kind"], "not_found");
        assert_eq!(json["retryable"], false);
        assert!(json["message"].as_str().unwrap().contains("workflow missing"));
    }
}
