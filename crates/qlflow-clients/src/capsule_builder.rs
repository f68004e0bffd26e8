//! Capsule builder client
//!
//! `POST /api/v1/build` asks the packaging service to lay out a project
//! tree and returns its descriptor.

use std::collections::BTreeMap;

use qlflow_core::pipeline::targets;
use qlflow_core::EngineError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::http::ServiceClient;

/// Build request
#[derive(Debug, Clone, Serialize)]
pub struct BuildRequest {
    pub workflow_id: Uuid,
    pub language: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,

    #[serde(rename = "type")]
    pub project_type: String,

    pub name: String,
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub dependencies: Vec<String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Capsule descriptor returned by the builder
#[derive(Debug, Clone, Deserialize)]
pub struct BuildResponse {
    pub capsule_id: Uuid,
    pub file_count: u32,
    pub total_size: u64,

    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Client for the capsule builder service
#[derive(Clone)]
pub struct CapsuleBuilderClient {
    inner: ServiceClient,
}

impl CapsuleBuilderClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: ServiceClient::new(targets::CAPSULE_BUILDER, base_url),
        }
    }

    /// Request a capsule build
    pub async fn build(
        &self,
        request: &BuildRequest,
        idempotency_key: &str,
        cancel: &CancellationToken,
    ) -> Result<BuildResponse, EngineError> {
        if request.code.is_empty() {
            return Err(EngineError::invalid_argument("code must not be empty"));
        }
        if request.name.is_empty() {
            return Err(EngineError::invalid_argument("name must not be empty"));
        }
        self.inner
            .post_json("/api/v1/build", request, Some(idempotency_key), cancel)
            .await
    }

    pub async fn health(&self) -> Result<(), EngineError> {
        self.inner.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_type_field() {
        let request = BuildRequest {
            workflow_id: Uuid::now_v7(),
            language: "python".to_string(),
            framework: None,
            project_type: "function".to_string(),
            name: "adder".to_string(),
            code: "def add(a, b): return a + b".to_string(),
            tests: None,
            dependencies: vec![],
            metadata: BTreeMap::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"type\":\"function\""));
        assert!(!json.contains("framework"));
        assert!(!json.contains("dependencies"));
    }

    #[tokio::test]
    async fn test_empty_code_rejected() {
        let client = CapsuleBuilderClient::new("http://localhost:1");
        let request = BuildRequest {
            workflow_id: Uuid::now_v7(),
            language: "python".to_string(),
            framework: None,
            project_type: "function".to_string(),
            name: "adder".to_string(),
            code: String::new(),
            tests: None,
            dependencies: vec![],
            metadata: BTreeMap::new(),
        };
        let err = client
            .build(&request, "key", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, qlflow_core::ErrorKind::InvalidArgument);
    }
}
