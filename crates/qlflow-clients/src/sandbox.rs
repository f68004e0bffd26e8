//! Sandbox executor client
//!
//! `POST /api/v1/execute` runs code inside the sandboxed container
//! runtime and returns its exit code and output.

use qlflow_core::pipeline::targets;
use qlflow_core::EngineError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::http::ServiceClient;

/// Largest accepted code payload, in bytes
const MAX_CODE_BYTES: usize = 1024 * 1024;

/// Execution request
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    pub language: String,
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,

    pub timeout_ms: u64,
}

/// Execution result
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ExecuteResponse {
    /// Whether the run exited cleanly
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Client for the sandboxed code executor
#[derive(Clone)]
pub struct SandboxClient {
    inner: ServiceClient,
}

impl SandboxClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: ServiceClient::new(targets::SANDBOX, base_url),
        }
    }

    /// Execute code in the sandbox
    pub async fn execute(
        &self,
        request: &ExecuteRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecuteResponse, EngineError> {
        if request.code.is_empty() {
            return Err(EngineError::invalid_argument("code must not be empty"));
        }
        if request.code.len() > MAX_CODE_BYTES {
            return Err(EngineError::invalid_argument(format!(
                "code exceeds maximum size of {MAX_CODE_BYTES} bytes"
            )));
        }
        if request.timeout_ms == 0 {
            return Err(EngineError::invalid_argument("timeout_ms must be positive"));
        }
        self.inner
            .post_json("/api/v1/execute", request, None, cancel)
            .await
    }

    pub async fn health(&self) -> Result<(), EngineError> {
        self.inner.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(code: &str) -> ExecuteRequest {
        ExecuteRequest {
            language: "python".to_string(),
            code: code.to_string(),
            stdin: None,
            timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn test_oversized_code_rejected() {
        let client = SandboxClient::new("http://localhost:1");
        let big = "x".repeat(MAX_CODE_BYTES + 1);
        let err = client
            .execute(&request(&big), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, qlflow_core::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let client = SandboxClient::new("http://localhost:1");
        let mut req = request("print(1)");
        req.timeout_ms = 0;
        let err = client
            .execute(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, qlflow_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_response_succeeded() {
        let resp = ExecuteResponse {
            exit_code: 0,
            stdout: "3\n".to_string(),
            stderr: String::new(),
            duration_ms: 12,
        };
        assert!(resp.succeeded());

        let resp = ExecuteResponse { exit_code: 1, ..resp };
        assert!(!resp.succeeded());
    }
}
