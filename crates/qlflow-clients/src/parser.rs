//! Parser service client
//!
//! `POST /parse` for syntax validation, `POST /analyze` for the code
//! quality report.

use qlflow_core::pipeline::targets;
use qlflow_core::EngineError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::http::ServiceClient;

/// Parse/analyze request
#[derive(Debug, Clone, Serialize)]
pub struct ParseRequest {
    pub code: String,
    pub language: String,
}

/// One parse error location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseIssue {
    pub line: u32,
    pub message: String,
}

/// Parse response
#[derive(Debug, Clone, Deserialize)]
pub struct ParseResponse {
    pub has_errors: bool,

    /// Parser metrics (node counts, complexity, ...)
    #[serde(default)]
    pub metrics: serde_json::Value,

    #[serde(default)]
    pub errors: Option<Vec<ParseIssue>>,
}

/// Code-quality report from `/analyze`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub score: Option<f64>,

    #[serde(default)]
    pub findings: Vec<serde_json::Value>,
}

/// Client for the source parser service
#[derive(Clone)]
pub struct ParserClient {
    inner: ServiceClient,
}

impl ParserClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: ServiceClient::new(targets::PARSER, base_url),
        }
    }

    /// Parse code and report syntax errors
    pub async fn parse(
        &self,
        request: &ParseRequest,
        cancel: &CancellationToken,
    ) -> Result<ParseResponse, EngineError> {
        validate(request)?;
        self.inner.post_json("/parse", request, None, cancel).await
    }

    /// Produce a code-quality report
    pub async fn analyze(
        &self,
        request: &ParseRequest,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, EngineError> {
        validate(request)?;
        self.inner.post_json("/analyze", request, None, cancel).await
    }

    pub async fn health(&self) -> Result<(), EngineError> {
        self.inner.health().await
    }
}

fn validate(request: &ParseRequest) -> Result<(), EngineError> {
    if request.code.is_empty() {
        return Err(EngineError::invalid_argument("code must not be empty"));
    }
    if request.language.is_empty() {
        return Err(EngineError::invalid_argument("language must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_code_rejected() {
        let client = ParserClient::new("http://localhost:1");
        let err = client
            .parse(
                &ParseRequest {
                    code: String::new(),
                    language: "python".to_string(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, qlflow_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_parse_response_decodes_minimal() {
        let resp: ParseResponse = serde_json::from_str(r#"{"has_errors":false}"#).unwrap();
        assert!(!resp.has_errors);
        assert!(resp.errors.is_none());
    }

    #[test]
    fn test_parse_response_decodes_errors() {
        let resp: ParseResponse = serde_json::from_str(
            r#"{"has_errors":true,"metrics":{"nodes":4},"errors":[{"line":3,"message":"unexpected indent"}]}"#,
        )
        .unwrap();
        assert!(resp.has_errors);
        assert_eq!(resp.errors.unwrap()[0].line, 3);
    }
}
