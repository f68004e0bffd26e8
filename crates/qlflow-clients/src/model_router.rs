//! Model router client
//!
//! `POST /generate` against the language-model router. The dispatcher
//! chooses the provider; this client only carries it on the wire.

use qlflow_core::pipeline::targets;
use qlflow_core::EngineError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::http::ServiceClient;

/// One chat message in a generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Generation request
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,

    /// Provider chosen by the dispatcher
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    pub max_tokens: u32,
}

/// Generation response
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    pub tokens_in: u64,
    pub tokens_out: u64,

    /// Provider that actually served the call
    pub provider: String,

    /// Cost reported by the router, when it prices the call itself
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

/// Client for the model router service
#[derive(Clone)]
pub struct ModelRouterClient {
    inner: ServiceClient,
}

impl ModelRouterClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: ServiceClient::new(targets::MODEL_ROUTER, base_url),
        }
    }

    /// Run one generation call against a specific provider
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        idempotency_key: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse, EngineError> {
        if request.messages.is_empty() {
            return Err(EngineError::invalid_argument(
                "generation request must carry at least one message",
            ));
        }
        self.inner
            .post_json("/generate", request, Some(idempotency_key), cancel)
            .await
    }

    /// Probe the router's health endpoint
    pub async fn health(&self) -> Result<(), EngineError> {
        self.inner.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builders() {
        let m = ChatMessage::system("you are a code generator");
        assert_eq!(m.role, "system");
        let m = ChatMessage::user("add two numbers");
        assert_eq!(m.role, "user");
    }

    #[test]
    fn test_provider_omitted_when_unset() {
        let request = GenerateRequest {
            messages: vec![ChatMessage::user("hi")],
            provider: None,
            max_tokens: 256,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("provider"));

        let request = GenerateRequest {
            provider: Some("anthropic".to_string()),
            ..request
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"provider\":\"anthropic\""));
    }

    #[tokio::test]
    async fn test_empty_messages_rejected_before_dispatch() {
        let client = ModelRouterClient::new("http://localhost:1");
        let request = GenerateRequest {
            messages: vec![],
            provider: None,
            max_tokens: 256,
        };
        let err = client
            .generate(&request, "key", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, qlflow_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_response_decodes_without_cost() {
        let json = r#"{"content":"x","tokens_in":10,"tokens_out":20,"provider":"a"}"#;
        let resp: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.cost_usd, None);
    }
}
