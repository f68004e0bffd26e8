//! Shared HTTP plumbing for specialist services
//!
//! One attempt per call; the engine owns retries and backoff. Status
//! mapping: 5xx/connect/timeout are retryable `DependencyUnavailable`,
//! 4xx is terminal `InvalidArgument` except 429 (`Overloaded`) and 408
//! (`DeadlineExceeded`), which are retryable. Cancellation surfaces as
//! `Cancelled`, never `Failed`.

use std::time::Duration;

use qlflow_core::{EngineError, ErrorKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Hard ceiling on any single specialist-service call
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin JSON-over-HTTP client for one specialist service
#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
    service: &'static str,
}

impl ServiceClient {
    /// Create a client for a service at `base_url`
    pub fn new(service: &'static str, base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(OPERATION_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static config");

        Self {
            http,
            base_url: base_url.into(),
            service,
        }
    }

    /// The target service name
    pub fn service(&self) -> &'static str {
        self.service
    }

    /// POST a JSON body and decode a JSON response
    ///
    /// `idempotency_key` is forwarded so a target that supports it can
    /// deduplicate retried invocations.
    pub async fn post_json<Req, Resp>(
        &self,
        path: &str,
        body: &Req,
        idempotency_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Resp, EngineError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(service = self.service, %url, "calling specialist service");

        let mut request = self.http.post(&url).json(body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = tokio::select! {
            r = request.send() => r.map_err(|e| self.transport_error(e))?,
            _ = cancel.cancelled() => {
                return Err(EngineError::cancelled(format!(
                    "call to {} cancelled", self.service
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status.as_u16()));
        }

        response.json::<Resp>().await.map_err(|e| {
            EngineError::dependency_unavailable(format!(
                "{} returned an undecodable response: {e}",
                self.service
            ))
        })
    }

    /// Probe the conventional `GET /health` endpoint
    pub async fn health(&self) -> Result<(), EngineError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.status_error(response.status().as_u16()))
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::deadline_exceeded(format!("call to {} timed out", self.service))
        } else {
            EngineError::dependency_unavailable(format!(
                "{} unreachable: {err}",
                self.service
            ))
        }
    }

    fn status_error(&self, status: u16) -> EngineError {
        let kind = match status {
            408 => ErrorKind::DeadlineExceeded,
            429 => ErrorKind::Overloaded,
            400..=499 => ErrorKind::InvalidArgument,
            _ => ErrorKind::DependencyUnavailable,
        };
        EngineError::new(kind, format!("{} returned HTTP {status}", self.service))
    }
}
