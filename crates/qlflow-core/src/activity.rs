//! Activity call records and idempotency keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Outcome of one activity attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ActivityOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Audit record for a single invocation of an external specialist service
///
/// Many per stage; owned by the stage record. Also feeds the retry
/// engine's bookkeeping and provider health updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Record id
    pub id: Uuid,

    /// Owning workflow
    pub workflow_id: Uuid,

    /// Owning stage ordinal
    pub stage_ord: u32,

    /// Activity name (e.g. "generate_code")
    pub activity: String,

    /// Target service (e.g. "model-router")
    pub target: String,

    /// Attempt number, 1-based
    pub attempt: u32,

    /// Provider used, for model calls
    pub provider: Option<String>,

    /// Digest of the request for dedup/audit
    pub request_digest: String,

    /// Wall-clock latency in milliseconds
    pub latency_ms: u64,

    /// Outcome of this attempt
    pub outcome: ActivityOutcome,

    /// Error kind when the attempt failed
    pub error_kind: Option<ErrorKind>,

    /// Input tokens consumed, for model calls
    pub tokens_in: Option<u64>,

    /// Output tokens produced, for model calls
    pub tokens_out: Option<u64>,

    /// Cost of this attempt in USD, for model calls
    pub cost_usd: Option<f64>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Derive the idempotency key for an activity invocation
///
/// The key is a stable hash of (workflow id, stage name, attempt-invariant
/// inputs), so a retried invocation carries the same key and an idempotent
/// target service can deduplicate.
pub fn idempotency_key(workflow_id: Uuid, stage: &str, input_digest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workflow_id.as_bytes());
    hasher.update(b"/");
    hasher.update(stage.as_bytes());
    hasher.update(b"/");
    hasher.update(input_digest.as_bytes());
    hex::encode(hasher.finalize())
}

/// Digest of a JSON request body, used for audit records and idempotency
pub fn request_digest(body: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(body).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}
