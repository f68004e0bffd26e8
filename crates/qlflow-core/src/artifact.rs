//! Artifact ("drop") metadata and content addressing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Kind of a stage output artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Prompt,
    Frd,
    ProjectStructure,
    Code,
    Tests,
    Docs,
    SecurityReport,
    PerformanceReport,
    TestPlan,
    Readme,
    CapsuleManifest,
}

impl ArtifactKind {
    /// Stable string form used as the storage key component
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Frd => "frd",
            Self::ProjectStructure => "project_structure",
            Self::Code => "code",
            Self::Tests => "tests",
            Self::Docs => "docs",
            Self::SecurityReport => "security_report",
            Self::PerformanceReport => "performance_report",
            Self::TestPlan => "test_plan",
            Self::Readme => "readme",
            Self::CapsuleManifest => "capsule_manifest",
        }
    }

    /// Default content type for artifacts of this kind
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Prompt | Self::Frd | Self::Code | Self::Tests | Self::Docs | Self::Readme => {
                "text/plain; charset=utf-8"
            }
            Self::ProjectStructure
            | Self::SecurityReport
            | Self::PerformanceReport
            | Self::TestPlan
            | Self::CapsuleManifest => "application/json",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prompt" => Ok(Self::Prompt),
            "frd" => Ok(Self::Frd),
            "project_structure" => Ok(Self::ProjectStructure),
            "code" => Ok(Self::Code),
            "tests" => Ok(Self::Tests),
            "docs" => Ok(Self::Docs),
            "security_report" => Ok(Self::SecurityReport),
            "performance_report" => Ok(Self::PerformanceReport),
            "test_plan" => Ok(Self::TestPlan),
            "readme" => Ok(Self::Readme),
            "capsule_manifest" => Ok(Self::CapsuleManifest),
            other => Err(crate::error::EngineError::internal(format!(
                "unknown artifact kind: {other}"
            ))),
        }
    }
}

/// Compute the hex-encoded sha256 of artifact content
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Metadata of a stored artifact
///
/// `(workflow_id, stage, kind, version)` is unique; the hash uniquely
/// identifies the bytes; content is immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ArtifactMeta {
    /// Artifact id
    pub id: Uuid,

    /// Owning workflow
    pub workflow_id: Uuid,

    /// Producing stage name
    pub stage: String,

    /// Artifact kind
    pub kind: ArtifactKind,

    /// Monotone version per (workflow, stage, kind), starting at 1
    pub version: u32,

    /// Content size in bytes
    pub size: u64,

    /// Hex-encoded sha256 of the content
    pub hash: String,

    /// MIME content type
    pub content_type: String,

    /// Whether the content came from a template fallback rather than the
    /// producing activity
    pub template_fallback: bool,

    /// Weak reference to the producing activity record
    pub producing_activity_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

/// Reference to an artifact plus its content
#[derive(Debug, Clone)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub content: Vec<u8>,
}

impl Artifact {
    /// Content as UTF-8, replacing invalid sequences
    pub fn content_utf8(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_sha256() {
        // sha256("") is the well-known empty digest
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_content_hash_differs() {
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ArtifactKind::Prompt,
            ArtifactKind::Frd,
            ArtifactKind::ProjectStructure,
            ArtifactKind::Code,
            ArtifactKind::Tests,
            ArtifactKind::Docs,
            ArtifactKind::SecurityReport,
            ArtifactKind::PerformanceReport,
            ArtifactKind::TestPlan,
            ArtifactKind::Readme,
            ArtifactKind::CapsuleManifest,
        ] {
            let parsed: ArtifactKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_kind_serde_matches_as_str() {
        let json = serde_json::to_string(&ArtifactKind::SecurityReport).unwrap();
        assert_eq!(json, "\"security_report\"");
    }
}
