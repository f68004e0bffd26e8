//! Capsule data model
//!
//! A capsule is the assembled, downloadable project tree derived from a
//! completed workflow's artifacts. Immutable once created.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Role of a file within the capsule tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Source,
    Test,
    Config,
    Doc,
    Asset,
}

/// One file in the capsule tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleFile {
    /// Unix mode bits, preserved in the archive
    pub mode: u32,

    /// Role of the file
    pub kind: FileKind,

    /// Raw content
    #[serde(with = "bytes_base64")]
    pub content: Vec<u8>,
}

impl CapsuleFile {
    /// Regular file with default mode
    pub fn new(kind: FileKind, content: impl Into<Vec<u8>>) -> Self {
        Self {
            mode: 0o644,
            kind,
            content: content.into(),
        }
    }

    /// Set the mode bits
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}

/// Capsule metadata embedded as `.quantum/metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CapsuleMetadata {
    pub name: String,
    pub version: String,
    pub author: String,
    pub license: String,
    pub language: String,
    pub framework: Option<String>,
    pub project_type: String,
    pub dependencies: Vec<String>,
    /// Named scripts (build/start/test commands)
    pub scripts: BTreeMap<String, String>,
}

/// An assembled capsule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capsule {
    /// Capsule id
    pub id: Uuid,

    /// Source workflow
    pub workflow_id: Uuid,

    /// File tree, path to file (BTreeMap keeps paths sorted)
    pub files: BTreeMap<String, CapsuleFile>,

    /// Capsule metadata
    pub metadata: CapsuleMetadata,

    /// Sum of file sizes in bytes
    pub total_size: u64,

    /// Merkle root over sorted (path, sha256(content)) pairs
    pub content_hash: String,

    pub created_at: DateTime<Utc>,
}

/// Compute the Merkle root of a capsule file tree
///
/// Leaves are `sha256(path || 0x00 || sha256(content))` in path order;
/// parents hash the concatenation of their children, with an odd last
/// node promoted unchanged. Deterministic for a given tree, so assembling
/// the same workflow twice yields the same root.
pub fn merkle_root(files: &BTreeMap<String, CapsuleFile>) -> String {
    if files.is_empty() {
        return hex::encode(Sha256::digest(b""));
    }

    let mut level: Vec<Vec<u8>> = files
        .iter()
        .map(|(path, file)| {
            let content_digest = Sha256::digest(&file.content);
            let mut hasher = Sha256::new();
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(content_digest);
            hasher.finalize().to_vec()
        })
        .collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                if pair.len() == 2 {
                    let mut hasher = Sha256::new();
                    hasher.update(&pair[0]);
                    hasher.update(&pair[1]);
                    hasher.finalize().to_vec()
                } else {
                    pair[0].clone()
                }
            })
            .collect();
    }

    hex::encode(&level[0])
}

/// Serde support for raw bytes as base64 in JSON
mod bytes_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(entries: &[(&str, &[u8])]) -> BTreeMap<String, CapsuleFile> {
        entries
            .iter()
            .map(|(path, content)| {
                (
                    path.to_string(),
                    CapsuleFile::new(FileKind::Source, content.to_vec()),
                )
            })
            .collect()
    }

    #[test]
    fn test_merkle_root_deterministic() {
        let files = tree(&[("main.py", b"print(1)"), ("README.md", b"# hi")]);
        assert_eq!(merkle_root(&files), merkle_root(&files));
    }

    #[test]
    fn test_merkle_root_insertion_order_independent() {
        // BTreeMap sorts by path, so building in any order gives one root
        let a = tree(&[("a.py", b"1"), ("b.py", b"2")]);
        let b = tree(&[("b.py", b"2"), ("a.py", b"1")]);
        assert_eq!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn test_merkle_root_sensitive_to_content() {
        let a = tree(&[("main.py", b"print(1)")]);
        let b = tree(&[("main.py", b"print(2)")]);
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn test_merkle_root_sensitive_to_path() {
        let a = tree(&[("main.py", b"print(1)")]);
        let b = tree(&[("app.py", b"print(1)")]);
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn test_merkle_root_odd_leaf_count() {
        let files = tree(&[("a", b"1"), ("b", b"2"), ("c", b"3")]);
        // Just has to be stable and non-panicking
        assert_eq!(merkle_root(&files).len(), 64);
    }

    #[test]
    fn test_capsule_file_serde_round_trip() {
        let file = CapsuleFile::new(FileKind::Test, b"binary\x00data".to_vec()).with_mode(0o755);
        let json = serde_json::to_string(&file).unwrap();
        let parsed: CapsuleFile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.content, file.content);
        assert_eq!(parsed.mode, 0o755);
    }
}
