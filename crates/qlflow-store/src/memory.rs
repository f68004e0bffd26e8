//! In-memory implementation of ArtifactStore for testing

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use qlflow_core::{content_hash, Artifact, ArtifactKind, ArtifactMeta};
use uuid::Uuid;

use super::store::{ArtifactStore, PutArtifact, StoreError};

type VersionKey = (Uuid, String, ArtifactKind);

#[derive(Default)]
struct Inner {
    /// Metadata by artifact id
    artifacts: HashMap<Uuid, ArtifactMeta>,

    /// Version chain per (workflow, stage, kind), oldest first
    versions: HashMap<VersionKey, Vec<Uuid>>,

    /// Content-addressed blobs shared across versions
    blobs: HashMap<String, Arc<Vec<u8>>>,

    /// Tombstoned artifact ids
    tombstones: HashSet<Uuid>,

    /// Insertion order, for list()
    order: Vec<Uuid>,
}

/// In-memory artifact store
///
/// Provides the same semantics as the PostgreSQL implementation: gap-free
/// versions, blob dedup by hash, tombstoned deletes.
#[derive(Default)]
pub struct MemoryArtifactStore {
    inner: RwLock<Inner>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held (for dedup assertions in tests)
    pub fn blob_count(&self) -> usize {
        self.inner.read().blobs.len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, req: PutArtifact) -> Result<ArtifactMeta, StoreError> {
        let hash = content_hash(&req.content);
        let mut inner = self.inner.write();

        let key = (req.workflow_id, req.stage.clone(), req.kind);
        let version = inner.versions.get(&key).map(|v| v.len() as u32).unwrap_or(0) + 1;

        let meta = ArtifactMeta {
            id: Uuid::now_v7(),
            workflow_id: req.workflow_id,
            stage: req.stage.clone(),
            kind: req.kind,
            version,
            size: req.content.len() as u64,
            hash: hash.clone(),
            content_type: req
                .content_type
                .unwrap_or_else(|| req.kind.content_type().to_string()),
            template_fallback: req.template_fallback,
            producing_activity_id: req.producing_activity_id,
            created_at: Utc::now(),
        };

        inner
            .blobs
            .entry(hash)
            .or_insert_with(|| Arc::new(req.content));
        inner.versions.entry(key).or_default().push(meta.id);
        inner.order.push(meta.id);
        inner.artifacts.insert(meta.id, meta.clone());

        Ok(meta)
    }

    async fn get_latest(
        &self,
        workflow_id: Uuid,
        stage: &str,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, StoreError> {
        let inner = self.inner.read();
        let key = (workflow_id, stage.to_string(), kind);

        let Some(chain) = inner.versions.get(&key) else {
            return Ok(None);
        };

        // Latest non-tombstoned version
        let Some(id) = chain.iter().rev().find(|id| !inner.tombstones.contains(id)) else {
            return Ok(None);
        };

        let meta = inner.artifacts.get(id).ok_or(StoreError::NotFound(*id))?;
        let blob = inner
            .blobs
            .get(&meta.hash)
            .ok_or_else(|| StoreError::Database(format!("missing blob for hash {}", meta.hash)))?;

        Ok(Some(Artifact {
            meta: meta.clone(),
            content: blob.as_ref().clone(),
        }))
    }

    async fn get_by_id(&self, artifact_id: Uuid) -> Result<Artifact, StoreError> {
        let inner = self.inner.read();

        if inner.tombstones.contains(&artifact_id) {
            return Err(StoreError::NotFound(artifact_id));
        }

        let meta = inner
            .artifacts
            .get(&artifact_id)
            .ok_or(StoreError::NotFound(artifact_id))?;
        let blob = inner
            .blobs
            .get(&meta.hash)
            .ok_or_else(|| StoreError::Database(format!("missing blob for hash {}", meta.hash)))?;

        Ok(Artifact {
            meta: meta.clone(),
            content: blob.as_ref().clone(),
        })
    }

    async fn list(&self, workflow_id: Uuid) -> Result<Vec<ArtifactMeta>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .filter(|id| !inner.tombstones.contains(id))
            .filter_map(|id| inner.artifacts.get(id))
            .filter(|meta| meta.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, artifact_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.artifacts.contains_key(&artifact_id) {
            return Err(StoreError::NotFound(artifact_id));
        }
        inner.tombstones.insert(artifact_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_req(workflow_id: Uuid, content: &[u8]) -> PutArtifact {
        PutArtifact::new(workflow_id, "generate_code", ArtifactKind::Code, content)
    }

    #[tokio::test]
    async fn test_put_then_get_latest_round_trips() {
        let store = MemoryArtifactStore::new();
        let workflow_id = Uuid::now_v7();

        let meta = store.put(put_req(workflow_id, b"print(1)")).await.unwrap();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.hash, content_hash(b"print(1)"));

        let artifact = store
            .get_latest(workflow_id, "generate_code", ArtifactKind::Code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artifact.content, b"print(1)");
        assert_eq!(artifact.meta.hash, content_hash(b"print(1)"));
    }

    #[tokio::test]
    async fn test_versions_are_contiguous() {
        let store = MemoryArtifactStore::new();
        let workflow_id = Uuid::now_v7();

        for expected in 1..=4u32 {
            let meta = store
                .put(put_req(workflow_id, format!("v{expected}").as_bytes()))
                .await
                .unwrap();
            assert_eq!(meta.version, expected);
        }
    }

    #[tokio::test]
    async fn test_duplicate_content_shares_blob() {
        let store = MemoryArtifactStore::new();
        let workflow_id = Uuid::now_v7();

        let first = store.put(put_req(workflow_id, b"same")).await.unwrap();
        let second = store.put(put_req(workflow_id, b"same")).await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(first.hash, second.hash);
        assert_eq!(store.blob_count(), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryArtifactStore::new();
        let workflow_id = Uuid::now_v7();

        store.put(put_req(workflow_id, b"code")).await.unwrap();
        let meta = store
            .put(PutArtifact::new(
                workflow_id,
                "enhance_prompt",
                ArtifactKind::Prompt,
                b"prompt".to_vec(),
            ))
            .await
            .unwrap();

        // A different (stage, kind) starts its own version chain
        assert_eq!(meta.version, 1);
    }

    #[tokio::test]
    async fn test_get_latest_returns_newest() {
        let store = MemoryArtifactStore::new();
        let workflow_id = Uuid::now_v7();

        store.put(put_req(workflow_id, b"old")).await.unwrap();
        store.put(put_req(workflow_id, b"new")).await.unwrap();

        let artifact = store
            .get_latest(workflow_id, "generate_code", ArtifactKind::Code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artifact.content, b"new");
        assert_eq!(artifact.meta.version, 2);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = MemoryArtifactStore::new();
        let found = store
            .get_latest(Uuid::now_v7(), "generate_code", ArtifactKind::Code)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_delete_tombstones() {
        let store = MemoryArtifactStore::new();
        let workflow_id = Uuid::now_v7();

        let meta = store.put(put_req(workflow_id, b"bytes")).await.unwrap();
        store.delete(meta.id).await.unwrap();

        assert!(matches!(
            store.get_by_id(meta.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.list(workflow_id).await.unwrap().is_empty());

        // Deleting an unknown id reports not found
        assert!(matches!(
            store.delete(Uuid::now_v7()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_workflow() {
        let store = MemoryArtifactStore::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        store.put(put_req(a, b"a")).await.unwrap();
        store.put(put_req(b, b"b")).await.unwrap();

        let listed = store.list(a).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].workflow_id, a);
    }

    #[tokio::test]
    async fn test_template_fallback_flag_persisted() {
        let store = MemoryArtifactStore::new();
        let workflow_id = Uuid::now_v7();

        let meta = store
            .put(
                PutArtifact::new(workflow_id, "readme", ArtifactKind::Readme, b"# stub".to_vec())
                    .with_template_fallback(),
            )
            .await
            .unwrap();
        assert!(meta.template_fallback);

        let fetched = store.get_by_id(meta.id).await.unwrap();
        assert!(fetched.meta.template_fallback);
    }
}
