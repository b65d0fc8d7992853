//! Content-addressed artifact store.
//!
//! Large payloads evicted during compaction land here as immutable,
//! digest-addressed blobs. Identical content under the same type is stored
//! once and shared (dedup by `(type, hash)`); fetches re-hash the stored
//! bytes so silent corruption surfaces as [`ArtifactIntegrity`]
//! rather than bad data flowing back into a workflow.
//!
//! Directory layout, one subdirectory per artifact category:
//!
//! ```text
//! artifacts/
//!   research/      art_research_report_ab12cd34.bin
//!   code_blocks/   art_code_block_ef56ab78.bin
//!   diagrams/      ...
//!   manifests/     ...
//!   conversations/ ...
//! ```
//!
//! Writes are atomic: content goes to a temp file first, then renames into
//! place, so a crash mid-write never leaves a partially visible artifact.
//!
//! [`ArtifactIntegrity`]: crate::error::OrchestratorError::ArtifactIntegrity

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::{ArtifactType, CHARS_PER_TOKEN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Metadata for one stored blob.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Artifact {
    pub id: String,
    pub workflow_id: String,
    pub artifact_type: ArtifactType,
    /// Hex-encoded SHA-256 of the content.
    pub content_hash: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub token_estimate: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct ArtifactIndex {
    by_id: HashMap<String, Artifact>,
    /// Dedup index: (type, content hash) → artifact id.
    by_hash: HashMap<(ArtifactType, String), String>,
}

/// Filesystem-backed, content-addressed blob store.
pub struct ArtifactStore {
    root: PathBuf,
    index: Mutex<ArtifactIndex>,
}

impl ArtifactStore {
    /// Create a store rooted at `root`, ensuring the directory exists.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            index: Mutex::new(ArtifactIndex::default()),
        })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subdirectory name for an artifact category.
    fn subdir_for(artifact_type: ArtifactType) -> &'static str {
        match artifact_type {
            ArtifactType::ResearchReport => "research",
            ArtifactType::CodeBlock => "code_blocks",
            ArtifactType::DependencyGraph | ArtifactType::ArchitectureDiagram => "diagrams",
            ArtifactType::TestResults => "manifests",
            ArtifactType::ConversationLog => "conversations",
        }
    }

    /// Store content, returning its artifact record.
    ///
    /// Identical content of the same type deduplicates to the existing
    /// artifact — the same bytes always yield the same hash, and the blob
    /// is written only once. Blobs are never removed by compaction; only
    /// workflow deletion may garbage-collect them.
    pub fn put(
        &self,
        workflow_id: &str,
        artifact_type: ArtifactType,
        content: &[u8],
    ) -> OrchestratorResult<Artifact> {
        let content_hash = hex_digest(content);

        let mut index = self.lock_index()?;
        if let Some(existing_id) = index.by_hash.get(&(artifact_type, content_hash.clone()))
            && let Some(existing) = index.by_id.get(existing_id)
        {
            debug!(
                "artifact dedup hit: {} ({} bytes, {})",
                existing.id, existing.size_bytes, artifact_type
            );
            return Ok(existing.clone());
        }

        let id = crate::artifact_id(artifact_type);
        let dir = self.root.join(Self::subdir_for(artifact_type));
        std::fs::create_dir_all(&dir)
            .map_err(|e| OrchestratorError::Store(format!("failed to create {dir:?}: {e}")))?;

        let final_path = dir.join(format!("{id}.bin"));
        let tmp_path = dir.join(format!(".{id}.bin.tmp"));

        // Temp write + rename: the blob is visible whole or not at all.
        std::fs::write(&tmp_path, content)
            .map_err(|e| OrchestratorError::Store(format!("failed to write artifact: {e}")))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| OrchestratorError::Store(format!("failed to finalize artifact: {e}")))?;

        let artifact = Artifact {
            id: id.clone(),
            workflow_id: workflow_id.to_string(),
            artifact_type,
            content_hash: content_hash.clone(),
            path: final_path,
            size_bytes: content.len() as u64,
            token_estimate: content.len() as u64 / CHARS_PER_TOKEN,
            created_at: Utc::now(),
        };

        debug!(
            "artifact stored: {} ({} bytes, ~{} tokens)",
            artifact.id, artifact.size_bytes, artifact.token_estimate
        );

        index.by_hash.insert((artifact_type, content_hash), id.clone());
        index.by_id.insert(id, artifact.clone());
        Ok(artifact)
    }

    /// Fetch an artifact's content by id, verifying its digest.
    pub fn get(&self, artifact_id: &str) -> OrchestratorResult<Vec<u8>> {
        let artifact = self
            .metadata(artifact_id)
            .ok_or_else(|| OrchestratorError::ArtifactNotFound(artifact_id.to_string()))?;

        let content = std::fs::read(&artifact.path)
            .map_err(|_| OrchestratorError::ArtifactNotFound(artifact_id.to_string()))?;

        if hex_digest(&content) != artifact.content_hash {
            return Err(OrchestratorError::ArtifactIntegrity {
                id: artifact_id.to_string(),
            });
        }

        Ok(content)
    }

    /// Metadata for an artifact, if present.
    pub fn metadata(&self, artifact_id: &str) -> Option<Artifact> {
        self.index.lock().ok()?.by_id.get(artifact_id).cloned()
    }

    /// All artifact metadata recorded for a workflow.
    pub fn list_for_workflow(&self, workflow_id: &str) -> Vec<Artifact> {
        let Ok(index) = self.index.lock() else {
            return Vec::new();
        };
        index
            .by_id
            .values()
            .filter(|a| a.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    fn lock_index(&self) -> OrchestratorResult<std::sync::MutexGuard<'_, ArtifactIndex>> {
        self.index
            .lock()
            .map_err(|_| OrchestratorError::Store("artifact index lock poisoned".into()))
    }
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn hex_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifacts")).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_roundtrip_verifies_hash() {
        let (_dir, store) = store();
        let content = b"# Research Report\n\nDetailed findings...";

        let artifact = store
            .put("wf_a", ArtifactType::ResearchReport, content)
            .unwrap();
        assert!(artifact.id.starts_with("art_research_report_"));
        assert_eq!(artifact.size_bytes, content.len() as u64);
        assert_eq!(artifact.content_hash, hex_digest(content));

        let fetched = store.get(&artifact.id).unwrap();
        assert_eq!(fetched, content);
        // Round-trip integrity: re-hashing reproduces the stored hash.
        assert_eq!(hex_digest(&fetched), artifact.content_hash);
    }

    #[test]
    fn identical_content_deduplicates() {
        let (_dir, store) = store();
        let content = b"function example() {}";

        let first = store.put("wf_a", ArtifactType::CodeBlock, content).unwrap();
        let second = store.put("wf_a", ArtifactType::CodeBlock, content).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.path, second.path);

        // Same bytes under a different type is a distinct artifact.
        let other = store
            .put("wf_a", ArtifactType::TestResults, content)
            .unwrap();
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get("art_code_block_deadbeef"),
            Err(OrchestratorError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn corrupted_blob_fails_integrity() {
        let (_dir, store) = store();
        let artifact = store
            .put("wf_a", ArtifactType::CodeBlock, b"original content")
            .unwrap();

        std::fs::write(&artifact.path, b"tampered content").unwrap();

        assert!(matches!(
            store.get(&artifact.id),
            Err(OrchestratorError::ArtifactIntegrity { .. })
        ));
    }

    #[test]
    fn artifacts_land_in_type_subdirectories() {
        let (_dir, store) = store();
        let research = store
            .put("wf_a", ArtifactType::ResearchReport, b"r")
            .unwrap();
        let diagram = store
            .put("wf_a", ArtifactType::ArchitectureDiagram, b"d")
            .unwrap();

        assert!(research.path.parent().unwrap().ends_with("research"));
        assert!(diagram.path.parent().unwrap().ends_with("diagrams"));
    }

    #[test]
    fn no_temp_files_left_behind() {
        let (_dir, store) = store();
        let artifact = store.put("wf_a", ArtifactType::CodeBlock, b"abc").unwrap();
        let parent = artifact.path.parent().unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(parent)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn list_for_workflow_filters() {
        let (_dir, store) = store();
        store.put("wf_a", ArtifactType::CodeBlock, b"a").unwrap();
        store.put("wf_b", ArtifactType::CodeBlock, b"b").unwrap();
        assert_eq!(store.list_for_workflow("wf_a").len(), 1);
        assert_eq!(store.list_for_workflow("wf_c").len(), 0);
    }
}
