// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Content-addressed artifact store: checksummed write, verified read, manifest index."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use cm_core::{AbpError, Artifact, ArtifactType, Manifest, Role};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Aggregate statistics over everything currently in the store.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    /// Total number of artifacts.
    pub total_artifacts: usize,
    /// Sum of every artifact's size in bytes.
    pub total_size: u64,
    /// `total_size / total_artifacts`, `0.0` when empty.
    pub average_size: f64,
    /// Per-type count and total size.
    pub by_type: HashMap<String, TypeStats>,
}

/// Count and total size for one artifact type.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeStats {
    /// Number of artifacts of this type.
    pub count: usize,
    /// Combined size in bytes.
    pub size: u64,
}

struct Index {
    /// Manifests keyed by artifact id.
    manifests: HashMap<Uuid, Manifest>,
    /// Insertion order, for `list()`.
    order: Vec<Uuid>,
    /// Ids whose content file was missing at index-rebuild time.
    flagged_missing: HashMap<Uuid, ()>,
}

/// A content-addressed artifact store rooted at a workspace directory.
///
/// Layout: `<root>/artifacts/<uuid>.<type-suffix>` holds exact content
/// bytes; `<root>/manifests/<uuid>.json` holds the matching manifest.
pub struct ArtifactStore {
    root: PathBuf,
    index: RwLock<Index>,
    initialized: std::sync::atomic::AtomicBool,
}

impl ArtifactStore {
    /// Open (or create) a store rooted at `root`, creating the `artifacts/`
    /// and `manifests/` subdirectories and rebuilding the in-memory index
    /// from any manifests already on disk from a prior run.
    ///
    /// A manifest whose content file is missing is flagged but does not
    /// block startup; `retrieve` on such an id fails with
    /// [`AbpError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::Io`] if the directories cannot be created or an
    /// existing manifest cannot be read.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, AbpError> {
        let root = root.into();
        tokio::fs::create_dir_all(artifacts_dir(&root)).await?;
        tokio::fs::create_dir_all(manifests_dir(&root)).await?;

        let mut manifests = HashMap::new();
        let mut order = Vec::new();
        let mut flagged_missing = HashMap::new();

        let mut entries = tokio::fs::read_dir(manifests_dir(&root)).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read manifest during startup rebuild");
                    continue;
                }
            };
            let manifest: Manifest = match serde_json::from_slice(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse manifest during startup rebuild");
                    continue;
                }
            };

            if !resolve_location(&root, &manifest.location).is_file() {
                flagged_missing.insert(manifest.artifact_id, ());
            }

            order.push(manifest.artifact_id);
            manifests.insert(manifest.artifact_id, manifest);
        }

        Ok(Self {
            root,
            index: RwLock::new(Index {
                manifests,
                order,
                flagged_missing,
            }),
            initialized: std::sync::atomic::AtomicBool::new(true),
        })
    }

    /// `true` once the store's directories exist and the index rebuild has
    /// completed — always `true` after [`Self::open`] returns `Ok`.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Store `content` as a new artifact of `artifact_type`, computing its
    /// checksum and writing the content file then the manifest (in that
    /// order). When `clone` is given, it is added to `metadata` under the
    /// `"clone"` key; the rest of `metadata` is stored verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::InvalidInput`] for an empty type name or empty
    /// content. Returns [`AbpError::Io`] on any filesystem failure; a
    /// partially written content file is removed before the error
    /// propagates.
    pub async fn store(
        &self,
        artifact_type: ArtifactType,
        content: Vec<u8>,
        mut metadata: BTreeMap<String, Value>,
        clone: Option<Role>,
    ) -> Result<Manifest, AbpError> {
        if let ArtifactType::Other(ref s) = artifact_type {
            if s.trim().is_empty() {
                return Err(AbpError::InvalidInput("artifact type must not be empty".into()));
            }
        }
        let checksum = cm_integrity::checksum(&content)?;

        if let Some(role) = clone {
            metadata.insert("clone".to_string(), Value::String(role.as_str().to_string()));
        }

        let artifact_id = Uuid::new_v4();
        let size = content.len();
        let timestamp = Utc::now();
        let content_path = artifacts_dir(&self.root).join(format!(
            "{artifact_id}.{}",
            artifact_type.suffix()
        ));

        if let Err(e) = tokio::fs::write(&content_path, &content).await {
            return Err(AbpError::Io(e.to_string()));
        }

        let manifest = Manifest {
            artifact_id,
            artifact_type,
            checksum,
            location: format!("file://{}", content_path.display()),
            size,
            timestamp,
            metadata,
        };

        let manifest_path = manifests_dir(&self.root).join(format!("{artifact_id}.json"));
        let manifest_json = match serde_json::to_vec_pretty(&manifest) {
            Ok(v) => v,
            Err(e) => {
                let _ = tokio::fs::remove_file(&content_path).await;
                return Err(AbpError::Io(format!("serialize manifest: {e}")));
            }
        };

        if let Err(e) = tokio::fs::write(&manifest_path, manifest_json).await {
            let _ = tokio::fs::remove_file(&content_path).await;
            return Err(AbpError::Io(e.to_string()));
        }

        let mut idx = self.index.write().await;
        idx.order.push(artifact_id);
        idx.manifests.insert(artifact_id, manifest.clone());
        idx.flagged_missing.remove(&artifact_id);
        drop(idx);

        Ok(manifest)
    }

    /// Retrieve an artifact's manifest, and — unless `manifest_only` — its
    /// verified content.
    ///
    /// Always reads the manifest first. When content is read, the checksum
    /// is always recomputed against the manifest's recorded value; a
    /// mismatch is reported rather than silently returning corrupt bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::NotFound`] if the manifest or (when requested)
    /// its content file does not exist, and
    /// [`AbpError::ChecksumMismatch`] if the recomputed checksum diverges
    /// from the manifest.
    pub async fn retrieve(
        &self,
        id: Uuid,
        manifest_only: bool,
    ) -> Result<(Manifest, Option<Vec<u8>>), AbpError> {
        let manifest = self
            .index
            .read()
            .await
            .manifests
            .get(&id)
            .cloned()
            .ok_or_else(|| AbpError::NotFound(format!("artifact {id} not found")))?;

        if manifest_only {
            return Ok((manifest, None));
        }

        let path = resolve_location(&self.root, &manifest.location);
        let content = tokio::fs::read(&path)
            .await
            .map_err(|_| AbpError::NotFound(format!("artifact {id} content file missing")))?;

        let actual = cm_integrity::checksum(&content)?;
        if actual != manifest.checksum {
            return Err(AbpError::ChecksumMismatch {
                artifact_id: id,
                expected: manifest.checksum.clone(),
                actual,
            });
        }

        Ok((manifest, Some(content)))
    }

    /// Every manifest currently in the store, in insertion order, optionally
    /// filtered by exact-match artifact type.
    pub async fn list(&self, type_filter: Option<&ArtifactType>) -> Vec<Manifest> {
        let idx = self.index.read().await;
        idx.order
            .iter()
            .filter_map(|id| idx.manifests.get(id))
            .filter(|m| type_filter.is_none_or(|t| &m.artifact_type == t))
            .cloned()
            .collect()
    }

    /// Delete an artifact's content and manifest files.
    ///
    /// Returns `true` only if the manifest existed beforehand.
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::Io`] if an existing file cannot be removed.
    pub async fn delete(&self, id: Uuid) -> Result<bool, AbpError> {
        let manifest = {
            let mut idx = self.index.write().await;
            let Some(manifest) = idx.manifests.remove(&id) else {
                return Ok(false);
            };
            idx.order.retain(|existing| *existing != id);
            idx.flagged_missing.remove(&id);
            manifest
        };

        let content_path = resolve_location(&self.root, &manifest.location);
        let manifest_path = manifests_dir(&self.root).join(format!("{id}.json"));

        for path in [&content_path, &manifest_path] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(AbpError::Io(e.to_string())),
            }
        }

        Ok(true)
    }

    /// Aggregate statistics over everything currently in the store.
    pub async fn statistics(&self) -> Statistics {
        let idx = self.index.read().await;
        let mut stats = Statistics::default();
        for id in &idx.order {
            let Some(manifest) = idx.manifests.get(id) else {
                continue;
            };
            stats.total_artifacts += 1;
            stats.total_size += manifest.size as u64;
            let entry = stats.by_type.entry(manifest.artifact_type.name()).or_default();
            entry.count += 1;
            entry.size += manifest.size as u64;
        }
        stats.average_size = if stats.total_artifacts == 0 {
            0.0
        } else {
            stats.total_size as f64 / stats.total_artifacts as f64
        };
        stats
    }

    /// Ids flagged at startup as having a manifest with no backing content
    /// file. Exposed for diagnostics.
    pub async fn flagged_missing(&self) -> Vec<Uuid> {
        self.index.read().await.flagged_missing.keys().copied().collect()
    }
}

fn artifacts_dir(root: &Path) -> PathBuf {
    root.join("artifacts")
}

fn manifests_dir(root: &Path) -> PathBuf {
    root.join("manifests")
}

/// Resolve a manifest's `location` field to a filesystem path, tolerating
/// both the canonical `file://` URI form and a bare path written by older
/// implementations (Open Question #2).
fn resolve_location(_root: &Path, location: &str) -> PathBuf {
    match location.strip_prefix("file://") {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(location),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store() -> (ArtifactStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn round_trip_is_bit_identical_and_checksum_matches() {
        let (store, _dir) = store().await;
        let manifest = store
            .store(ArtifactType::Code, b"const x = 1;".to_vec(), BTreeMap::new(), None)
            .await
            .unwrap();

        let expected_checksum = cm_integrity::checksum(b"const x = 1;").unwrap();
        assert_eq!(manifest.checksum, expected_checksum);

        let (manifest2, content) = store.retrieve(manifest.artifact_id, false).await.unwrap();
        assert_eq!(manifest2.checksum, expected_checksum);
        assert_eq!(content.unwrap(), b"const x = 1;".to_vec());
    }

    #[tokio::test]
    async fn manifest_only_retrieve_omits_content() {
        let (store, _dir) = store().await;
        let manifest = store
            .store(ArtifactType::Code, b"hello".to_vec(), BTreeMap::new(), None)
            .await
            .unwrap();

        let (_, content) = store.retrieve(manifest.artifact_id, true).await.unwrap();
        assert!(content.is_none());
    }

    #[tokio::test]
    async fn corrupted_content_is_detected_on_retrieve() {
        let (store, dir) = store().await;
        let manifest = store
            .store(ArtifactType::Code, b"original".to_vec(), BTreeMap::new(), None)
            .await
            .unwrap();

        let path = resolve_location(dir.path(), &manifest.location);
        tokio::fs::write(&path, b"corrupted").await.unwrap();

        let err = store.retrieve(manifest.artifact_id, false).await.unwrap_err();
        assert!(matches!(err, AbpError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_returns_false_for_unknown_id() {
        let (store, _dir) = store().await;
        assert!(!store.delete(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_both_files() {
        let (store, _dir) = store().await;
        let manifest = store
            .store(ArtifactType::Code, b"x".to_vec(), BTreeMap::new(), None)
            .await
            .unwrap();
        assert!(store.delete(manifest.artifact_id).await.unwrap());
        assert!(store.retrieve(manifest.artifact_id, true).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_exact_type() {
        let (store, _dir) = store().await;
        store
            .store(ArtifactType::Code, b"a".to_vec(), BTreeMap::new(), None)
            .await
            .unwrap();
        store
            .store(ArtifactType::Documentation, b"b".to_vec(), BTreeMap::new(), None)
            .await
            .unwrap();

        let code_only = store.list(Some(&ArtifactType::Code)).await;
        assert_eq!(code_only.len(), 1);
        assert_eq!(code_only[0].artifact_type, ArtifactType::Code);
    }

    #[tokio::test]
    async fn statistics_aggregate_across_types() {
        let (store, _dir) = store().await;
        store
            .store(ArtifactType::Code, b"abcd".to_vec(), BTreeMap::new(), None)
            .await
            .unwrap();
        store
            .store(ArtifactType::Code, b"ab".to_vec(), BTreeMap::new(), None)
            .await
            .unwrap();

        let stats = store.statistics().await;
        assert_eq!(stats.total_artifacts, 2);
        assert_eq!(stats.total_size, 6);
        assert_eq!(stats.average_size, 3.0);
        assert_eq!(stats.by_type["code"].count, 2);
    }

    #[tokio::test]
    async fn index_rebuilds_from_disk_on_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let store = ArtifactStore::open(dir.path()).await.unwrap();
            let manifest = store
                .store(ArtifactType::Code, b"persisted".to_vec(), BTreeMap::new(), None)
                .await
                .unwrap();
            manifest.artifact_id
        };

        let reopened = ArtifactStore::open(dir.path()).await.unwrap();
        assert!(reopened.is_initialized());
        let (_, content) = reopened.retrieve(id, false).await.unwrap();
        assert_eq!(content.unwrap(), b"persisted".to_vec());
    }

    #[tokio::test]
    async fn manifest_with_missing_content_does_not_block_startup() {
        let dir = tempdir().unwrap();
        let id;
        {
            let store = ArtifactStore::open(dir.path()).await.unwrap();
            let manifest = store
                .store(ArtifactType::Code, b"gone".to_vec(), BTreeMap::new(), None)
                .await
                .unwrap();
            id = manifest.artifact_id;
            let path = resolve_location(dir.path(), &manifest.location);
            tokio::fs::remove_file(path).await.unwrap();
        }

        let reopened = ArtifactStore::open(dir.path()).await.unwrap();
        assert!(reopened.flagged_missing().await.contains(&id));
        let err = reopened.retrieve(id, false).await.unwrap_err();
        assert!(matches!(err, AbpError::NotFound(_)));
    }

    #[tokio::test]
    async fn store_rejects_empty_content() {
        let (store, _dir) = store().await;
        let err = store
            .store(ArtifactType::Code, Vec::new(), BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AbpError::InvalidInput(_)));
    }
}
