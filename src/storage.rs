//! Object storage seam.
//!
//! Snapshots and thumbnails are written through [`ObjectStore`]. Two
//! implementations ship: [`MemoryObjectStore`] for tests and embedding, and
//! [`FsObjectStore`], which maps keys to files under a root directory and
//! keeps per-object metadata in a JSON sidecar.

use crate::error::ValidatorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Free-form string metadata stored next to an object.
pub type ObjectMetadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub metadata: ObjectMetadata,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<(), ValidatorError>;

    /// Fetch an object. Missing keys are a [`ValidatorError::StorageRead`].
    async fn get(&self, key: &str) -> Result<Vec<u8>, ValidatorError>;

    /// Remove an object. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), ValidatorError>;

    async fn exists(&self, key: &str) -> Result<bool, ValidatorError>;

    async fn info(&self, key: &str) -> Result<ObjectInfo, ValidatorError>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ValidatorError>;
}

fn not_found(key: &str) -> ValidatorError {
    ValidatorError::StorageRead {
        key: key.to_string(),
        detail: "no such key".into(),
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
    metadata: ObjectMetadata,
}

/// Map-backed store. Writes and deletes to keys containing an injected
/// substring fail, so failure paths can be exercised.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing_puts: Mutex<Vec<String>>,
    failing_deletes: Mutex<Vec<String>>,
    failing_reads: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `put` whose key contains `pattern` fail.
    pub fn fail_puts_matching(&self, pattern: &str) {
        if let Ok(mut p) = self.failing_puts.lock() {
            p.push(pattern.to_string());
        }
    }

    /// Make every `delete` whose key contains `pattern` fail.
    pub fn fail_deletes_matching(&self, pattern: &str) {
        if let Ok(mut p) = self.failing_deletes.lock() {
            p.push(pattern.to_string());
        }
    }

    /// Make every `get`, `exists` and `info` whose key contains `pattern` fail.
    pub fn fail_reads_matching(&self, pattern: &str) {
        if let Ok(mut p) = self.failing_reads.lock() {
            p.push(pattern.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut p) = self.failing_puts.lock() {
            p.clear();
        }
        if let Ok(mut p) = self.failing_deletes.lock() {
            p.clear();
        }
        if let Ok(mut p) = self.failing_reads.lock() {
            p.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn objects(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>>, ValidatorError> {
        self.objects
            .lock()
            .map_err(|_| ValidatorError::Internal("object store lock poisoned".into()))
    }

    fn injected(list: &Mutex<Vec<String>>, key: &str) -> bool {
        list.lock()
            .map(|l| l.iter().any(|p| key.contains(p.as_str())))
            .unwrap_or(false)
    }

    fn check_read(&self, key: &str) -> Result<(), ValidatorError> {
        if Self::injected(&self.failing_reads, key) {
            return Err(ValidatorError::StorageRead {
                key: key.to_string(),
                detail: "injected read failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<(), ValidatorError> {
        if Self::injected(&self.failing_puts, key) {
            return Err(ValidatorError::StorageWrite {
                key: key.to_string(),
                detail: "injected write failure".into(),
            });
        }
        self.objects()?.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                metadata,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ValidatorError> {
        self.check_read(key)?;
        self.objects()?
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| not_found(key))
    }

    async fn delete(&self, key: &str) -> Result<(), ValidatorError> {
        if Self::injected(&self.failing_deletes, key) {
            return Err(ValidatorError::StorageWrite {
                key: key.to_string(),
                detail: "injected delete failure".into(),
            });
        }
        self.objects()?.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ValidatorError> {
        self.check_read(key)?;
        Ok(self.objects()?.contains_key(key))
    }

    async fn info(&self, key: &str) -> Result<ObjectInfo, ValidatorError> {
        self.check_read(key)?;
        self.objects()?
            .get(key)
            .map(|o| ObjectInfo {
                key: key.to_string(),
                size: o.bytes.len() as u64,
                content_type: o.content_type.clone(),
                metadata: o.metadata.clone(),
            })
            .ok_or_else(|| not_found(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ValidatorError> {
        Ok(self
            .objects()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ── Filesystem ───────────────────────────────────────────────────────────

const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    metadata: ObjectMetadata,
}

/// Store rooted at a directory; key `a/b.png` lives at `<root>/a/b.png`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path, rejecting keys that escape the root.
    fn path_for(&self, key: &str) -> Result<PathBuf, ValidatorError> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && !key.ends_with(SIDECAR_SUFFIX)
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(ValidatorError::StorageWrite {
                key: key.to_string(),
                detail: "invalid object key".into(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn sidecar_for(path: &Path) -> PathBuf {
        let mut s = path.as_os_str().to_os_string();
        s.push(SIDECAR_SUFFIX);
        PathBuf::from(s)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<(), ValidatorError> {
        let path = self.path_for(key)?;
        let write_err = |e: std::io::Error| ValidatorError::StorageWrite {
            key: key.to_string(),
            detail: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let sidecar = serde_json::to_vec(&Sidecar {
            content_type: content_type.to_string(),
            metadata,
        })
        .map_err(|e| ValidatorError::StorageWrite {
            key: key.to_string(),
            detail: e.to_string(),
        })?;

        let size = bytes.len();
        tokio::fs::write(&path, bytes).await.map_err(write_err)?;
        tokio::fs::write(Self::sidecar_for(&path), sidecar)
            .await
            .map_err(write_err)?;
        debug!("stored {} ({} bytes)", key, size);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ValidatorError> {
        let path = self.path_for(key).map_err(|_| not_found(key))?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => not_found(key),
            _ => ValidatorError::StorageRead {
                key: key.to_string(),
                detail: e.to_string(),
            },
        })
    }

    async fn delete(&self, key: &str) -> Result<(), ValidatorError> {
        let path = self.path_for(key)?;
        for p in [Self::sidecar_for(&path), path] {
            match tokio::fs::remove_file(&p).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ValidatorError::StorageWrite {
                        key: key.to_string(),
                        detail: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ValidatorError> {
        let Ok(path) = self.path_for(key) else {
            return Ok(false);
        };
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ValidatorError::StorageRead {
                key: key.to_string(),
                detail: e.to_string(),
            })
    }

    async fn info(&self, key: &str) -> Result<ObjectInfo, ValidatorError> {
        let path = self.path_for(key).map_err(|_| not_found(key))?;
        let meta = tokio::fs::metadata(&path).await.map_err(|_| not_found(key))?;
        let sidecar: Sidecar = match tokio::fs::read(Self::sidecar_for(&path)).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| ValidatorError::StorageRead {
                key: key.to_string(),
                detail: format!("corrupt metadata sidecar: {e}"),
            })?,
            Err(_) => Sidecar {
                content_type: "application/octet-stream".into(),
                metadata: ObjectMetadata::new(),
            },
        };
        Ok(ObjectInfo {
            key: key.to_string(),
            size: meta.len(),
            content_type: sidecar.content_type,
            metadata: sidecar.metadata,
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ValidatorError> {
        let read_err = |e: std::io::Error| ValidatorError::StorageRead {
            key: prefix.to_string(),
            detail: e.to_string(),
        };

        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(read_err(e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
                let path = entry.path();
                if entry.file_type().await.map_err(read_err)?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.ends_with(SIDECAR_SUFFIX) && key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
