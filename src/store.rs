//! Key→JSON blob store abstraction.
//!
//! The pipeline treats its storage as an opaque map from slash-separated
//! keys to JSON blobs: raw annotations live under `videos/…`, derived
//! artifacts are whole-file overwrites under `data/…`. The [`BlobStore`]
//! trait keeps the pipeline independent of where those blobs live; the
//! built-in [`FsStore`] maps keys onto a local directory tree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// An opaque key→bytes blob store.
///
/// Absence of a key is a legitimate "no data" signal, not an error, so
/// `read` returns `Ok(None)` for missing keys and reserves `Err` for I/O
/// failures.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List all keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Read a blob. `Ok(None)` if the key does not exist.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a blob, replacing any existing value wholesale.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Read and deserialize a JSON blob. `Ok(None)` if the key is absent.
pub async fn read_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Result<Option<T>> {
    match store.read(key).await? {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse JSON at {}", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Serialize and write a JSON blob.
pub async fn write_json<T: Serialize>(store: &dyn BlobStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store
        .write(key, &bytes)
        .await
        .with_context(|| format!("Failed to write JSON at {}", key))
}

/// Blob store backed by a local directory; keys map directly onto relative
/// paths under the root.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for FsStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        // Directory walks are blocking; keep them off the async workers.
        let keys = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut keys = Vec::new();
            collect_keys(&root, &root, &mut keys)?;
            keys.retain(|k| k.starts_with(&prefix));
            keys.sort();
            Ok(keys)
        })
        .await??;
        Ok(keys)
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to list {}", dir.display()));
        }
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(root, &path, keys)?;
        } else {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            // Keys are slash-separated regardless of platform.
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn read_missing_key_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        let result = store.read("videos/absent/video.json").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        store
            .write("data/video/abc.json", br#"{"video_id":"abc"}"#)
            .await
            .unwrap();
        let bytes = store.read("data/video/abc.json").await.unwrap().unwrap();
        assert_eq!(bytes, br#"{"video_id":"abc"}"#);
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        store.write("videos/b/video.json", b"{}").await.unwrap();
        store.write("videos/a/video.json", b"{}").await.unwrap();
        store.write("data/video.json", b"{}").await.unwrap();

        let keys = store.list("videos/").await.unwrap();
        assert_eq!(keys, vec!["videos/a/video.json", "videos/b/video.json"]);
    }

    #[tokio::test]
    async fn list_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path().join("nope"));
        assert!(store.list("videos/").await.unwrap().is_empty());
    }
}
