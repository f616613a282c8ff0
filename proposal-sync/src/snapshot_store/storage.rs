// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Key-value backends for the snapshot store

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// String key-value storage. Every `set` replaces the whole value atomically.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> SyncResult<()>;

    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> SyncResult<()>;
}

/// Process-local storage, shared by cloning an `Arc` of it.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> SyncResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// One file per key inside a cache directory.
///
/// Writes go to a temporary file in the same directory which is then
/// renamed over the target, so a reader never observes a partial value.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(file_name)
    }
}

fn write_atomic(dir: &Path, path: &Path, value: &[u8]) -> SyncResult<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(value)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| SyncError::Storage(format!("Failed to persist {}: {}", path.display(), e)))?;
    Ok(())
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> SyncResult<()> {
        let dir = self.dir.clone();
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, value.as_bytes()))
            .await
            .map_err(|e| SyncError::Storage(format!("Write task failed: {}", e)))?
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_basic() {
        let storage = MemoryStorage::new();
        assert!(storage.get("k").await.unwrap().is_none());

        storage.set("k", "v1".to_string()).await.unwrap();
        storage.set("k", "v2".to_string()).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(storage.len(), 1);

        storage.remove("k").await.unwrap();
        storage.remove("k").await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));

        assert!(storage.get("sepolia_0xabc_event_cache").await.unwrap().is_none());

        storage
            .set("sepolia_0xabc_event_cache", "{\"a\":1}".to_string())
            .await
            .unwrap();
        storage
            .set("sepolia_0xabc_event_cache", "{\"a\":2}".to_string())
            .await
            .unwrap();
        assert_eq!(
            storage
                .get("sepolia_0xabc_event_cache")
                .await
                .unwrap()
                .as_deref(),
            Some("{\"a\":2}")
        );

        // Only the target file remains; temp files were renamed away
        let files: Vec<_> = std::fs::read_dir(storage.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);

        storage.remove("sepolia_0xabc_event_cache").await.unwrap();
        storage.remove("sepolia_0xabc_event_cache").await.unwrap();
        assert!(storage.get("sepolia_0xabc_event_cache").await.unwrap().is_none());
    }

    #[test]
    fn test_file_storage_sanitizes_keys() {
        let storage = FileStorage::new("/cache");
        assert_eq!(
            storage.path_for("main/net:0xAB_last_block"),
            PathBuf::from("/cache/main_net_0xAB_last_block")
        );
    }
}
