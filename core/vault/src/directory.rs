//! Directory identifier cache.
//!
//! Maps cleartext directory paths to their identifier and ciphertext
//! storage folder, and storage folders back to cleartext paths. Shared by
//! all concurrent operations on one vault.

use std::collections::HashMap;

use tokio::sync::RwLock;

use skiff_common::{EntryType, RemotePath, Result};

/// Identity and location of one encrypted directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryInfo {
    /// Opaque identifier; empty for the vault root.
    pub id: String,
    /// Ciphertext folder holding the directory's children.
    pub storage: RemotePath,
}

#[derive(Debug, Default)]
struct Maps {
    by_cleartext: HashMap<Vec<String>, DirectoryInfo>,
    by_storage: HashMap<Vec<String>, Vec<String>>,
}

#[derive(Debug, Default)]
pub struct DirectoryIdCache {
    maps: RwLock<Maps>,
}

impl DirectoryIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, cleartext: &RemotePath) -> Option<DirectoryInfo> {
        self.maps
            .read()
            .await
            .by_cleartext
            .get(cleartext.components())
            .cloned()
    }

    pub async fn insert(&self, cleartext: &RemotePath, info: DirectoryInfo) {
        let mut maps = self.maps.write().await;
        maps.by_storage.insert(
            info.storage.components().to_vec(),
            cleartext.components().to_vec(),
        );
        maps.by_cleartext
            .insert(cleartext.components().to_vec(), info);
    }

    /// Reverse lookup from a storage folder.
    pub async fn lookup_storage(
        &self,
        storage: &RemotePath,
    ) -> Result<Option<(RemotePath, DirectoryInfo)>> {
        let maps = self.maps.read().await;
        let Some(components) = maps.by_storage.get(storage.components()) else {
            return Ok(None);
        };
        let Some(info) = maps.by_cleartext.get(components) else {
            return Ok(None);
        };
        let cleartext = RemotePath::from_components(components.clone(), EntryType::Directory)?;
        Ok(Some((cleartext, info.clone())))
    }

    /// Forget `cleartext` and every directory below it.
    pub async fn invalidate(&self, cleartext: &RemotePath) {
        let mut maps = self.maps.write().await;
        let prefix = cleartext.components();
        let stale: Vec<Vec<String>> = maps
            .by_cleartext
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in stale {
            if let Some(info) = maps.by_cleartext.remove(&key) {
                maps.by_storage.remove(info.storage.components());
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.maps.read().await.by_cleartext.len()
    }
}
