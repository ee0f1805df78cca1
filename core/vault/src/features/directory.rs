use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::resolve;
use crate::crypto_vault::CryptoVault;
use crate::directory::DirectoryInfo;
use crate::registry::VaultRegistry;
use skiff_common::{EntryType, RemotePath, Result};
use skiff_session::{stream_from_bytes, Capabilities, Directory, Entry, TransferStatus};

/// Creates an encrypted directory.
///
/// Allocates a fresh identifier, creates the node holding `dir.c9r` and
/// then the storage folder the identifier hashes to.
pub struct CryptoDirectory {
    vault: Arc<CryptoVault>,
    native: Capabilities,
}

impl CryptoDirectory {
    pub fn new(vault: Arc<CryptoVault>, native: Capabilities) -> Self {
        Self { vault, native }
    }
}

#[async_trait]
impl Directory for CryptoDirectory {
    async fn mkdir(&self, directory: &RemotePath) -> Result<Entry> {
        let directory = directory.with_kind(EntryType::Directory)?;
        let node = self.vault.encrypt_node(&self.native, &directory).await?;
        let id = CryptoVault::new_directory_id();
        let storage = self.vault.storage_for(&id)?;

        self.vault.write_long_name(&self.native, &node).await?;
        let entry = self.native.directory()?.mkdir(&node.path).await?;
        self.native
            .write()?
            .write(
                &node.directory_id_file()?,
                stream_from_bytes(id.as_bytes().to_vec()),
                &TransferStatus::new(),
            )
            .await?;
        self.vault.ensure_storage(&self.native, &storage).await?;
        self.vault
            .cache()
            .insert(&directory, DirectoryInfo { id, storage })
            .await;

        debug!(directory = %directory, "Created encrypted directory");
        Ok(Entry {
            path: directory,
            size: 0,
            modified: entry.modified,
            etag: None,
        })
    }
}

pub struct VaultDirectory {
    registry: Arc<VaultRegistry>,
    native: Capabilities,
}

impl VaultDirectory {
    pub fn new(registry: Arc<VaultRegistry>, native: Capabilities) -> Self {
        Self { registry, native }
    }
}

#[async_trait]
impl Directory for VaultDirectory {
    async fn mkdir(&self, directory: &RemotePath) -> Result<Entry> {
        resolve(&self.registry, &self.native, directory)
            .directory()?
            .mkdir(directory)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{dir, file, vault_fixture};
    use super::*;
    use crate::vault::Vault;
    use skiff_common::Error;
    use skiff_session::Session;

    #[tokio::test]
    async fn test_nested_directories() {
        let (_session, _registry, caps) = vault_fixture().await;
        let mkdir = caps.directory().unwrap();
        mkdir.mkdir(&dir("/v/a")).await.unwrap();
        mkdir.mkdir(&dir("/v/a/b")).await.unwrap();
        caps.touch()
            .unwrap()
            .touch(&file("/v/a/b/leaf"), &TransferStatus::new())
            .await
            .unwrap();

        let listing = caps.list().unwrap().list(&dir("/v/a/b")).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, file("/v/a/b/leaf"));
    }

    #[tokio::test]
    async fn test_same_name_in_different_directories() {
        let (session, registry, caps) = vault_fixture().await;
        let mkdir = caps.directory().unwrap();
        mkdir.mkdir(&dir("/v/one")).await.unwrap();
        mkdir.mkdir(&dir("/v/two")).await.unwrap();

        let vault = registry.get(&dir("/v")).unwrap();
        let native = session.capabilities();
        let a = vault.encrypt_path(&native, &file("/v/one/n")).await.unwrap();
        let b = vault.encrypt_path(&native, &file("/v/two/n")).await.unwrap();
        assert_ne!(a, b);
        assert_ne!(a.name(), b.name());
    }

    #[tokio::test]
    async fn test_mkdir_existing_fails() {
        let (_session, _registry, caps) = vault_fixture().await;
        let mkdir = caps.directory().unwrap();
        mkdir.mkdir(&dir("/v/dup")).await.unwrap();
        assert!(matches!(
            mkdir.mkdir(&dir("/v/dup")).await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_mkdir_reopened_vault_resolves_id() {
        let (session, registry, caps) = vault_fixture().await;
        caps.directory().unwrap().mkdir(&dir("/v/kept")).await.unwrap();
        caps.touch()
            .unwrap()
            .touch(&file("/v/kept/f"), &TransferStatus::new())
            .await
            .unwrap();

        // A fresh unlock starts with an empty cache and must read dir.c9r.
        registry.clear();
        let native = session.capabilities();
        registry.unlock(&native, &dir("/v")).await.unwrap();
        assert!(caps.find().unwrap().find(&file("/v/kept/f")).await.unwrap());
    }
}
