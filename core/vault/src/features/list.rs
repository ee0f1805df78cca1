use std::sync::Arc;

use async_trait::async_trait;

use super::resolve;
use crate::crypto_vault::CryptoVault;
use crate::registry::VaultRegistry;
use skiff_common::{EntryType, RemotePath, Result};
use skiff_session::{Capabilities, Entry, List};

/// Lists a directory's storage folder and decrypts the child names.
pub struct CryptoList {
    vault: Arc<CryptoVault>,
    native: Capabilities,
}

impl CryptoList {
    pub fn new(vault: Arc<CryptoVault>, native: Capabilities) -> Self {
        Self { vault, native }
    }
}

#[async_trait]
impl List for CryptoList {
    async fn list(&self, directory: &RemotePath) -> Result<Vec<Entry>> {
        let directory = directory.with_kind(EntryType::Directory)?;
        let info = self.vault.directory(&self.native, &directory).await?;
        let entries = self.native.list()?.list(&info.storage).await?;
        self.vault
            .decrypt_listing(&self.native, &directory, &info, entries)
            .await
    }
}

pub struct VaultList {
    registry: Arc<VaultRegistry>,
    native: Capabilities,
}

impl VaultList {
    pub fn new(registry: Arc<VaultRegistry>, native: Capabilities) -> Self {
        Self { registry, native }
    }
}

#[async_trait]
impl List for VaultList {
    async fn list(&self, directory: &RemotePath) -> Result<Vec<Entry>> {
        resolve(&self.registry, &self.native, directory)
            .list()?
            .list(directory)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{dir, file, vault_fixture};
    use super::*;
    use skiff_common::Error;
    use skiff_session::{stream_from_bytes, Session, TransferStatus};

    #[tokio::test]
    async fn test_list_mixed_children() {
        let (_session, _registry, caps) = vault_fixture().await;
        caps.directory().unwrap().mkdir(&dir("/v/photos")).await.unwrap();
        caps.write()
            .unwrap()
            .write(
                &file("/v/readme.md"),
                stream_from_bytes(b"hello".to_vec()),
                &TransferStatus::new(),
            )
            .await
            .unwrap();
        let long = "b".repeat(150);
        caps.touch()
            .unwrap()
            .touch(&file(&format!("/v/{}", long)), &TransferStatus::new())
            .await
            .unwrap();

        let mut listing = caps.list().unwrap().list(&dir("/v")).await.unwrap();
        listing.sort_by(|a, b| a.name().cmp(b.name()));

        let names: Vec<&str> = listing.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec![long.as_str(), "photos", "readme.md"]);
        assert!(listing[1].is_directory());
        assert_eq!(listing[2].size, 5);
        assert_eq!(listing[2].path, file("/v/readme.md"));
    }

    #[tokio::test]
    async fn test_list_skips_foreign_objects() {
        let (session, registry, caps) = vault_fixture().await;
        caps.touch()
            .unwrap()
            .touch(&file("/v/real"), &TransferStatus::new())
            .await
            .unwrap();

        let vault = registry.get(&dir("/v")).unwrap();
        let storage = vault.storage_for("").unwrap();
        let stray = storage.join_file("not-encrypted.txt").unwrap();
        session
            .capabilities()
            .write()
            .unwrap()
            .write(&stray, stream_from_bytes(vec![1, 2, 3]), &TransferStatus::new())
            .await
            .unwrap();

        let listing = caps.list().unwrap().list(&dir("/v")).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name(), "real");
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let (_session, _registry, caps) = vault_fixture().await;
        let result = caps.list().unwrap().list(&dir("/v/none")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_parent_of_vault_is_plain() {
        let (_session, _registry, caps) = vault_fixture().await;
        let listing = caps.list().unwrap().list(&dir("/")).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name(), "v");
    }
}
