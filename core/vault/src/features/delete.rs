use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::resolve;
use crate::crypto_vault::CryptoVault;
use crate::registry::VaultRegistry;
use skiff_common::{Error, RemotePath, Result};
use skiff_session::{Capabilities, Delete};

/// Deletes encrypted files and empty encrypted directories.
///
/// A directory is removed as its storage folder, its `dir.c9r`, its node
/// and any name side table, in that order.
pub struct CryptoDelete {
    vault: Arc<CryptoVault>,
    native: Capabilities,
}

impl CryptoDelete {
    pub fn new(vault: Arc<CryptoVault>, native: Capabilities) -> Self {
        Self { vault, native }
    }

    async fn ciphertext_targets(&self, path: &RemotePath) -> Result<Vec<RemotePath>> {
        if path.depth() == self.vault.root_path().depth() {
            return Err(Error::InvalidInput(format!(
                "Cannot delete vault root {}",
                path
            )));
        }
        let node = self.vault.encrypt_node(&self.native, path).await?;
        let mut targets = Vec::with_capacity(4);
        if path.is_directory() {
            let info = self.vault.directory(&self.native, path).await?;
            targets.push(info.storage);
            targets.push(node.directory_id_file()?);
        }
        targets.push(node.path);
        if let Some(long) = node.long_name {
            targets.push(long.side_table);
        }
        Ok(targets)
    }
}

#[async_trait]
impl Delete for CryptoDelete {
    async fn delete(&self, paths: &[RemotePath]) -> Result<()> {
        let delete = self.native.delete()?;
        for path in paths {
            let targets = self.ciphertext_targets(path).await?;
            delete.delete(&targets).await?;
            if path.is_directory() {
                self.vault.cache().invalidate(path).await;
            }
            debug!(path = %path, "Deleted encrypted entry");
        }
        Ok(())
    }
}

pub struct VaultDelete {
    registry: Arc<VaultRegistry>,
    native: Capabilities,
}

impl VaultDelete {
    pub fn new(registry: Arc<VaultRegistry>, native: Capabilities) -> Self {
        Self { registry, native }
    }
}

#[async_trait]
impl Delete for VaultDelete {
    async fn delete(&self, paths: &[RemotePath]) -> Result<()> {
        for path in paths {
            resolve(&self.registry, &self.native, path)
                .delete()?
                .delete(std::slice::from_ref(path))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{dir, file, vault_fixture};
    use super::*;
    use skiff_session::TransferStatus;

    #[tokio::test]
    async fn test_delete_directory_removes_all_ciphertext() {
        let (session, _registry, caps) = vault_fixture().await;
        let before = session.store().paths_under("/v/d/").len();

        caps.directory().unwrap().mkdir(&dir("/v/docs")).await.unwrap();
        caps.touch()
            .unwrap()
            .touch(&file("/v/docs/a.txt"), &TransferStatus::new())
            .await
            .unwrap();
        assert!(session.store().paths_under("/v/d/").len() > before);

        caps.delete()
            .unwrap()
            .delete(&[file("/v/docs/a.txt"), dir("/v/docs")])
            .await
            .unwrap();

        assert!(!caps.find().unwrap().find(&dir("/v/docs")).await.unwrap());
        let leftover: Vec<String> = session
            .store()
            .paths_under("/v/d/")
            .into_iter()
            .filter(|p| p.matches('/').count() > 3)
            .collect();
        // Only the root storage folder itself remains at that depth.
        assert_eq!(leftover.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_non_empty_directory_conflicts() {
        let (_session, _registry, caps) = vault_fixture().await;
        caps.directory().unwrap().mkdir(&dir("/v/full")).await.unwrap();
        caps.touch()
            .unwrap()
            .touch(&file("/v/full/x"), &TransferStatus::new())
            .await
            .unwrap();

        let result = caps.delete().unwrap().delete(&[dir("/v/full")]).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert!(caps.find().unwrap().find(&file("/v/full/x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_vault_root_rejected() {
        let (_session, _registry, caps) = vault_fixture().await;
        let result = caps.delete().unwrap().delete(&[dir("/v")]).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (_session, _registry, caps) = vault_fixture().await;
        let result = caps.delete().unwrap().delete(&[file("/v/ghost")]).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
