use std::sync::Arc;

use async_trait::async_trait;

use super::resolve;
use crate::crypto_vault::CryptoVault;
use crate::registry::VaultRegistry;
use crate::vault::Vault;
use skiff_common::{Error, RemotePath, Result};
use skiff_session::{Capabilities, Find};

pub struct CryptoFind {
    vault: Arc<CryptoVault>,
    native: Capabilities,
}

impl CryptoFind {
    pub fn new(vault: Arc<CryptoVault>, native: Capabilities) -> Self {
        Self { vault, native }
    }
}

#[async_trait]
impl Find for CryptoFind {
    async fn find(&self, path: &RemotePath) -> Result<bool> {
        // A missing ancestor means the path cannot exist either.
        let target = match self.vault.encrypt_path(&self.native, path).await {
            Ok(target) => target,
            Err(Error::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        self.native.find()?.find(&target).await
    }
}

pub struct VaultFind {
    registry: Arc<VaultRegistry>,
    native: Capabilities,
}

impl VaultFind {
    pub fn new(registry: Arc<VaultRegistry>, native: Capabilities) -> Self {
        Self { registry, native }
    }
}

#[async_trait]
impl Find for VaultFind {
    async fn find(&self, path: &RemotePath) -> Result<bool> {
        resolve(&self.registry, &self.native, path)
            .find()?
            .find(path)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{dir, file, vault_fixture};
    use skiff_session::TransferStatus;

    #[tokio::test]
    async fn test_find_root_and_missing() {
        let (_session, _registry, caps) = vault_fixture().await;
        let find = caps.find().unwrap();

        assert!(find.find(&dir("/v")).await.unwrap());
        assert!(!find.find(&file("/v/absent")).await.unwrap());
        assert!(!find.find(&file("/v/no/such/dir/file")).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_distinguishes_kind() {
        let (_session, _registry, caps) = vault_fixture().await;
        caps.touch()
            .unwrap()
            .touch(&file("/v/thing"), &TransferStatus::new())
            .await
            .unwrap();

        let find = caps.find().unwrap();
        assert!(find.find(&file("/v/thing")).await.unwrap());
        assert!(!find.find(&dir("/v/thing")).await.unwrap());
    }
}
