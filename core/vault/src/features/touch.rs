use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use tracing::debug;

use super::{cleartext_entry, resolve};
use crate::crypto_vault::CryptoVault;
use crate::registry::VaultRegistry;
use skiff_common::{Error, RemotePath, Result};
use skiff_session::{ByteStream, Capabilities, Entry, Touch, TransferStatus};

/// Creates an empty encrypted file.
///
/// An encrypted empty file still carries a header and a final chunk, so
/// this writes through the native write capability.
pub struct CryptoTouch {
    vault: Arc<CryptoVault>,
    native: Capabilities,
}

impl CryptoTouch {
    pub fn new(vault: Arc<CryptoVault>, native: Capabilities) -> Self {
        Self { vault, native }
    }
}

#[async_trait]
impl Touch for CryptoTouch {
    async fn touch(&self, file: &RemotePath, _status: &TransferStatus) -> Result<Entry> {
        if !file.is_file() {
            return Err(Error::InvalidInput(format!("Not a file: {}", file)));
        }
        let node = self.vault.encrypt_node(&self.native, file).await?;

        if self.native.find()?.find(&node.path).await? {
            if let Some(storage) = node.path.parent() {
                let existing = self.native.list()?.list(&storage).await?;
                if let Some(entry) = existing.into_iter().find(|e| e.path == node.path) {
                    return Ok(cleartext_entry(file.clone(), entry));
                }
            }
        }

        self.vault.write_long_name(&self.native, &node).await?;
        let empty: ByteStream = Box::pin(stream::empty());
        let entry = self
            .native
            .write()?
            .write(
                &node.path,
                self.vault.encrypt_content(empty),
                &TransferStatus::new(),
            )
            .await?;
        debug!(file = %file, "Touched encrypted file");
        Ok(cleartext_entry(file.clone(), entry))
    }
}

/// Routes touch through the vault governing each path.
pub struct VaultTouch {
    registry: Arc<VaultRegistry>,
    native: Capabilities,
}

impl VaultTouch {
    pub fn new(registry: Arc<VaultRegistry>, native: Capabilities) -> Self {
        Self { registry, native }
    }
}

#[async_trait]
impl Touch for VaultTouch {
    async fn touch(&self, file: &RemotePath, status: &TransferStatus) -> Result<Entry> {
        resolve(&self.registry, &self.native, file)
            .touch()?
            .touch(file, status)
            .await
    }
}
