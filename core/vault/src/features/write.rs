use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{cleartext_entry, resolve};
use crate::crypto_vault::CryptoVault;
use crate::registry::VaultRegistry;
use skiff_common::{Error, RemotePath, Result};
use skiff_session::{ByteStream, Capabilities, Entry, TransferStatus, Write};

/// Encrypts content on its way to the native write.
pub struct CryptoWrite {
    vault: Arc<CryptoVault>,
    native: Capabilities,
}

impl CryptoWrite {
    pub fn new(vault: Arc<CryptoVault>, native: Capabilities) -> Self {
        Self { vault, native }
    }
}

#[async_trait]
impl Write for CryptoWrite {
    async fn write(
        &self,
        file: &RemotePath,
        data: ByteStream,
        status: &TransferStatus,
    ) -> Result<Entry> {
        if status.is_range() {
            return Err(Error::Unsupported(format!(
                "Partial writes to encrypted file {}",
                file
            )));
        }
        if !file.is_file() {
            return Err(Error::InvalidInput(format!("Not a file: {}", file)));
        }
        let node = self.vault.encrypt_node(&self.native, file).await?;
        self.vault.write_long_name(&self.native, &node).await?;

        let entry = self
            .native
            .write()?
            .write(&node.path, self.vault.encrypt_content(data), status)
            .await?;
        debug!(file = %file, ciphertext_size = entry.size, "Wrote encrypted file");
        Ok(cleartext_entry(file.clone(), entry))
    }
}

pub struct VaultWrite {
    registry: Arc<VaultRegistry>,
    native: Capabilities,
}

impl VaultWrite {
    pub fn new(registry: Arc<VaultRegistry>, native: Capabilities) -> Self {
        Self { registry, native }
    }
}

#[async_trait]
impl Write for VaultWrite {
    async fn write(
        &self,
        file: &RemotePath,
        data: ByteStream,
        status: &TransferStatus,
    ) -> Result<Entry> {
        resolve(&self.registry, &self.native, file)
            .write()?
            .write(file, data, status)
            .await
    }
}
