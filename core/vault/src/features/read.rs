use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::resolve;
use crate::content::{decrypt_range_stream, read_prefix};
use crate::crypto_vault::CryptoVault;
use crate::registry::VaultRegistry;
use skiff_common::{Error, RemotePath, Result};
use skiff_crypto::content::{chunk_span, HEADER_SIZE};
use skiff_crypto::FileHeader;
use skiff_session::{ByteStream, Capabilities, Read, TransferStatus};

/// Decrypts content coming from the native read.
///
/// Range reads fetch the file header and then only the chunks covering the
/// requested cleartext range.
pub struct CryptoRead {
    vault: Arc<CryptoVault>,
    native: Capabilities,
}

impl CryptoRead {
    pub fn new(vault: Arc<CryptoVault>, native: Capabilities) -> Self {
        Self { vault, native }
    }
}

#[async_trait]
impl Read for CryptoRead {
    async fn read(&self, file: &RemotePath, status: &TransferStatus) -> Result<ByteStream> {
        if !file.is_file() {
            return Err(Error::InvalidInput(format!("Not a file: {}", file)));
        }
        let node = self.vault.encrypt_node(&self.native, file).await?;
        let read = self.native.read()?;

        if !status.is_range() {
            let stream = read.read(&node.path, &TransferStatus::new()).await?;
            return Ok(self.vault.decrypt_content(stream));
        }

        let prefix = read
            .read(
                &node.path,
                &TransferStatus::new().with_length(HEADER_SIZE as u64),
            )
            .await?;
        let header = FileHeader::parse(&read_prefix(prefix, HEADER_SIZE).await?)?;

        let span = chunk_span(status.offset, status.length);
        let mut ranged = TransferStatus::new().with_offset(span.ciphertext_offset);
        if let Some(length) = span.ciphertext_length {
            ranged = ranged.with_length(length);
        }
        debug!(
            file = %file,
            offset = status.offset,
            first_chunk = span.first_chunk,
            "Range read"
        );
        let stream = read.read(&node.path, &ranged).await?;
        Ok(decrypt_range_stream(
            self.vault.content_key(),
            header,
            span.first_chunk,
            stream,
            span.skip,
            status.length,
            span.ciphertext_length.is_none(),
        ))
    }
}

pub struct VaultRead {
    registry: Arc<VaultRegistry>,
    native: Capabilities,
}

impl VaultRead {
    pub fn new(registry: Arc<VaultRegistry>, native: Capabilities) -> Self {
        Self { registry, native }
    }
}

#[async_trait]
impl Read for VaultRead {
    async fn read(&self, file: &RemotePath, status: &TransferStatus) -> Result<ByteStream> {
        resolve(&self.registry, &self.native, file)
            .read()?
            .read(file, status)
            .await
    }
}
