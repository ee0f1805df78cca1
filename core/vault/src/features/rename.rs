use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{cleartext_entry, ensure_same_vault, resolve};
use crate::crypto_vault::CryptoVault;
use crate::registry::VaultRegistry;
use skiff_common::{RemotePath, Result};
use skiff_session::{Capabilities, Entry, Move};

/// Moves an encrypted node within one vault.
///
/// A directory keeps its identifier when moved, so its storage folder and
/// everything below it stay in place; only the node is renamed.
pub struct CryptoMove {
    vault: Arc<CryptoVault>,
    native: Capabilities,
}

impl CryptoMove {
    pub fn new(vault: Arc<CryptoVault>, native: Capabilities) -> Self {
        Self { vault, native }
    }
}

#[async_trait]
impl Move for CryptoMove {
    async fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<Entry> {
        let target = target.with_kind(source.kind())?;
        let from = self.vault.encrypt_node(&self.native, source).await?;
        let to = self.vault.encrypt_node(&self.native, &target).await?;

        self.vault.write_long_name(&self.native, &to).await?;
        let entry = match self.native.rename()?.rename(&from.path, &to.path).await {
            Ok(entry) => entry,
            Err(e) => {
                if let Some(long) = &to.long_name {
                    if from.long_name.as_ref() != Some(long) {
                        let cleanup = self.native.delete()?;
                        if let Err(cleanup_err) =
                            cleanup.delete(std::slice::from_ref(&long.side_table)).await
                        {
                            warn!(error = %cleanup_err, "Failed to remove name table after failed move");
                        }
                    }
                }
                return Err(e);
            }
        };

        if let Some(long) = &from.long_name {
            if let Err(e) = self
                .native
                .delete()?
                .delete(std::slice::from_ref(&long.side_table))
                .await
            {
                warn!(error = %e, side_table = %long.side_table, "Failed to remove stale name table");
            }
        }
        if source.is_directory() {
            self.vault.cache().invalidate(source).await;
        }
        debug!(source = %source, target = %target, "Moved encrypted entry");
        Ok(cleartext_entry(target, entry))
    }
}

/// Routes moves; both ends must be governed by the same vault.
pub struct VaultMove {
    registry: Arc<VaultRegistry>,
    native: Capabilities,
}

impl VaultMove {
    pub fn new(registry: Arc<VaultRegistry>, native: Capabilities) -> Self {
        Self { registry, native }
    }
}

#[async_trait]
impl Move for VaultMove {
    async fn rename(&self, source: &RemotePath, target: &RemotePath) -> Result<Entry> {
        ensure_same_vault(&self.registry, source, target)?;
        resolve(&self.registry, &self.native, source)
            .rename()?
            .rename(source, target)
            .await
    }
}
