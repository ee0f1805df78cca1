//! The vault abstraction.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use skiff_common::{RemotePath, Result};
use skiff_session::Capabilities;

/// An encryption domain rooted at a cleartext directory.
///
/// Every path resolves to some vault: paths outside all registered roots get
/// the [`DisabledVault`], which passes everything through unchanged.
#[async_trait]
pub trait Vault: Send + Sync + fmt::Debug {
    /// Cleartext root, or `None` for the passthrough vault.
    fn root(&self) -> Option<&RemotePath>;

    fn is_enabled(&self) -> bool {
        self.root().is_some()
    }

    /// Translate a cleartext path to where it lives on the backend.
    ///
    /// Files map to their ciphertext node, directories to the folder that
    /// holds their children.
    async fn encrypt_path(&self, native: &Capabilities, path: &RemotePath) -> Result<RemotePath>;

    /// Inverse of [`encrypt_path`](Self::encrypt_path).
    ///
    /// # Errors
    /// - `PathTranslation` if a segment cannot be decrypted
    async fn decrypt_path(&self, native: &Capabilities, path: &RemotePath) -> Result<RemotePath>;

    /// Capabilities that run through this vault on top of `native`.
    fn decorate(self: Arc<Self>, native: &Capabilities) -> Capabilities;
}

/// The passthrough vault for unencrypted locations.
#[derive(Debug, Default)]
pub struct DisabledVault;

#[async_trait]
impl Vault for DisabledVault {
    fn root(&self) -> Option<&RemotePath> {
        None
    }

    async fn encrypt_path(&self, _native: &Capabilities, path: &RemotePath) -> Result<RemotePath> {
        Ok(path.clone())
    }

    async fn decrypt_path(&self, _native: &Capabilities, path: &RemotePath) -> Result<RemotePath> {
        Ok(path.clone())
    }

    fn decorate(self: Arc<Self>, native: &Capabilities) -> Capabilities {
        native.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_session::FeatureKind;

    #[tokio::test]
    async fn test_disabled_vault_is_identity() {
        let vault = Arc::new(DisabledVault);
        let native = Capabilities::new();
        let path = RemotePath::file("/plain/file.txt").unwrap();

        assert!(!vault.is_enabled());
        assert_eq!(vault.encrypt_path(&native, &path).await.unwrap(), path);
        assert_eq!(vault.decrypt_path(&native, &path).await.unwrap(), path);
        assert!(!vault.decorate(&native).supports(FeatureKind::Read));
    }
}
