//! Capability decorators.
//!
//! Every native capability gets two wrappers. The `Crypto*` types run one
//! operation through a single [`CryptoVault`](crate::CryptoVault). The
//! `Vault*` routers resolve the governing vault for each call through the
//! [`VaultRegistry`] and dispatch to that vault's decorated capabilities, so
//! paths outside every vault reach the native implementation unchanged.

mod delete;
mod directory;
mod find;
mod list;
mod read;
mod rename;
mod touch;
mod write;

use std::sync::Arc;

use tracing::warn;

pub use delete::{CryptoDelete, VaultDelete};
pub use directory::{CryptoDirectory, VaultDirectory};
pub use find::{CryptoFind, VaultFind};
pub use list::{CryptoList, VaultList};
pub use read::{CryptoRead, VaultRead};
pub use rename::{CryptoMove, VaultMove};
pub use touch::{CryptoTouch, VaultTouch};
pub use write::{CryptoWrite, VaultWrite};

use crate::registry::VaultRegistry;
use skiff_common::{RemotePath, Result};
use skiff_crypto::content::cleartext_size;
use skiff_session::{Capabilities, Entry, FeatureKind};

/// Wrap every capability of `native` with a registry router.
pub fn decorate(registry: &Arc<VaultRegistry>, native: &Capabilities) -> Capabilities {
    let mut caps = Capabilities::new();
    let route = |kind| native.supports(kind);

    if route(FeatureKind::Touch) {
        caps = caps.with_touch(Arc::new(VaultTouch::new(registry.clone(), native.clone())));
    }
    if route(FeatureKind::Find) {
        caps = caps.with_find(Arc::new(VaultFind::new(registry.clone(), native.clone())));
    }
    if route(FeatureKind::Delete) {
        caps = caps.with_delete(Arc::new(VaultDelete::new(registry.clone(), native.clone())));
    }
    if route(FeatureKind::Write) {
        caps = caps.with_write(Arc::new(VaultWrite::new(registry.clone(), native.clone())));
    }
    if route(FeatureKind::Read) {
        caps = caps.with_read(Arc::new(VaultRead::new(registry.clone(), native.clone())));
    }
    if route(FeatureKind::List) {
        caps = caps.with_list(Arc::new(VaultList::new(registry.clone(), native.clone())));
    }
    if route(FeatureKind::Move) {
        caps = caps.with_rename(Arc::new(VaultMove::new(registry.clone(), native.clone())));
    }
    if route(FeatureKind::Directory) {
        caps = caps.with_directory(Arc::new(VaultDirectory::new(
            registry.clone(),
            native.clone(),
        )));
    }
    caps
}

/// Native entry reported under its cleartext path and size.
pub(crate) fn cleartext_entry(path: RemotePath, native: Entry) -> Entry {
    let size = if native.is_directory() {
        0
    } else {
        match cleartext_size(native.size) {
            Ok(size) => size,
            Err(e) => {
                warn!(path = %path, error = %e, "Unexpected ciphertext size");
                0
            }
        }
    };
    Entry {
        path,
        size,
        modified: native.modified,
        etag: native.etag,
    }
}

/// Resolve the capabilities that apply to `path`.
pub(crate) fn resolve(
    registry: &VaultRegistry,
    native: &Capabilities,
    path: &RemotePath,
) -> Capabilities {
    registry.find(path).decorate(native)
}

pub(crate) fn ensure_same_vault(
    registry: &VaultRegistry,
    source: &RemotePath,
    target: &RemotePath,
) -> Result<()> {
    let from = registry.find(source);
    let to = registry.find(target);
    if from.root() != to.root() {
        return Err(skiff_common::Error::Unsupported(format!(
            "Cannot move {} to {} across vault boundaries",
            source, target
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::password::StaticPassword;
    use skiff_crypto::KdfParams;
    use skiff_session::{DisabledCancelCallback, MemorySession, Session};

    /// Connected memory session with a vault at `/v` and routed capabilities.
    pub async fn vault_fixture() -> (MemorySession, Arc<VaultRegistry>, Capabilities) {
        let session = MemorySession::new("feature-test");
        session.open(&DisabledCancelCallback).await.unwrap();
        let native = session.capabilities();
        let registry = Arc::new(VaultRegistry::new(
            Arc::new(StaticPassword::new("test")),
            KdfParams::low_memory(),
        ));
        registry
            .create(&native, &RemotePath::directory("/v").unwrap())
            .await
            .unwrap();
        let caps = decorate(&registry, &native);
        (session, registry, caps)
    }

    pub fn file(path: &str) -> RemotePath {
        RemotePath::file(path).unwrap()
    }

    pub fn dir(path: &str) -> RemotePath {
        RemotePath::directory(path).unwrap()
    }
}
