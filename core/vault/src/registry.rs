//! Vault resolution.
//!
//! The registry maps cleartext roots to unlocked vaults. Lookups never fail:
//! a path outside every registered root resolves to the passthrough vault.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use crate::config::KEY_CONTAINER_NAME;
use crate::crypto_vault::CryptoVault;
use crate::password::{PasswordCallback, PromptReason};
use crate::vault::{DisabledVault, Vault};
use skiff_common::{EntryType, Error, RemotePath, Result, SensitiveBytes};
use skiff_crypto::KdfParams;
use skiff_session::Capabilities;

type RootKey = Vec<String>;
type RootLock = Arc<tokio::sync::Mutex<()>>;

/// A claim on the per-root lock. The map entry goes away with the last claim.
struct PendingRoot<'a> {
    pending: &'a Mutex<HashMap<RootKey, RootLock>>,
    key: RootKey,
    lock: RootLock,
}

impl Drop for PendingRoot<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        let last = Arc::strong_count(&self.lock) == 2;
        if last && pending.get(&self.key).is_some_and(|l| Arc::ptr_eq(l, &self.lock)) {
            pending.remove(&self.key);
        }
    }
}

pub struct VaultRegistry {
    vaults: RwLock<BTreeMap<RootKey, Arc<CryptoVault>>>,
    disabled: Arc<DisabledVault>,
    password: Arc<dyn PasswordCallback>,
    kdf_params: KdfParams,
    /// Bumped by every clear; unlocks begun before a clear do not register.
    epoch: AtomicU64,
    /// Serializes create/unlock per root.
    pending: Mutex<HashMap<RootKey, RootLock>>,
}

impl VaultRegistry {
    pub fn new(password: Arc<dyn PasswordCallback>, kdf_params: KdfParams) -> Self {
        Self {
            vaults: RwLock::new(BTreeMap::new()),
            disabled: Arc::new(DisabledVault),
            password,
            kdf_params,
            epoch: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The vault governing `path`: the most specific registered root that
    /// is a prefix of it, or the passthrough vault.
    pub fn find(&self, path: &RemotePath) -> Arc<dyn Vault> {
        let vaults = self.vaults.read().unwrap_or_else(PoisonError::into_inner);
        vaults
            .iter()
            .filter(|(root, _)| path.components().starts_with(root))
            .max_by_key(|(root, _)| root.len())
            .map(|(_, vault)| vault.clone() as Arc<dyn Vault>)
            .unwrap_or_else(|| self.disabled.clone() as Arc<dyn Vault>)
    }

    /// The vault registered exactly at `root`.
    pub fn get(&self, root: &RemotePath) -> Option<Arc<CryptoVault>> {
        self.vaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(root.components())
            .cloned()
    }

    /// Register `vault` unless its root is already taken.
    ///
    /// Returns whichever vault ends up registered for the root.
    pub fn register(&self, vault: Arc<CryptoVault>) -> Arc<CryptoVault> {
        let mut vaults = self.vaults.write().unwrap_or_else(PoisonError::into_inner);
        vaults
            .entry(vault.root_path().components().to_vec())
            .or_insert(vault)
            .clone()
    }

    pub fn unregister(&self, root: &RemotePath) -> Option<Arc<CryptoVault>> {
        self.vaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(root.components())
    }

    /// Forget every vault. Held references stay usable.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut vaults = self.vaults.write().unwrap_or_else(PoisonError::into_inner);
        if !vaults.is_empty() {
            info!(count = vaults.len(), "Clearing vault registry");
        }
        vaults.clear();
    }

    pub fn roots(&self) -> Vec<RemotePath> {
        self.vaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|vault| vault.root_path().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.vaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn claim_root(&self, root: &RemotePath) -> PendingRoot<'_> {
        let key = root.components().to_vec();
        let lock = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        PendingRoot {
            pending: &self.pending,
            key,
            lock,
        }
    }

    async fn prompt(&self, root: &RemotePath, reason: PromptReason) -> Result<SensitiveBytes> {
        let password = self.password.clone();
        let root = root.clone();
        tokio::task::spawn_blocking(move || password.prompt(&root, reason))
            .await
            .map_err(|e| Error::Crypto(format!("Password prompt failed: {}", e)))?
    }

    fn register_if_current(&self, vault: Arc<CryptoVault>, epoch: u64) -> Arc<CryptoVault> {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(root = %vault.root_path(), "Registry cleared during unlock, not registering");
            return vault;
        }
        self.register(vault)
    }

    /// Create a vault at `root` and register it.
    ///
    /// # Errors
    /// - `Cancelled` if the passphrase prompt was dismissed
    /// - `AlreadyExists` if `root` already holds a vault
    pub async fn create(&self, native: &Capabilities, root: &RemotePath) -> Result<Arc<CryptoVault>> {
        let root = root.with_kind(EntryType::Directory)?;
        let claim = self.claim_root(&root);
        let _guard = claim.lock.lock().await;

        let epoch = self.epoch.load(Ordering::SeqCst);
        let passphrase = self.prompt(&root, PromptReason::Create).await?;
        let vault = CryptoVault::create(native, &root, passphrase, self.kdf_params.clone()).await?;
        Ok(self.register_if_current(vault, epoch))
    }

    /// Unlock the vault at `root` and register it.
    ///
    /// Concurrent calls for one root are serialized; later callers get the
    /// vault the first one registered without being prompted.
    ///
    /// # Errors
    /// - `Cancelled` if the passphrase prompt was dismissed
    /// - `VaultLocked`, `VaultNotFound` or `VaultCorrupt` from the unlock
    pub async fn unlock(&self, native: &Capabilities, root: &RemotePath) -> Result<Arc<CryptoVault>> {
        let root = root.with_kind(EntryType::Directory)?;
        let claim = self.claim_root(&root);
        let _guard = claim.lock.lock().await;

        if let Some(vault) = self.get(&root) {
            return Ok(vault);
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let passphrase = self.prompt(&root, PromptReason::Unlock).await?;
        let vault = CryptoVault::unlock(native, &root, passphrase).await?;
        Ok(self.register_if_current(vault, epoch))
    }

    /// Find the vault for `path`, unlocking one found on the backend.
    ///
    /// Walks from `path` towards the backend root looking for a key
    /// container. Returns the passthrough vault if there is none.
    pub async fn discover(&self, native: &Capabilities, path: &RemotePath) -> Result<Arc<dyn Vault>> {
        let registered = self.find(path);
        if registered.is_enabled() {
            return Ok(registered);
        }

        let find = native.find()?;
        let mut current = if path.is_directory() {
            Some(path.clone())
        } else {
            path.parent()
        };
        while let Some(dir) = current {
            if find.find(&dir.join_file(KEY_CONTAINER_NAME)?).await? {
                debug!(root = %dir, "Found vault");
                let vault: Arc<dyn Vault> = self.unlock(native, &dir).await?;
                return Ok(vault);
            }
            current = dir.parent();
        }
        Ok(self.disabled.clone() as Arc<dyn Vault>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::StaticPassword;
    use std::sync::atomic::AtomicUsize;
    use skiff_session::{DisabledCancelCallback, MemorySession, Session};

    struct CountingPassword {
        calls: AtomicUsize,
    }

    impl PasswordCallback for CountingPassword {
        fn prompt(&self, _root: &RemotePath, _reason: PromptReason) -> Result<SensitiveBytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("test".into())
        }
    }

    async fn connected() -> (MemorySession, Capabilities) {
        let session = MemorySession::new("registry-test");
        session.open(&DisabledCancelCallback).await.unwrap();
        let native = session.capabilities();
        (session, native)
    }

    fn registry() -> VaultRegistry {
        VaultRegistry::new(Arc::new(StaticPassword::new("test")), KdfParams::low_memory())
    }

    fn dir(path: &str) -> RemotePath {
        RemotePath::directory(path).unwrap()
    }

    #[tokio::test]
    async fn test_find_most_specific_root() {
        let (_session, native) = connected().await;
        let registry = registry();
        native.directory().unwrap().mkdir(&dir("/outer")).await.unwrap();
        registry.create(&native, &dir("/outer")).await.unwrap();
        registry.create(&native, &dir("/outer/inner")).await.unwrap();

        let deep = RemotePath::file("/outer/inner/x/y").unwrap();
        assert_eq!(registry.find(&deep).root(), Some(&dir("/outer/inner")));
        let shallow = RemotePath::file("/outer/file").unwrap();
        assert_eq!(registry.find(&shallow).root(), Some(&dir("/outer")));
        assert_eq!(registry.find(&dir("/outer")).root(), Some(&dir("/outer")));

        let sibling = RemotePath::file("/outerfile").unwrap();
        assert!(!registry.find(&sibling).is_enabled());
    }

    #[tokio::test]
    async fn test_clear_forgets_vaults() {
        let (_session, native) = connected().await;
        let registry = registry();
        let held = registry.create(&native, &dir("/v")).await.unwrap();

        registry.clear();

        assert!(registry.is_empty());
        assert!(!registry.find(&dir("/v")).is_enabled());
        // Held references keep working.
        assert!(held.storage_for("").is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_unlock_prompts_once() {
        let (_session, native) = connected().await;
        registry().create(&native, &dir("/v")).await.unwrap();

        let password = Arc::new(CountingPassword {
            calls: AtomicUsize::new(0),
        });
        let registry = Arc::new(VaultRegistry::new(password.clone(), KdfParams::low_memory()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            let native = native.clone();
            handles.push(tokio::spawn(async move {
                registry.unlock(&native, &dir("/v")).await.unwrap()
            }));
        }
        let mut vaults = Vec::new();
        for handle in handles {
            vaults.push(handle.await.unwrap());
        }

        assert_eq!(password.calls.load(Ordering::SeqCst), 1);
        assert!(vaults.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_root_locks_are_pruned() {
        let (_session, native) = connected().await;
        let registry = registry();
        registry.create(&native, &dir("/a")).await.unwrap();
        registry.clear();
        registry.unlock(&native, &dir("/a")).await.unwrap();
        assert!(registry.create(&native, &dir("/a")).await.is_err());
        registry.create(&native, &dir("/b")).await.unwrap();

        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_register_first_wins() {
        let (_session, native) = connected().await;
        let first = registry().create(&native, &dir("/v")).await.unwrap();
        let second = CryptoVault::unlock(&native, &dir("/v"), "test".into())
            .await
            .unwrap();

        let registry = registry();
        let a = registry.register(first.clone());
        let b = registry.register(second);
        assert!(Arc::ptr_eq(&a, &first));
        assert!(Arc::ptr_eq(&b, &first));
    }

    #[tokio::test]
    async fn test_discover_walks_ancestors() {
        let (_session, native) = connected().await;
        registry().create(&native, &dir("/v")).await.unwrap();

        let registry = registry();
        let vault = registry
            .discover(&native, &RemotePath::file("/v/some/deep/file").unwrap())
            .await
            .unwrap();
        assert_eq!(vault.root(), Some(&dir("/v")));
        assert_eq!(registry.roots(), vec![dir("/v")]);

        let none = registry
            .discover(&native, &RemotePath::file("/elsewhere/f").unwrap())
            .await
            .unwrap();
        assert!(!none.is_enabled());
    }

    #[tokio::test]
    async fn test_cancelled_prompt() {
        let (_session, native) = connected().await;
        registry().create(&native, &dir("/v")).await.unwrap();

        let registry = VaultRegistry::new(
            Arc::new(crate::password::DisabledPasswordCallback),
            KdfParams::low_memory(),
        );
        assert!(matches!(
            registry.unlock(&native, &dir("/v")).await,
            Err(Error::Cancelled)
        ));
        assert!(registry.is_empty());
    }
}
