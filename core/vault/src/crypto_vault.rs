//! The encrypting vault.
//!
//! Ciphertext layout under the vault root:
//!
//! ```text
//! masterkey.vault                 key container
//! d/<H[0..2]>/<H[2..]>/           children of the directory whose id hashes to H
//!     <name>.c9r                  file, or directory node holding dir.c9r
//!     <hash>.c9s                  node whose encrypted name was too long
//!     <hash>.c9n                  full encrypted name of the .c9s node
//! ```
//!
//! The root directory has the empty identifier. Every other directory gets
//! a random identifier when it is created; its node's `dir.c9r` holds it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{
    KeyContainer, DATA_DIRNAME, DIR_ID_FILENAME, ENCRYPTED_SUFFIX, KEY_CONTAINER_NAME,
    NAME_TABLE_SUFFIX, SHORTENED_SUFFIX,
};
use crate::content::{decrypt_stream, encrypt_stream};
use crate::directory::{DirectoryIdCache, DirectoryInfo};
use crate::features::{
    CryptoDelete, CryptoDirectory, CryptoFind, CryptoList, CryptoMove, CryptoRead, CryptoTouch,
    CryptoWrite,
};
use crate::vault::Vault;
use skiff_common::{EntryType, Error, RemotePath, Result, SensitiveBytes};
use skiff_crypto::content::cleartext_size;
use skiff_crypto::names::{decrypt_name, encrypt_name, hash_directory_id, shorten_name};
use skiff_crypto::{ContentKey, KdfParams, VaultKeys};
use skiff_session::{
    collect_stream, stream_from_bytes, ByteStream, Capabilities, Entry, FeatureKind,
    TransferStatus,
};

/// Full encrypted name of a shortened node and where it is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongName {
    /// Side table object holding `full_name`.
    pub side_table: RemotePath,
    /// Encrypted name including its suffix.
    pub full_name: String,
}

/// Ciphertext location of one cleartext file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiphertextNode {
    /// The node itself, with the cleartext entry type.
    pub path: RemotePath,
    /// Present when the encrypted name was shortened.
    pub long_name: Option<LongName>,
}

impl CiphertextNode {
    /// `dir.c9r` inside a directory node.
    pub fn directory_id_file(&self) -> Result<RemotePath> {
        self.path.join_file(DIR_ID_FILENAME)
    }
}

/// A vault unlocked with its content and name keys.
pub struct CryptoVault {
    root: RemotePath,
    keys: VaultKeys,
    shortening_threshold: usize,
    cache: DirectoryIdCache,
}

impl fmt::Debug for CryptoVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoVault")
            .field("root", &self.root)
            .field("shortening_threshold", &self.shortening_threshold)
            .finish_non_exhaustive()
    }
}

async fn run_kdf<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
}

impl CryptoVault {
    fn new(root: &RemotePath, keys: VaultKeys, shortening_threshold: usize) -> Result<Self> {
        Ok(Self {
            root: root.with_kind(EntryType::Directory)?,
            keys,
            shortening_threshold,
            cache: DirectoryIdCache::new(),
        })
    }

    /// Create a new vault at `root`.
    ///
    /// # Preconditions
    /// - The parent of `root` exists on the backend
    ///
    /// # Postconditions
    /// - The key container and the root storage folder exist
    ///
    /// # Errors
    /// - `AlreadyExists` if `root` already holds a key container
    /// - Backend errors writing the container
    pub async fn create(
        native: &Capabilities,
        root: &RemotePath,
        passphrase: SensitiveBytes,
        kdf_params: KdfParams,
    ) -> Result<Arc<Self>> {
        let root = root.with_kind(EntryType::Directory)?;
        let container_path = root.join_file(KEY_CONTAINER_NAME)?;
        let find = native.find()?;
        let mkdir = native.directory()?;

        if find.find(&container_path).await? {
            return Err(Error::AlreadyExists(format!(
                "Vault already exists at {}",
                root
            )));
        }
        if !root.is_root() && !find.find(&root).await? {
            mkdir.mkdir(&root).await?;
        }

        let keys = VaultKeys::generate();
        let container = {
            let keys = keys.clone();
            run_kdf(move || KeyContainer::seal(passphrase.as_bytes(), &keys, kdf_params)).await?
        };
        native
            .write()?
            .write(
                &container_path,
                stream_from_bytes(container.to_bytes()?),
                &TransferStatus::new(),
            )
            .await?;

        let vault = Self::new(&root, keys, container.shortening_threshold)?;
        let data = vault.data_dir()?;
        if !find.find(&data).await? {
            mkdir.mkdir(&data).await?;
        }
        let root_info = vault.root_info()?;
        vault.ensure_storage(native, &root_info.storage).await?;
        vault.cache.insert(&vault.root, root_info).await;

        info!(root = %vault.root, "Vault created");
        Ok(Arc::new(vault))
    }

    /// Unlock the existing vault at `root`.
    ///
    /// # Errors
    /// - `VaultNotFound` if there is no key container
    /// - `VaultCorrupt` if the container cannot be parsed or fails its checksum
    /// - `VaultLocked` if the passphrase is wrong
    pub async fn unlock(
        native: &Capabilities,
        root: &RemotePath,
        passphrase: SensitiveBytes,
    ) -> Result<Arc<Self>> {
        let root = root.with_kind(EntryType::Directory)?;
        let container_path = root.join_file(KEY_CONTAINER_NAME)?;

        let stream = match native
            .read()?
            .read(&container_path, &TransferStatus::new())
            .await
        {
            Ok(stream) => stream,
            Err(Error::NotFound(_)) => {
                return Err(Error::VaultNotFound(format!("No vault at {}", root)));
            }
            Err(e) => return Err(e),
        };
        let bytes = collect_stream(stream).await?;
        let container = KeyContainer::from_bytes(&bytes)?;
        let threshold = container.shortening_threshold;

        let keys = run_kdf(move || container.open(passphrase.as_bytes())).await?;
        let vault = Self::new(&root, keys, threshold)?;
        let root_info = vault.root_info()?;
        vault.cache.insert(&vault.root, root_info).await;

        info!(root = %vault.root, "Vault unlocked");
        Ok(Arc::new(vault))
    }

    pub fn root_path(&self) -> &RemotePath {
        &self.root
    }

    pub fn content_key(&self) -> &ContentKey {
        &self.keys.content
    }

    /// Whether `path` lies in this vault (the root included).
    pub fn contains(&self, path: &RemotePath) -> bool {
        path.starts_with(&self.root)
    }

    fn data_dir(&self) -> Result<RemotePath> {
        self.root.join_dir(DATA_DIRNAME)
    }

    /// Storage folder of the directory with identifier `dir_id`.
    pub fn storage_for(&self, dir_id: &str) -> Result<RemotePath> {
        let hash = hash_directory_id(&self.keys.name, dir_id);
        self.data_dir()?.join_dir(&hash[..2])?.join_dir(&hash[2..])
    }

    fn root_info(&self) -> Result<DirectoryInfo> {
        Ok(DirectoryInfo {
            id: String::new(),
            storage: self.storage_for("")?,
        })
    }

    /// Create a storage folder and its bucket if missing.
    pub(crate) async fn ensure_storage(&self, native: &Capabilities, storage: &RemotePath) -> Result<()> {
        let find = native.find()?;
        let mkdir = native.directory()?;
        if let Some(bucket) = storage.parent() {
            if !find.find(&bucket).await? {
                match mkdir.mkdir(&bucket).await {
                    Ok(_) | Err(Error::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        mkdir.mkdir(storage).await?;
        Ok(())
    }

    fn check_contained(&self, path: &RemotePath) -> Result<()> {
        if self.contains(path) {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "{} is outside the vault at {}",
                path, self.root
            )))
        }
    }

    /// Ciphertext node for `name` of type `kind` inside a directory.
    pub fn encrypt_node_in(
        &self,
        parent: &DirectoryInfo,
        name: &str,
        kind: EntryType,
    ) -> Result<CiphertextNode> {
        let encrypted = format!(
            "{}{}",
            encrypt_name(&self.keys.name, &parent.id, name)?,
            ENCRYPTED_SUFFIX
        );
        if encrypted.len() <= self.shortening_threshold {
            return Ok(CiphertextNode {
                path: parent.storage.join(&encrypted, kind)?,
                long_name: None,
            });
        }

        let short = shorten_name(&encrypted);
        Ok(CiphertextNode {
            path: parent
                .storage
                .join(&format!("{}{}", short, SHORTENED_SUFFIX), kind)?,
            long_name: Some(LongName {
                side_table: parent
                    .storage
                    .join_file(&format!("{}{}", short, NAME_TABLE_SUFFIX))?,
                full_name: encrypted,
            }),
        })
    }

    /// Resolve the identifier and storage folder of a cleartext directory.
    ///
    /// Walks from the vault root, reading each missing `dir.c9r` and caching
    /// the result.
    ///
    /// # Errors
    /// - `NotFound` if a directory on the way does not exist
    pub async fn directory(&self, native: &Capabilities, dir: &RemotePath) -> Result<DirectoryInfo> {
        self.check_contained(dir)?;
        let dir = dir.with_kind(EntryType::Directory)?;
        if let Some(info) = self.cache.get(&dir).await {
            return Ok(info);
        }

        let mut current = match self.cache.get(&self.root).await {
            Some(info) => info,
            None => {
                let info = self.root_info()?;
                self.cache.insert(&self.root, info.clone()).await;
                info
            }
        };
        let mut cleartext = self.root.clone();
        for component in &dir.components()[self.root.depth()..] {
            cleartext = cleartext.join_dir(component)?;
            if let Some(info) = self.cache.get(&cleartext).await {
                current = info;
                continue;
            }

            let node = self.encrypt_node_in(&current, component, EntryType::Directory)?;
            let id_file = node.directory_id_file()?;
            let stream = match native.read()?.read(&id_file, &TransferStatus::new()).await {
                Ok(stream) => stream,
                Err(Error::NotFound(_)) => {
                    return Err(Error::NotFound(format!(
                        "Directory not found: {}",
                        cleartext
                    )));
                }
                Err(e) => return Err(e),
            };
            let id = String::from_utf8(collect_stream(stream).await?).map_err(|_| {
                Error::VaultCorrupt(format!("Invalid directory id for {}", cleartext))
            })?;

            let info = DirectoryInfo {
                storage: self.storage_for(&id)?,
                id,
            };
            debug!(directory = %cleartext, "Resolved directory id");
            self.cache.insert(&cleartext, info.clone()).await;
            current = info;
        }
        Ok(current)
    }

    /// Ciphertext node of a cleartext file or directory.
    ///
    /// # Errors
    /// - `InvalidInput` for the vault root, which has no node
    /// - `NotFound` if the parent directory does not exist
    pub async fn encrypt_node(&self, native: &Capabilities, path: &RemotePath) -> Result<CiphertextNode> {
        self.check_contained(path)?;
        if path.depth() == self.root.depth() {
            return Err(Error::InvalidInput(format!(
                "Vault root {} has no ciphertext node",
                self.root
            )));
        }
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("{} has no parent", path)))?;
        let name = path
            .name()
            .ok_or_else(|| Error::InvalidInput(format!("{} has no name", path)))?;
        let info = self.directory(native, &parent).await?;
        self.encrypt_node_in(&info, name, path.kind())
    }

    /// Write the side table of a shortened node.
    pub(crate) async fn write_long_name(&self, native: &Capabilities, node: &CiphertextNode) -> Result<()> {
        if let Some(long) = &node.long_name {
            native
                .write()?
                .write(
                    &long.side_table,
                    stream_from_bytes(long.full_name.as_bytes().to_vec()),
                    &TransferStatus::new(),
                )
                .await?;
        }
        Ok(())
    }

    async fn read_long_name(&self, native: &Capabilities, side_table: &RemotePath) -> Result<String> {
        let stream = native.read()?.read(side_table, &TransferStatus::new()).await?;
        String::from_utf8(collect_stream(stream).await?)
            .map_err(|_| Error::PathTranslation(format!("Invalid name table {}", side_table)))
    }

    /// Decrypt one ciphertext child name of directory `parent`.
    async fn decrypt_child_name(
        &self,
        native: &Capabilities,
        parent: &DirectoryInfo,
        ciphertext: &str,
    ) -> Result<String> {
        let full = if let Some(short) = ciphertext.strip_suffix(SHORTENED_SUFFIX) {
            let side_table = parent
                .storage
                .join_file(&format!("{}{}", short, NAME_TABLE_SUFFIX))?;
            let full = self.read_long_name(native, &side_table).await?;
            if shorten_name(&full) != short {
                return Err(Error::PathTranslation(format!(
                    "Name table mismatch for {}",
                    ciphertext
                )));
            }
            full
        } else {
            ciphertext.to_string()
        };
        let encrypted = full.strip_suffix(ENCRYPTED_SUFFIX).ok_or_else(|| {
            Error::PathTranslation(format!("Not an encrypted name: {}", ciphertext))
        })?;
        decrypt_name(&self.keys.name, &parent.id, encrypted)
    }

    /// Turn a native listing of `info.storage` into cleartext entries.
    ///
    /// Side tables are skipped. Entries that fail to decrypt are logged and
    /// skipped.
    pub async fn decrypt_listing(
        &self,
        native: &Capabilities,
        dir: &RemotePath,
        info: &DirectoryInfo,
        entries: Vec<Entry>,
    ) -> Result<Vec<Entry>> {
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let ciphertext = entry.name().to_string();
            if ciphertext.ends_with(NAME_TABLE_SUFFIX) {
                continue;
            }
            let name = match self.decrypt_child_name(native, info, &ciphertext).await {
                Ok(name) => name,
                Err(e) => {
                    warn!(directory = %dir, entry = %ciphertext, error = %e, "Skipping undecryptable entry");
                    continue;
                }
            };
            let size = if entry.is_directory() {
                0
            } else {
                match cleartext_size(entry.size) {
                    Ok(size) => size,
                    Err(e) => {
                        warn!(directory = %dir, entry = %name, error = %e, "Unexpected ciphertext size");
                        0
                    }
                }
            };
            results.push(Entry {
                path: dir.join(&name, entry.path.kind())?,
                size,
                modified: entry.modified,
                etag: entry.etag,
            });
        }
        Ok(results)
    }

    /// Find the cleartext directory whose storage folder is `storage`.
    ///
    /// Answers from the cache when possible. Otherwise walks the directory
    /// tree from the root, resolving and caching every directory on the way,
    /// until the folder turns up.
    async fn locate_storage(
        &self,
        native: &Capabilities,
        storage: &RemotePath,
    ) -> Result<Option<(RemotePath, DirectoryInfo)>> {
        if let Some(found) = self.cache.lookup_storage(storage).await? {
            return Ok(Some(found));
        }
        if !storage.starts_with(&self.data_dir()?) {
            return Ok(None);
        }

        let list = native.list()?;
        let root = self.directory(native, &self.root).await?;
        if root.storage == *storage {
            return Ok(Some((self.root.clone(), root)));
        }

        let mut pending = VecDeque::from([(self.root.clone(), root)]);
        while let Some((dir, info)) = pending.pop_front() {
            let children = match list.list(&info.storage).await {
                Ok(children) => children,
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            for child in children.into_iter().filter(Entry::is_directory) {
                let ciphertext = child.name().to_string();
                let name = match self.decrypt_child_name(native, &info, &ciphertext).await {
                    Ok(name) => name,
                    Err(e) => {
                        debug!(directory = %dir, entry = %ciphertext, error = %e, "Skipping undecryptable node");
                        continue;
                    }
                };
                let cleartext = dir.join_dir(&name)?;
                let child_info = match self.directory(native, &cleartext).await {
                    Ok(child_info) => child_info,
                    Err(Error::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                };
                if child_info.storage == *storage {
                    return Ok(Some((cleartext, child_info)));
                }
                pending.push_back((cleartext, child_info));
            }
        }
        Ok(None)
    }

    /// Allocate a fresh directory identifier.
    pub fn new_directory_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub(crate) fn cache(&self) -> &DirectoryIdCache {
        &self.cache
    }

    pub fn encrypt_content(&self, input: ByteStream) -> ByteStream {
        encrypt_stream(&self.keys.content, input)
    }

    pub fn decrypt_content(&self, input: ByteStream) -> ByteStream {
        decrypt_stream(&self.keys.content, input)
    }
}

#[async_trait]
impl Vault for CryptoVault {
    fn root(&self) -> Option<&RemotePath> {
        Some(&self.root)
    }

    async fn encrypt_path(&self, native: &Capabilities, path: &RemotePath) -> Result<RemotePath> {
        if path.is_directory() {
            Ok(self.directory(native, path).await?.storage)
        } else {
            Ok(self.encrypt_node(native, path).await?.path)
        }
    }

    async fn decrypt_path(&self, native: &Capabilities, path: &RemotePath) -> Result<RemotePath> {
        if path.is_directory() {
            if let Some((cleartext, _)) = self.locate_storage(native, path).await? {
                return Ok(cleartext);
            }
        }
        let parent = path
            .parent()
            .ok_or_else(|| Error::PathTranslation(format!("Not a vault path: {}", path)))?;
        let (cleartext_parent, info) = self
            .locate_storage(native, &parent)
            .await?
            .ok_or_else(|| {
                Error::PathTranslation(format!("Unknown storage folder: {}", parent))
            })?;
        let ciphertext = path
            .name()
            .ok_or_else(|| Error::PathTranslation(format!("Not a vault path: {}", path)))?;
        let name = self.decrypt_child_name(native, &info, ciphertext).await?;
        cleartext_parent.join(&name, path.kind())
    }

    fn decorate(self: Arc<Self>, native: &Capabilities) -> Capabilities {
        let mut caps = Capabilities::new();
        let has = |kind| native.supports(kind);

        if has(FeatureKind::Write) {
            caps = caps.with_touch(Arc::new(CryptoTouch::new(self.clone(), native.clone())));
            caps = caps.with_write(Arc::new(CryptoWrite::new(self.clone(), native.clone())));
        }
        if has(FeatureKind::Find) {
            caps = caps.with_find(Arc::new(CryptoFind::new(self.clone(), native.clone())));
        }
        if has(FeatureKind::Delete) {
            caps = caps.with_delete(Arc::new(CryptoDelete::new(self.clone(), native.clone())));
        }
        if has(FeatureKind::Read) {
            caps = caps.with_read(Arc::new(CryptoRead::new(self.clone(), native.clone())));
        }
        if has(FeatureKind::List) {
            caps = caps.with_list(Arc::new(CryptoList::new(self.clone(), native.clone())));
        }
        if has(FeatureKind::Move) {
            caps = caps.with_rename(Arc::new(CryptoMove::new(self.clone(), native.clone())));
        }
        if has(FeatureKind::Directory) && has(FeatureKind::Write) {
            caps = caps.with_directory(Arc::new(CryptoDirectory::new(self, native.clone())));
        }
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use skiff_session::{DisabledCancelCallback, MemorySession, Session};

    async fn setup() -> (MemorySession, Capabilities, Arc<CryptoVault>) {
        let session = MemorySession::new("vault-test");
        session.open(&DisabledCancelCallback).await.unwrap();
        let native = session.capabilities();
        let root = RemotePath::directory("/v").unwrap();
        let vault = CryptoVault::create(&native, &root, "test".into(), KdfParams::low_memory())
            .await
            .unwrap();
        (session, native, vault)
    }

    #[tokio::test]
    async fn test_create_writes_container_and_root_storage() {
        let (session, native, vault) = setup().await;

        assert!(session.store().file_contents("/v/masterkey.vault").is_some());
        let storage = vault.storage_for("").unwrap();
        assert!(native.find().unwrap().find(&storage).await.unwrap());
        assert_eq!(storage.depth(), 4);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let (_session, native, _vault) = setup().await;
        let root = RemotePath::directory("/v").unwrap();
        let result =
            CryptoVault::create(&native, &root, "test".into(), KdfParams::low_memory()).await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_unlock_errors_are_distinct() {
        let (session, native, _vault) = setup().await;
        let root = RemotePath::directory("/v").unwrap();

        let wrong = CryptoVault::unlock(&native, &root, "wrong".into()).await;
        assert!(matches!(wrong, Err(Error::VaultLocked(_))));

        let missing =
            CryptoVault::unlock(&native, &RemotePath::directory("/other").unwrap(), "test".into())
                .await;
        assert!(matches!(missing, Err(Error::VaultNotFound(_))));

        session
            .store()
            .set_file_contents("/v/masterkey.vault", b"garbage".to_vec())
            .unwrap();
        let corrupt = CryptoVault::unlock(&native, &root, "test".into()).await;
        assert!(matches!(corrupt, Err(Error::VaultCorrupt(_))));
    }

    #[tokio::test]
    async fn test_unlock_yields_same_layout() {
        let (_session, native, vault) = setup().await;
        let root = RemotePath::directory("/v").unwrap();
        let file = RemotePath::file("/v/report.pdf").unwrap();

        let unlocked = CryptoVault::unlock(&native, &root, "test".into()).await.unwrap();
        assert_eq!(
            vault.encrypt_path(&native, &file).await.unwrap(),
            unlocked.encrypt_path(&native, &file).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_long_names_are_shortened() {
        let (_session, native, vault) = setup().await;
        let short = vault
            .encrypt_node(&native, &RemotePath::file("/v/a").unwrap())
            .await
            .unwrap();
        assert!(short.long_name.is_none());
        assert!(short.path.name().unwrap().ends_with(ENCRYPTED_SUFFIX));

        let long_path = RemotePath::file(&format!("/v/{}", "a".repeat(130))).unwrap();
        let long = vault.encrypt_node(&native, &long_path).await.unwrap();
        let table = long.long_name.unwrap();
        assert!(long.path.name().unwrap().ends_with(SHORTENED_SUFFIX));
        assert!(table.side_table.name().unwrap().ends_with(NAME_TABLE_SUFFIX));
        assert!(table.full_name.len() > crate::config::DEFAULT_SHORTENING_THRESHOLD);
    }

    #[tokio::test]
    async fn test_root_has_no_node() {
        let (_session, native, vault) = setup().await;
        let root = RemotePath::directory("/v").unwrap();
        assert!(matches!(
            vault.encrypt_node(&native, &root).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(
            vault.encrypt_path(&native, &root).await.unwrap(),
            vault.storage_for("").unwrap()
        );
    }

    #[tokio::test]
    async fn test_outside_path_rejected() {
        let (_session, native, vault) = setup().await;
        let outside = RemotePath::file("/elsewhere/x").unwrap();
        assert!(matches!(
            vault.encrypt_path(&native, &outside).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_decrypt_unknown_folder_fails() {
        let (_session, native, vault) = setup().await;
        let foreign = RemotePath::file("/v/d/ZZ/NOPE/x.c9r").unwrap();
        assert!(matches!(
            vault.decrypt_path(&native, &foreign).await,
            Err(Error::PathTranslation(_))
        ));
    }

    #[tokio::test]
    async fn test_decrypt_nested_path_with_cold_cache() {
        let (_session, native, vault) = setup().await;
        let caps = vault.clone().decorate(&native);
        let dirs = caps.directory().unwrap();
        dirs.mkdir(&RemotePath::directory("/v/a").unwrap()).await.unwrap();
        dirs.mkdir(&RemotePath::directory("/v/a/b").unwrap()).await.unwrap();
        dirs.mkdir(&RemotePath::directory("/v/other").unwrap()).await.unwrap();
        let file = RemotePath::file("/v/a/b/f.txt").unwrap();
        caps.touch().unwrap().touch(&file, &TransferStatus::new()).await.unwrap();

        let encrypted_file = vault.encrypt_path(&native, &file).await.unwrap();
        let nested = RemotePath::directory("/v/a/b").unwrap();
        let encrypted_dir = vault.encrypt_path(&native, &nested).await.unwrap();

        let root = RemotePath::directory("/v").unwrap();
        let fresh = CryptoVault::unlock(&native, &root, "test".into()).await.unwrap();
        assert_eq!(fresh.decrypt_path(&native, &encrypted_file).await.unwrap(), file);

        let fresh = CryptoVault::unlock(&native, &root, "test".into()).await.unwrap();
        assert_eq!(fresh.decrypt_path(&native, &encrypted_dir).await.unwrap(), nested);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_file_path_roundtrip(name in "[a-zA-Z0-9 ._-]{1,200}") {
            prop_assume!(name != "." && name != "..");
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (_session, native, vault) = setup().await;
                let path = RemotePath::file(&format!("/v/{}", name)).unwrap();
                let encrypted = vault.encrypt_path(&native, &path).await.unwrap();
                if let Some(node) = vault.encrypt_node(&native, &path).await.unwrap().long_name {
                    native
                        .write()
                        .unwrap()
                        .write(
                            &node.side_table,
                            stream_from_bytes(node.full_name.into_bytes()),
                            &TransferStatus::new(),
                        )
                        .await
                        .unwrap();
                }
                let decrypted = vault.decrypt_path(&native, &encrypted).await.unwrap();
                assert_eq!(decrypted, path);
            });
        }
    }
}
