//! Key container and on-storage layout constants.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use skiff_common::{Error, Result};
use skiff_crypto::{derive_key, ContentKey, KdfParams, NameKey, Salt, VaultKeys};

/// Key container file name in the vault root.
pub const KEY_CONTAINER_NAME: &str = "masterkey.vault";

/// Data directory name in the vault root.
pub const DATA_DIRNAME: &str = "d";

/// Object inside a directory node holding that directory's identifier.
pub const DIR_ID_FILENAME: &str = "dir.c9r";

/// Suffix of an encrypted name.
pub const ENCRYPTED_SUFFIX: &str = ".c9r";

/// Suffix of a node whose encrypted name was shortened.
pub const SHORTENED_SUFFIX: &str = ".c9s";

/// Suffix of the side table holding a shortened node's full name.
pub const NAME_TABLE_SUFFIX: &str = ".c9n";

/// Encrypted names longer than this are shortened.
pub const DEFAULT_SHORTENING_THRESHOLD: usize = 220;

/// Current key container format.
pub const CONTAINER_VERSION: u32 = 1;

mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Persisted vault key material.
///
/// Holds the KDF salt and parameters plus the content and name keys, each
/// wrapped with the passphrase-derived key. A checksum over all fields
/// tells a damaged container apart from a wrong passphrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyContainer {
    /// Container format version.
    pub version: u32,
    /// Salt for passphrase key derivation.
    pub salt: Salt,
    /// KDF parameters.
    pub kdf_params: KdfParams,
    /// Wrapped content key.
    #[serde(with = "base64_bytes")]
    pub content_key: Vec<u8>,
    /// Wrapped name key.
    #[serde(with = "base64_bytes")]
    pub name_key: Vec<u8>,
    /// Encrypted names longer than this are shortened.
    pub shortening_threshold: usize,
    /// Vault creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Checksum over the fields above.
    pub checksum: String,
}

impl KeyContainer {
    /// Wrap `keys` under a key derived from `passphrase`.
    ///
    /// Runs the KDF; call off the async executor.
    ///
    /// # Errors
    /// - Passphrase empty
    /// - KDF parameters out of range
    /// - KDF failure
    pub fn seal(passphrase: &[u8], keys: &VaultKeys, kdf_params: KdfParams) -> Result<Self> {
        kdf_params.validate()?;
        let salt = Salt::generate();
        let kek = derive_key(passphrase, &salt, &kdf_params)?;

        let mut container = Self {
            version: CONTAINER_VERSION,
            salt,
            kdf_params,
            content_key: kek.wrap(keys.content.as_bytes())?,
            name_key: kek.wrap(keys.name.as_bytes())?,
            shortening_threshold: DEFAULT_SHORTENING_THRESHOLD,
            created_at: Utc::now(),
            checksum: String::new(),
        };
        container.checksum = container.compute_checksum();
        Ok(container)
    }

    /// Unwrap the vault keys with `passphrase`.
    ///
    /// Runs the KDF; call off the async executor.
    ///
    /// # Errors
    /// - `VaultLocked` if the passphrase is wrong
    pub fn open(&self, passphrase: &[u8]) -> Result<VaultKeys> {
        let kek = derive_key(passphrase, &self.salt, &self.kdf_params)
            .map_err(|e| Error::VaultLocked(e.to_string()))?;
        let content = kek
            .unwrap_key(&self.content_key)
            .map_err(|_| Error::VaultLocked("Invalid passphrase".to_string()))?;
        let name = kek
            .unwrap_key(&self.name_key)
            .map_err(|_| Error::VaultLocked("Invalid passphrase".to_string()))?;

        Ok(VaultKeys {
            content: ContentKey::from_bytes(content),
            name: NameKey::from_bytes(name),
        })
    }

    fn compute_checksum(&self) -> String {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.version.to_le_bytes());
        hasher.update(self.salt.as_bytes());
        hasher.update(self.kdf_params.memory_cost.to_le_bytes());
        hasher.update(self.kdf_params.time_cost.to_le_bytes());
        hasher.update(self.kdf_params.parallelism.to_le_bytes());
        for wrapped in [&self.content_key, &self.name_key] {
            hasher.update((wrapped.len() as u64).to_le_bytes());
            hasher.update(wrapped);
        }
        hasher.update((self.shortening_threshold as u64).to_le_bytes());
        hasher.update(self.created_at.to_rfc3339().as_bytes());
        STANDARD.encode(hasher.finalize())
    }

    /// Check format version and checksum.
    ///
    /// # Errors
    /// - `VaultCorrupt` on any mismatch
    pub fn verify(&self) -> Result<()> {
        if self.version != CONTAINER_VERSION {
            return Err(Error::VaultCorrupt(format!(
                "Unsupported key container version: {}",
                self.version
            )));
        }
        let expected = self.compute_checksum();
        if !bool::from(expected.as_bytes().ct_eq(self.checksum.as_bytes())) {
            return Err(Error::VaultCorrupt("Key container checksum mismatch".to_string()));
        }
        self.kdf_params
            .validate()
            .map_err(|e| Error::VaultCorrupt(e.to_string()))?;
        if self.shortening_threshold < 32 {
            return Err(Error::VaultCorrupt(format!(
                "Invalid shortening threshold: {}",
                self.shortening_threshold
            )));
        }
        Ok(())
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse and verify stored bytes.
    ///
    /// # Errors
    /// - `VaultCorrupt` if the bytes are not a valid container
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let container: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::VaultCorrupt(format!("Unreadable key container: {}", e)))?;
        container.verify()?;
        Ok(container)
    }
}
