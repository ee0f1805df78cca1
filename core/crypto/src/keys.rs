//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use skiff_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the KDF salt in bytes.
pub const SALT_LENGTH: usize = 32;

fn random_key() -> [u8; KEY_LENGTH] {
    use rand::RngCore;
    let mut key = [0u8; KEY_LENGTH];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn key_from_slice(bytes: &[u8]) -> Result<[u8; KEY_LENGTH]> {
    bytes.try_into().map_err(|_| {
        Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            bytes.len()
        ))
    })
}

/// Key derived from the vault passphrase.
///
/// Only ever used to wrap and unwrap the vault keys stored in the key
/// container; it never touches file names or content.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey {
    key: [u8; KEY_LENGTH],
}

impl KeyEncryptionKey {
    /// Create a key-encryption key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Encrypt a vault key for storage in the key container.
    pub fn wrap(&self, key: &[u8; KEY_LENGTH]) -> Result<Vec<u8>> {
        crate::aead::encrypt(&self.key, key)
    }

    /// Decrypt a wrapped vault key.
    ///
    /// # Errors
    /// - Authentication failure when this key does not match the one used to wrap
    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<[u8; KEY_LENGTH]> {
        let mut plain = crate::aead::decrypt(&self.key, wrapped)?;
        let key = key_from_slice(&plain);
        plain.zeroize();
        key
    }
}

impl fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyEncryptionKey([REDACTED])")
    }
}

/// Key for encrypting file contents.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    key: [u8; KEY_LENGTH],
}

impl ContentKey {
    /// Create a content key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Generate a random content key.
    pub fn generate() -> Self {
        Self { key: random_key() }
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey([REDACTED])")
    }
}

/// Key for encrypting file names and hashing directory identifiers.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NameKey {
    key: [u8; KEY_LENGTH],
}

impl NameKey {
    /// Create a name key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Generate a random name key.
    pub fn generate() -> Self {
        Self { key: random_key() }
    }
}

impl fmt::Debug for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameKey([REDACTED])")
    }
}

/// The pair of keys an unlocked vault works with.
#[derive(Clone, Debug)]
pub struct VaultKeys {
    pub content: ContentKey,
    pub name: NameKey,
}

impl VaultKeys {
    /// Generate a fresh, independent key pair.
    pub fn generate() -> Self {
        Self {
            content: ContentKey::generate(),
            name: NameKey::generate(),
        }
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}
