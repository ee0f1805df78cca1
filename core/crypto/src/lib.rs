//! Cryptographic primitives for skiff vaults.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Secure key management with automatic zeroization
//! - Deterministic, directory-bound filename encryption
//! - Chunked content encryption with per-chunk authentication
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod content;
pub mod kdf;
pub mod keys;
pub mod names;

pub use aead::{decrypt, encrypt};
pub use content::{ContentDecryptor, ContentEncryptor, FileHeader};
pub use kdf::{derive_key, KdfParams};
pub use keys::{ContentKey, KeyEncryptionKey, NameKey, Salt, VaultKeys};
