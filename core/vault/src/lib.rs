//! Encrypting storage overlay for skiff.
//!
//! This module provides:
//! - Vault creation and unlock against any session's native capabilities
//! - Deterministic path and name encryption with per-directory identifiers
//! - Chunked, authenticated content encryption as byte-stream wrappers
//! - A registry resolving the vault that governs a path
//! - Capability decorators that route each storage operation through it
//!
//! # Architecture
//! The vault layer sits between callers and a session's native
//! capabilities. Callers see cleartext paths and content; the backend only
//! ever sees the ciphertext layout.

pub mod config;
pub mod content;
pub mod crypto_vault;
pub mod directory;
pub mod features;
pub mod password;
pub mod registry;
pub mod vault;

pub use config::KeyContainer;
pub use crypto_vault::{CiphertextNode, CryptoVault, LongName};
pub use directory::{DirectoryIdCache, DirectoryInfo};
pub use features::decorate;
pub use password::{DisabledPasswordCallback, PasswordCallback, PromptReason, StaticPassword};
pub use registry::VaultRegistry;
pub use vault::{DisabledVault, Vault};
