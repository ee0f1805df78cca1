//! Common error types for skiff.

use std::fmt;

use thiserror::Error;

/// Structural cause of a network failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The peer did not answer in time.
    Timeout,
    /// The connection was reset or aborted by the peer.
    ConnectionReset,
    /// The peer refused the connection.
    ConnectionRefused,
    /// The transport broke while writing.
    BrokenPipe,
    /// Host name resolution failed.
    Dns,
    /// No route to the host.
    Unreachable,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection reset",
            Self::ConnectionRefused => "connection refused",
            Self::BrokenPipe => "broken pipe",
            Self::Dns => "dns",
            Self::Unreachable => "unreachable",
        };
        f.write_str(name)
    }
}

/// Top-level error type for skiff operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller canceled the operation.
    #[error("Operation canceled")]
    Cancelled,

    /// Transport-level failure. Forces a reconnect when reported on release.
    #[error("Network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// Credentials were rejected by the backend.
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Wrong or missing vault passphrase.
    #[error("Vault locked: {0}")]
    VaultLocked(String),

    /// No key container at the vault root.
    #[error("Vault not found: {0}")]
    VaultNotFound(String),

    /// Key container unreadable or inconsistent.
    #[error("Vault corrupt: {0}")]
    VaultCorrupt(String),

    /// Encrypted content failed authentication.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// A ciphertext path segment could not be decrypted.
    #[error("Path translation failed: {0}")]
    PathTranslation(String),

    /// Opaque failure reported by a backend.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Conflicting concurrent modification.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The session does not provide the requested capability.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The connection gate has been shut down.
    #[error("Connection pool shut down")]
    ShutDown,
}

impl Error {
    /// Build a network error of the given kind.
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
