//! Common utilities and types shared across the skiff crates.
//!
//! This module provides the error taxonomy and the remote path model used by
//! sessions, vaults and the connection gate.

pub mod error;
pub mod types;

pub use error::{Error, NetworkErrorKind, Result};
pub use types::{EntryType, RemotePath, SensitiveBytes};
