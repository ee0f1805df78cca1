//! Passphrase prompts.

use std::fmt;

use skiff_common::{Error, RemotePath, Result, SensitiveBytes};

/// Why a passphrase is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptReason {
    /// A new vault is being created.
    Create,
    /// An existing vault is being unlocked.
    Unlock,
}

impl fmt::Display for PromptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("Create vault"),
            Self::Unlock => f.write_str("Unlock vault"),
        }
    }
}

/// Source of vault passphrases.
///
/// `prompt` may block, so callers run it on a blocking thread.
pub trait PasswordCallback: Send + Sync {
    /// Ask for the passphrase of the vault at `root`.
    ///
    /// # Errors
    /// - `Cancelled` if the user dismissed the prompt
    fn prompt(&self, root: &RemotePath, reason: PromptReason) -> Result<SensitiveBytes>;
}

/// Always answers with the same passphrase.
pub struct StaticPassword(SensitiveBytes);

impl StaticPassword {
    pub fn new(passphrase: impl Into<SensitiveBytes>) -> Self {
        Self(passphrase.into())
    }
}

impl PasswordCallback for StaticPassword {
    fn prompt(&self, _root: &RemotePath, _reason: PromptReason) -> Result<SensitiveBytes> {
        Ok(self.0.clone())
    }
}

/// Never supplies a passphrase.
#[derive(Debug, Default)]
pub struct DisabledPasswordCallback;

impl PasswordCallback for DisabledPasswordCallback {
    fn prompt(&self, _root: &RemotePath, _reason: PromptReason) -> Result<SensitiveBytes> {
        Err(Error::Cancelled)
    }
}
