//! Cooperative cancellation.
//!
//! Long-running calls take a `&dyn CancelCallback` and poll it at their
//! suspension points. Nothing is interrupted forcibly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use skiff_common::{Error, Result};

/// Answers whether the caller has given up on the current operation.
pub trait CancelCallback: Send + Sync {
    fn is_cancelled(&self) -> bool;

    /// Fail with [`Error::Cancelled`] if cancellation was requested.
    fn verify(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCancelCallback;

impl CancelCallback for DisabledCancelCallback {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl CancelCallback for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

impl CancelCallback for CancellationToken {
    fn is_cancelled(&self) -> bool {
        CancellationToken::is_cancelled(self)
    }
}

impl<T: CancelCallback + ?Sized> CancelCallback for Arc<T> {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_cancels() {
        assert!(DisabledCancelCallback.verify().is_ok());
    }

    #[test]
    fn test_atomic_flag() {
        let flag = AtomicBool::new(false);
        assert!(flag.verify().is_ok());
        flag.store(true, Ordering::SeqCst);
        assert!(matches!(flag.verify(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let child = token.child_token();
        assert!(!CancelCallback::is_cancelled(&child));
        token.cancel();
        assert!(matches!(child.verify(), Err(Error::Cancelled)));
    }
}
