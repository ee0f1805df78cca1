//! Retry with exponential backoff for network failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::diagnostics::{classify, FailureKind};
use crate::gate::ConnectionGate;
use skiff_common::{Error, Result};
use skiff_session::{CancelCallback, Capabilities};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let delay = if self.jitter {
            // +/- 25%
            capped * (0.75 + rand::random::<f64>() * 0.5)
        } else {
            capped
        };
        Duration::from_millis(delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Runs gate operations again when they fail with a network error.
///
/// Every attempt takes a fresh lease, so the transport closed after a
/// network failure is reopened before the next one.
#[derive(Debug, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` through `gate`, retrying network failures.
    ///
    /// # Errors
    /// - The first failure that does not classify as network
    /// - The last network failure once retries are exhausted
    /// - `Cancelled` if `cancel` fires between attempts
    pub async fn execute<T, F, Fut>(
        &self,
        gate: &ConnectionGate,
        cancel: &dyn CancelCallback,
        operation: F,
    ) -> Result<T>
    where
        F: Fn(Capabilities) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match gate.execute(cancel, &operation).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if classify(&err) == FailureKind::Network => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        warn!(attempts = attempt, error = %err, "Giving up after network failures");
                        return Err(err);
                    }
                    let delay = self.config.delay_for_attempt(attempt - 1);
                    warn!(attempt, error = %err, ?delay, "Network failure, retrying");
                    sleep(delay).await;
                    cancel.verify()?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Whether `error` is worth another attempt.
pub fn is_retryable(error: &Error) -> bool {
    classify(error) == FailureKind::Network
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateConfig;
    use skiff_common::{NetworkErrorKind, RemotePath};
    use skiff_crypto::KdfParams;
    use skiff_session::{DisabledCancelCallback, MemorySession, SessionState};
    use skiff_vault::{StaticPassword, VaultRegistry};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn gate(session: &Arc<MemorySession>) -> ConnectionGate {
        let registry = Arc::new(VaultRegistry::new(
            Arc::new(StaticPassword::new("test")),
            KdfParams::low_memory(),
        ));
        ConnectionGate::new(session.clone(), registry, GateConfig::default()).unwrap()
    }

    fn fast(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::new(max_retries)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::new(3)
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig::new(1).with_initial_delay(Duration::from_millis(1000));
        for _ in 0..50 {
            let delay = config.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(750) && delay <= Duration::from_millis(1250));
        }
    }

    #[tokio::test]
    async fn test_retry_reopens_session() {
        let session = Arc::new(MemorySession::new("h"));
        let gate = gate(&session);
        let calls = AtomicU32::new(0);

        let result = fast(3)
            .execute(&gate, &DisabledCancelCallback, |_caps| {
                let current = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if current < 2 {
                        Err(Error::network(NetworkErrorKind::ConnectionReset, "dropped"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(session.open_count(), 3);
        assert_eq!(gate.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_non_network_error_not_retried() {
        let session = Arc::new(MemorySession::new("h"));
        let gate = gate(&session);
        let calls = AtomicU32::new(0);

        let result: Result<()> = fast(3)
            .execute(&gate, &DisabledCancelCallback, |caps| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    caps.read()?
                        .read(&RemotePath::file("/missing")?, &Default::default())
                        .await
                        .map(|_| ())
                }
            })
            .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let session = Arc::new(MemorySession::new("h"));
        let gate = gate(&session);
        let calls = AtomicU32::new(0);

        let result: Result<()> = fast(2)
            .execute(&gate, &DisabledCancelCallback, |_caps| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::network(NetworkErrorKind::Timeout, "slow")) }
            })
            .await;

        assert!(matches!(result, Err(Error::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(gate.available(), 10);
    }

    #[tokio::test]
    async fn test_cancel_stops_retrying() {
        let session = Arc::new(MemorySession::new("h"));
        let gate = gate(&session);
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<()> = fast(5)
            .execute(&gate, &token, |_caps| {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                async { Err(Error::network(NetworkErrorKind::BrokenPipe, "gone")) }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&Error::network(NetworkErrorKind::Dns, "x")));
        assert!(!is_retryable(&Error::Authorization("x".into())));
    }
}
