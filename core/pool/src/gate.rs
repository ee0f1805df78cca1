//! Bounded sharing of one session.
//!
//! Callers [`borrow`](ConnectionGate::borrow) a [`Lease`], run operations
//! through its capabilities and hand it back with
//! [`release`](ConnectionGate::release), reporting any failure. Permits are
//! granted in FIFO order by a fair semaphore.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::diagnostics::{classify, FailureKind};
use skiff_common::{Error, Result};
use skiff_session::{
    CancelCallback, Capabilities, Host, Session, SessionState, TracingTranscript,
    TranscriptListener,
};
use skiff_vault::VaultRegistry;

/// Default number of concurrent leases.
pub const DEFAULT_MAX_TOTAL: usize = 10;

/// Marks no transport as condemned.
const NO_GENERATION: u64 = u64::MAX;

/// Gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Maximum number of concurrent leases.
    pub max_total: usize,
    /// How often cancellation is polled while waiting.
    pub cancel_poll_interval: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_total: DEFAULT_MAX_TOTAL,
            cancel_poll_interval: Duration::from_millis(50),
        }
    }
}

impl GateConfig {
    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.max_total = max_total;
        self
    }

    pub fn with_cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval = interval;
        self
    }
}

/// The semaphore plus permits owed after a shrink.
///
/// Shrinking below the number of outstanding leases cannot take permits
/// away from their holders, so the shortfall is recorded as debt and paid
/// off as leases come back.
struct Permits {
    semaphore: Arc<Semaphore>,
    debt: AtomicUsize,
}

impl Permits {
    fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            debt: AtomicUsize::new(0),
        }
    }

    /// Take `n` off the debt, returning how many were taken.
    fn pay_debt(&self, n: usize) -> usize {
        let mut debt = self.debt.load(Ordering::SeqCst);
        loop {
            let paid = debt.min(n);
            if paid == 0 {
                return 0;
            }
            match self
                .debt
                .compare_exchange(debt, debt - paid, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return paid,
                Err(current) => debt = current,
            }
        }
    }

    fn settle(&self, permit: OwnedSemaphorePermit) {
        if self.pay_debt(1) == 1 {
            permit.forget();
        }
    }

    fn grow(&self, n: usize) {
        let owed = self.pay_debt(n);
        self.semaphore.add_permits(n - owed);
    }

    fn shrink(&self, n: usize) {
        let forgotten = self.semaphore.forget_permits(n);
        self.debt.fetch_add(n - forgotten, Ordering::SeqCst);
    }
}

/// One caller's right to use the session.
///
/// The permit goes back to the gate exactly once, when the lease is
/// released or dropped.
pub struct Lease {
    session: Arc<dyn Session>,
    capabilities: Capabilities,
    permits: Arc<Permits>,
    permit: Option<OwnedSemaphorePermit>,
    /// Transport generation this lease was handed out on.
    generation: u64,
}

impl Lease {
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Vault-routed capabilities.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// The session's own capabilities, bypassing every vault.
    pub fn native_capabilities(&self) -> Capabilities {
        self.session.capabilities()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.permits.settle(permit);
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("host", self.session.host())
            .finish_non_exhaustive()
    }
}

/// Resolves once `cancel` reports cancellation.
async fn cancelled(cancel: &dyn CancelCallback, interval: Duration) -> Error {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if cancel.is_cancelled() {
            return Error::Cancelled;
        }
    }
}

/// Bounds concurrent use of one session.
pub struct ConnectionGate {
    session: Arc<dyn Session>,
    registry: Arc<VaultRegistry>,
    capabilities: Capabilities,
    transcript: Arc<dyn TranscriptListener>,
    permits: Arc<Permits>,
    capacity: AtomicUsize,
    /// Serializes resize, evict and shutdown.
    state_lock: Mutex<()>,
    /// Serializes transport open and forced close.
    connect_lock: Mutex<()>,
    /// Bumped on every open and close of the transport.
    generation: AtomicU64,
    /// Generation whose transport must be closed before reuse.
    condemned: AtomicU64,
    shut_down: AtomicBool,
    config: GateConfig,
}

impl ConnectionGate {
    /// Create a gate over `session`, routing capabilities through `registry`.
    ///
    /// # Errors
    /// - `InvalidInput` if `config.max_total` is zero
    pub fn new(
        session: Arc<dyn Session>,
        registry: Arc<VaultRegistry>,
        config: GateConfig,
    ) -> Result<Self> {
        if config.max_total == 0 {
            return Err(Error::InvalidInput(
                "Gate capacity must be positive".to_string(),
            ));
        }
        let capabilities = skiff_vault::decorate(&registry, &session.capabilities());
        Ok(Self {
            session,
            registry,
            capabilities,
            transcript: Arc::new(TracingTranscript),
            permits: Arc::new(Permits::new(config.max_total)),
            capacity: AtomicUsize::new(config.max_total),
            state_lock: Mutex::new(()),
            connect_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            condemned: AtomicU64::new(NO_GENERATION),
            shut_down: AtomicBool::new(false),
            config,
        })
    }

    /// Use `listener` instead of the tracing transcript.
    pub fn with_transcript(mut self, listener: Arc<dyn TranscriptListener>) -> Self {
        self.transcript = listener;
        self
    }

    fn check_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(Error::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Wait for a permit, then make sure the transport is open.
    ///
    /// # Errors
    /// - `ShutDown` after [`shutdown`](Self::shutdown)
    /// - `Cancelled` if `cancel` fires while waiting or opening
    /// - Errors from opening the session
    pub async fn borrow(&self, cancel: &dyn CancelCallback) -> Result<Lease> {
        self.check_running()?;
        let interval = self.config.cancel_poll_interval;

        let permit = tokio::select! {
            permit = self.permits.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| Error::ShutDown)?
            }
            error = cancelled(cancel, interval) => return Err(error),
        };
        let mut lease = Lease {
            session: self.session.clone(),
            capabilities: self.capabilities.clone(),
            permits: self.permits.clone(),
            permit: Some(permit),
            generation: NO_GENERATION,
        };

        // Dropping the lease on any error below returns the permit.
        self.check_running()?;
        lease.generation = self.ensure_open(cancel).await?;
        Ok(lease)
    }

    /// Open the transport unless it is usable, returning its generation.
    async fn ensure_open(&self, cancel: &dyn CancelCallback) -> Result<u64> {
        cancel.verify()?;
        let _connect = self.connect_lock.lock().await;
        self.close_if_condemned().await;
        if self.session.state() == SessionState::Connected {
            return Ok(self.generation.load(Ordering::SeqCst));
        }

        self.session.add_listener(self.transcript.clone());
        debug!(host = %self.session.host(), "Opening session");
        let interval = self.config.cancel_poll_interval;
        let outcome = tokio::select! {
            result = self.session.open(cancel) => result,
            error = cancelled(cancel, interval) => Err(error),
        };
        match outcome {
            Ok(()) => Ok(self.generation.fetch_add(1, Ordering::SeqCst) + 1),
            Err(Error::Cancelled) => {
                self.close_locked().await;
                Err(Error::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the transport. The caller holds `connect_lock`.
    async fn close_locked(&self) {
        if let Err(e) = self.session.close().await {
            warn!(host = %self.session.host(), error = %e, "Failed to close session");
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Close the transport if its current generation was condemned. The
    /// caller holds `connect_lock`.
    async fn close_if_condemned(&self) {
        let current = self.generation.load(Ordering::SeqCst);
        if self
            .condemned
            .compare_exchange(current, NO_GENERATION, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.close_locked().await;
        }
    }

    /// Return a lease, reporting the failure of the work done with it.
    ///
    /// A network failure condemns the transport the lease was handed out
    /// on. It is closed right away when no open is in flight, otherwise by
    /// the next borrow. Failures from a transport that has since been
    /// closed or reopened are ignored. Never waits on an open in progress.
    pub async fn release(&self, lease: Lease, failure: Option<&Error>) {
        if let Some(error) = failure {
            if classify(error) == FailureKind::Network {
                self.condemn(lease.generation, error).await;
            }
        }
        drop(lease);
    }

    async fn condemn(&self, generation: u64, error: &Error) {
        if generation != self.generation.load(Ordering::SeqCst) {
            debug!(host = %self.session.host(), error = %error, "Network failure on a replaced connection");
            return;
        }
        warn!(host = %self.session.host(), error = %error, "Network failure, closing session");
        self.condemned.store(generation, Ordering::SeqCst);
        if let Ok(_connect) = self.connect_lock.try_lock() {
            self.close_if_condemned().await;
        }
    }

    /// Borrow, run `operation` with the routed capabilities, release.
    pub async fn execute<T, F, Fut>(&self, cancel: &dyn CancelCallback, operation: F) -> Result<T>
    where
        F: FnOnce(Capabilities) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lease = self.borrow(cancel).await?;
        let result = operation(lease.capabilities().clone()).await;
        self.release(lease, result.as_ref().err()).await;
        result
    }

    /// Change the number of concurrent leases.
    ///
    /// Outstanding leases stay valid; when shrinking below them, new
    /// borrowers wait until enough have been returned.
    ///
    /// # Errors
    /// - `InvalidInput` if `max_total` is zero
    /// - `ShutDown` after [`shutdown`](Self::shutdown)
    pub async fn resize(&self, max_total: usize) -> Result<()> {
        if max_total == 0 {
            return Err(Error::InvalidInput(
                "Gate capacity must be positive".to_string(),
            ));
        }
        let _state = self.state_lock.lock().await;
        self.check_running()?;

        let old = self.capacity.swap(max_total, Ordering::SeqCst);
        if max_total > old {
            self.permits.grow(max_total - old);
        } else if max_total < old {
            self.permits.shrink(old - max_total);
        }
        info!(host = %self.session.host(), from = old, to = max_total, "Resized connection gate");
        Ok(())
    }

    /// Close the transport, detach the transcript and forget every vault.
    ///
    /// The gate stays usable; the next borrow reopens the session.
    pub async fn evict(&self) {
        let _state = self.state_lock.lock().await;
        self.evict_locked().await;
    }

    async fn evict_locked(&self) {
        {
            let _connect = self.connect_lock.lock().await;
            self.close_locked().await;
        }
        self.session.remove_listener(&self.transcript);
        self.registry.clear();
        info!(host = %self.session.host(), "Evicted session");
    }

    /// Evict and refuse all further borrows.
    pub async fn shutdown(&self) {
        let _state = self.state_lock.lock().await;
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.evict_locked().await;
        self.permits.semaphore.close();
        info!(host = %self.session.host(), "Connection gate shut down");
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn host(&self) -> &Host {
        self.session.host()
    }

    /// Vault-routed capabilities, without taking a lease.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn registry(&self) -> &Arc<VaultRegistry> {
        &self.registry
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Permits free right now.
    pub fn available(&self) -> usize {
        self.permits.semaphore.available_permits()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ConnectionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGate")
            .field("host", self.session.host())
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
