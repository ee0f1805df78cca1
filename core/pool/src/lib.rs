//! Connection sharing for skiff.
//!
//! A [`ConnectionGate`] bounds how many operations use one session at a
//! time, opens the transport lazily, and decides from the failure each
//! caller reports whether the transport must be re-established. The
//! capabilities it hands out are routed through the gate's
//! [`VaultRegistry`](skiff_vault::VaultRegistry).

pub mod diagnostics;
pub mod gate;
pub mod retry;

pub use diagnostics::{classify, FailureKind};
pub use gate::{ConnectionGate, GateConfig, Lease};
pub use retry::{RetryConfig, RetryExecutor};
