//! Error taxonomy for the aggregation core.
//!
//! Spec §7 distinguishes four classes of failure: precondition (malformed
//! request), cache-state (no cache configured -- not actually an error),
//! transport (the injected RPC client failed), and remote-signalled (a
//! `CheckResponse`/`AllocateQuotaResponse` carrying populated error lists,
//! which are ordinary data, never a `Result::Err`). Only the first three
//! show up here; remote-signalled errors are carried as response values.

use thiserror::Error;

/// Errors raised by the public entry points of this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller passed a malformed request: wrong service name, a missing
    /// operation, or some other invariant violation that must never reach
    /// the caches.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Transport (the injected RPC client) failed. Callers on the fast path
    /// never see this directly -- the facade swallows it and fails open --
    /// but it is surfaced here so the scheduler and tests can log/assert it.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The facade has not been started, or has already been stopped.
    #[error("facade precondition: {0}")]
    Lifecycle(String),
}

/// Error type returned by the injected [`crate::transport::Transport`].
///
/// The core treats every transport failure identically regardless of cause
/// (spec §7: swallow, log, fail open), so this only needs enough structure
/// to produce a useful log line.
#[derive(Debug, Error)]
#[error("{method} RPC failed: {message}")]
pub struct TransportError {
    pub method: &'static str,
    pub message: String,
}

impl TransportError {
    pub fn new(method: &'static str, message: impl Into<String>) -> Self {
        Self {
            method,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
