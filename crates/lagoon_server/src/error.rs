//! Error types for the gateway core.
//!
//! Expected conditions (lookup misses, duplicate inserts) never surface
//! here; the registries absorb and log those. An error means the caller has
//! to react: a full match table, a failed store query, or a startup
//! misconfiguration that must stop the process.

use thiserror::Error;

use crate::store::StoreError;

/// Top-level error type for gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network-related error (socket creation, bind, listen failures).
    #[error("Network error: {0}")]
    Network(String),

    /// The configured listening address is not a recognized address family.
    /// Raised before the listener binds; the process must not start.
    #[error("Invalid listen address: {0}")]
    ListenAddress(String),

    /// The match slot table has no free slot. The caller decides how to
    /// react (typically by refusing the match-create request).
    #[error("Match slot table is full (capacity {0})")]
    MatchSlotsFull(usize),

    /// A persistent-store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal invariant failure or unclassified error.
    #[error("Internal error: {0}")]
    Internal(String),
}
