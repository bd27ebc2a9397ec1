//! # Lagoon Server - Session & Connection Lifecycle Core
//!
//! The in-memory heart of a real-time multiplayer game server gateway. This
//! crate owns the state that must stay consistent while many short-lived
//! client connections come and go: who is online, which multiplayer matches
//! are active, which chat channels and clans exist, and the background
//! maintenance that keeps all of it aligned with wall-clock time.
//!
//! ## Architecture Overview
//!
//! * **Session Registry** - The authoritative set of online player sessions
//! * **Match Slot Table** - Fixed-capacity allocation of multiplayer match ids
//! * **Channel / Clan Registries** - Store-backed collections mutated at runtime
//! * **Housekeeping Scheduler** - Independent periodic sweep/repair tasks
//! * **Connection Acceptor** - Bounded-wait accept loop with graceful drain
//! * **Resource Context** - Scoped acquisition of external dependencies
//!
//! All of this state hangs off a single [`Gateway`] context constructed once
//! at startup and shared by `Arc` - there is no ambient global state. The
//! wire protocol itself is an external collaborator behind the
//! [`ConnectionHandler`] seam; the persistent store sits behind [`Store`].
//!
//! ## Thread Safety
//!
//! The crate runs on the multi-threaded tokio runtime, so every registry
//! guards structural mutation with an explicit lock (`tokio::sync::RwLock`),
//! while hot scalar updates on a session (activity timestamps, privilege
//! bits) use atomics so readers never contend with the structural lock. The
//! read-through caches use `DashMap`, which fits their write-once-per-key
//! access pattern.

pub use config::{GatewayConfig, HousekeepingConfig, ListenAddress};
pub use context::Gateway;
pub use error::GatewayError;
pub use store::{Store, StoreError};

pub mod acceptor;
pub mod achievement;
pub mod cache;
pub mod channel;
pub mod clan;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod housekeeping;
pub mod matches;
pub mod mode;
pub mod resources;
pub mod session;
pub mod store;

pub use dispatch::ConnectionHandler;

// Re-exported so embedders can implement [`ConnectionHandler`] and the other
// async seams without depending on async-trait themselves.
pub use async_trait::async_trait;

/// Returns the current Unix timestamp in seconds.
///
/// Session activity tracking and the housekeeping sweeps all measure time
/// against this one clock so their comparisons are consistent.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
