//! Player sessions and the online-session registry.
//!
//! A [`PlayerSession`] is the in-memory record of one currently connected,
//! authenticated client; the [`SessionRegistry`] is the authoritative set of
//! them. Lookup keys are the session token, the stable player id, and the
//! normalized name produced by [`make_safe_name`].

pub mod player;
pub mod registry;

pub use player::{ClanMembership, ClanRole, PlayerSession, Privileges, SessionToken};
pub use registry::SessionRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable integer identity of a player, assigned by the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub i64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalizes a display name into the lookup key used by the registry.
///
/// Applied identically at insertion and lookup so `"Foo Bar"` and
/// `"foo_bar"` resolve to the same session.
pub fn make_safe_name(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Compares a stored credential hash against a candidate secret.
///
/// The comparison is deliberately slow (that is the point of the hash), so
/// callers route it through the credential cache, which memoizes known-good
/// results per stored hash.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Returns whether `candidate_md5` is the secret behind `stored_hash`.
    async fn verify(&self, stored_hash: &str, candidate_md5: &str) -> bool;
}
