//! Read-through caches shared across connection handlers.

use dashmap::{DashMap, DashSet};
use std::net::IpAddr;
use tokio::sync::Mutex;

use crate::resources::GeoLocation;
use crate::session::CredentialVerifier;

/// Memoizes successful credential verifications.
///
/// The slow hash comparison runs at most once per (stored hash, candidate)
/// pair that succeeds; later logins with the same secret are a map lookup.
/// Failed candidates are never cached, so a wrong secret always re-verifies.
#[derive(Debug, Default)]
pub struct CredentialCache {
    verified: DashMap<String, String>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `candidate_md5` against `stored_hash`, consulting the cache
    /// before falling back to the verifier.
    pub async fn verify(
        &self,
        stored_hash: &str,
        candidate_md5: &str,
        verifier: &dyn CredentialVerifier,
    ) -> bool {
        if let Some(known) = self.verified.get(stored_hash) {
            return known.value() == candidate_md5;
        }

        if verifier.verify(stored_hash, candidate_md5).await {
            self.verified
                .insert(stored_hash.to_string(), candidate_md5.to_string());
            true
        } else {
            false
        }
    }
}

/// A cached beatmap lookup result.
#[derive(Debug, Clone)]
pub struct BeatmapEntry {
    pub id: i64,
    pub md5: String,
    pub title: String,
}

/// A point-in-time snapshot of the public service status, rebuilt lazily
/// after each invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub online_players: usize,
    pub active_matches: usize,
}

/// The gateway's shared caches.
///
/// Each map is a read-through cache over something expensive: a geolocation
/// lookup, a beatmap fetch, a known-bad submission. Entries are written once
/// per key and read from many handlers, which is `DashMap`'s sweet spot; the
/// status snapshot is the one cache with a rebuild cycle, so it sits behind a
/// lock with explicit invalidation.
#[derive(Debug, Default)]
pub struct Caches {
    /// Resolved geolocation per client address.
    pub ip: DashMap<IpAddr, GeoLocation>,

    /// Beatmap metadata keyed by content hash.
    pub beatmaps: DashMap<String, BeatmapEntry>,

    /// Hashes known to have no submitted beatmap; cached to skip re-fetching.
    pub unsubmitted: DashSet<String>,

    /// Hashes whose beatmap has a newer revision upstream.
    pub needs_update: DashSet<String>,

    status: Mutex<Option<StatusSnapshot>>,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached status snapshot, if one is live.
    pub async fn cached_status(&self) -> Option<StatusSnapshot> {
        self.status.lock().await.clone()
    }

    /// Stores a freshly built status snapshot.
    pub async fn store_status(&self, snapshot: StatusSnapshot) {
        *self.status.lock().await = Some(snapshot);
    }

    /// Drops the cached status snapshot; the next read rebuilds it.
    pub async fn invalidate_status(&self) {
        *self.status.lock().await = None;
    }
}
