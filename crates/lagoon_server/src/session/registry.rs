//! The authoritative registry of online player sessions.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::CredentialCache;
use crate::session::{make_safe_name, CredentialVerifier, PlayerId, PlayerSession, SessionToken};
use crate::store::{Store, StoreError};

/// The set of currently connected player sessions.
///
/// Structural mutation (insert/remove) is serialized by the registry-wide
/// write lock; lookups take the read lock and scan. Sessions are shared as
/// `Arc`s, so a handler can keep using one it resolved even while the
/// registry changes under it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<Vec<Arc<PlayerSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of online sessions (bots included).
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Resolves a session by its token.
    pub async fn get_by_token(&self, token: SessionToken) -> Option<Arc<PlayerSession>> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|s| s.token == token)
            .cloned()
    }

    /// Resolves a session by stable player id.
    pub async fn get_by_id(&self, id: PlayerId) -> Option<Arc<PlayerSession>> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Resolves a session by name, applying the same normalization used at
    /// insertion.
    pub async fn get_by_name(&self, name: &str) -> Option<Arc<PlayerSession>> {
        let safe_name = make_safe_name(name);
        self.sessions
            .read()
            .await
            .iter()
            .find(|s| s.safe_name == safe_name)
            .cloned()
    }

    /// Resolves by id, falling back to the persistent store on a miss.
    ///
    /// A store hit is an *offline* player, not a new session: the projection
    /// carries the nil token and is not inserted into the registry.
    pub async fn get_ensure_by_id(
        &self,
        id: PlayerId,
        store: &dyn Store,
    ) -> Result<Option<Arc<PlayerSession>>, StoreError> {
        if let Some(session) = self.get_by_id(id).await {
            return Ok(Some(session));
        }

        Ok(store
            .fetch_user_by_id(id)
            .await?
            .map(|record| Arc::new(PlayerSession::offline_projection(record))))
    }

    /// Resolves by name, falling back to the persistent store on a miss.
    /// Same projection semantics as [`get_ensure_by_id`](Self::get_ensure_by_id).
    pub async fn get_ensure_by_name(
        &self,
        name: &str,
        store: &dyn Store,
    ) -> Result<Option<Arc<PlayerSession>>, StoreError> {
        if let Some(session) = self.get_by_name(name).await {
            return Ok(Some(session));
        }

        Ok(store
            .fetch_user_by_safe_name(&make_safe_name(name))
            .await?
            .map(|record| Arc::new(PlayerSession::offline_projection(record))))
    }

    /// Authenticates an online session by name and candidate secret.
    ///
    /// Resolution is online-only; the slow hash comparison goes through the
    /// credential cache so repeat logins with the same secret skip it.
    pub async fn authenticate(
        &self,
        name: &str,
        pw_md5: &str,
        verifier: &dyn CredentialVerifier,
        credentials: &CredentialCache,
    ) -> Option<Arc<PlayerSession>> {
        let session = self.get_by_name(name).await?;

        if credentials.verify(&session.pw_hash, pw_md5, verifier).await {
            Some(session)
        } else {
            None
        }
    }

    /// Adds a session. A session with the same identity already present is
    /// a logged no-op, not an error.
    pub async fn insert(&self, session: Arc<PlayerSession>) {
        let mut sessions = self.sessions.write().await;

        if sessions
            .iter()
            .any(|s| s.id == session.id || s.token == session.token)
        {
            warn!("{session} double-added to the session registry?");
            return;
        }

        debug!("{session} added to the session registry");
        sessions.push(session);
    }

    /// Removes a session, returning whether it was present. Removal of an
    /// absent session is a logged no-op.
    ///
    /// Teardown side effects beyond the registry itself (clan/match cleanup,
    /// departure broadcast) belong to [`Gateway::logout`](crate::Gateway::logout),
    /// which both client-initiated logout and the liveness reaper go through.
    pub async fn remove(&self, session: &Arc<PlayerSession>) -> bool {
        let mut sessions = self.sessions.write().await;

        let Some(idx) = sessions.iter().position(|s| Arc::ptr_eq(s, session)) else {
            warn!("{session} removed from the session registry while not online?");
            return false;
        };

        sessions.remove(idx);
        debug!("{session} removed from the session registry");
        true
    }

    /// A point-in-time snapshot of every online session, for iteration
    /// outside the registry lock (reaper sweeps, broadcasts).
    pub async fn snapshot(&self) -> Vec<Arc<PlayerSession>> {
        self.sessions.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Privileges;
    use crate::store::{MemoryStore, UserRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: i64, name: &str) -> UserRecord {
        UserRecord {
            id: PlayerId(id),
            name: name.to_string(),
            safe_name: make_safe_name(name),
            pw_hash: format!("$2b$hash-{id}"),
            privileges: Privileges::NORMAL,
            clan_id: None,
            clan_role: None,
            api_key: None,
            supporter_until: None,
        }
    }

    fn session(id: i64, name: &str) -> Arc<PlayerSession> {
        Arc::new(PlayerSession::from_record(record(id, name)))
    }

    /// Counts how many times the slow comparison actually runs.
    struct CountingVerifier {
        calls: AtomicUsize,
        accept: String,
    }

    #[async_trait]
    impl CredentialVerifier for CountingVerifier {
        async fn verify(&self, _stored_hash: &str, candidate_md5: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            candidate_md5 == self.accept
        }
    }

    #[tokio::test]
    async fn lookup_reflects_latest_insert_and_remove() {
        let registry = SessionRegistry::new();
        let p = session(1, "Rhythm");

        registry.insert(p.clone()).await;
        assert!(registry.get_by_id(PlayerId(1)).await.is_some());

        registry.remove(&p).await;
        assert!(registry.get_by_id(PlayerId(1)).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_noop() {
        let registry = SessionRegistry::new();
        let p = session(1, "Rhythm");

        registry.insert(p.clone()).await;
        registry.insert(p.clone()).await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn removing_an_absent_session_is_a_noop() {
        let registry = SessionRegistry::new();
        let p = session(1, "Rhythm");

        assert!(!registry.remove(&p).await);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn no_two_active_sessions_share_a_token() {
        let registry = SessionRegistry::new();
        let a = session(1, "A");
        let b = session(2, "B");

        registry.insert(a.clone()).await;
        registry.insert(b.clone()).await;

        let snapshot = registry.snapshot().await;
        let mut tokens: Vec<_> = snapshot.iter().map(|s| s.token).collect();
        tokens.dedup();
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test]
    async fn name_lookup_normalizes() {
        let registry = SessionRegistry::new();
        registry.insert(session(7, "Foo Bar")).await;

        assert!(registry.get_by_name("foo_bar").await.is_some());
        assert!(registry.get_by_name("Foo Bar").await.is_some());
        assert!(registry.get_by_name("FOO BAR").await.is_some());
        assert!(registry.get_by_name("foobar").await.is_none());
    }

    #[tokio::test]
    async fn token_lookup_resolves() {
        let registry = SessionRegistry::new();
        let p = session(9, "Tokened");
        registry.insert(p.clone()).await;

        assert!(registry.get_by_token(p.token).await.is_some());
        assert!(registry
            .get_by_token(SessionToken::generate())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn store_fallback_is_a_projection_not_a_login() {
        let registry = SessionRegistry::new();
        let store = MemoryStore::new();
        store.add_user(record(42, "Offline Guy"));

        let found = registry
            .get_ensure_by_name("offline guy", &store)
            .await
            .unwrap()
            .expect("store should resolve the user");

        assert!(found.token.is_offline());
        assert_eq!(registry.len().await, 0);

        // A miss in both places stays a miss.
        assert!(registry
            .get_ensure_by_id(PlayerId(999), &store)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn authenticate_memoizes_the_slow_comparison() {
        let registry = SessionRegistry::new();
        let credentials = CredentialCache::new();
        let verifier = CountingVerifier {
            calls: AtomicUsize::new(0),
            accept: "md5-good".to_string(),
        };

        registry.insert(session(1, "Login Guy")).await;

        for _ in 0..3 {
            let ok = registry
                .authenticate("login guy", "md5-good", &verifier, &credentials)
                .await;
            assert!(ok.is_some());
        }

        // First call hits the verifier; the next two are cache hits.
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);

        // A wrong candidate after a cached success fails without rehashing.
        let denied = registry
            .authenticate("login guy", "md5-bad", &verifier, &credentials)
            .await;
        assert!(denied.is_none());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn authenticate_is_online_only() {
        let registry = SessionRegistry::new();
        let credentials = CredentialCache::new();
        let verifier = CountingVerifier {
            calls: AtomicUsize::new(0),
            accept: "md5-good".to_string(),
        };

        let denied = registry
            .authenticate("nobody", "md5-good", &verifier, &credentials)
            .await;
        assert!(denied.is_none());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }
}
