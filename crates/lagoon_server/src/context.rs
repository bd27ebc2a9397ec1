//! The gateway context: every piece of shared state, in one place.
//!
//! There is no ambient global state anywhere in the crate. A [`Gateway`] is
//! built once at startup by [`Gateway::bootstrap`] and handed to connection
//! handlers and housekeeping tasks as an `Arc`; anything that needs the
//! session registry, the match table, or a cache reaches through it.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::achievement::Achievement;
use crate::cache::{Caches, StatusSnapshot};
use crate::channel::ChannelRegistry;
use crate::clan::ClanRegistry;
use crate::config::GatewayConfig;
use crate::current_timestamp;
use crate::error::GatewayError;
use crate::matches::MatchSlotTable;
use crate::resources::{GeoLookup, MetricsSink, Resources};
use crate::session::{PlayerId, PlayerSession, SessionRegistry};
use crate::store::Store;

/// Account id reserved for the server-owned bot.
pub const BOT_PLAYER_ID: PlayerId = PlayerId(1);

/// The shared state of a running gateway.
pub struct Gateway {
    pub config: GatewayConfig,
    pub store: Arc<dyn Store>,
    pub geo: Option<Arc<dyn GeoLookup>>,
    pub metrics: Arc<dyn MetricsSink>,

    pub sessions: SessionRegistry,
    pub matches: MatchSlotTable,
    pub channels: ChannelRegistry,
    pub clans: ClanRegistry,
    pub caches: Caches,

    /// Achievement definitions, loaded once at startup and read-only after.
    pub achievements: Vec<Achievement>,

    /// Issued API keys, keyed by the key itself.
    pub api_keys: DashMap<String, PlayerId>,

    /// The server-owned bot session; also present in the registry.
    pub bot: Arc<PlayerSession>,

    started_at: u64,
}

impl Gateway {
    /// Builds the full context and performs the one-shot startup loads:
    /// channels, clans, achievements, API keys, and the bot session.
    pub async fn bootstrap(
        config: GatewayConfig,
        resources: Resources,
    ) -> Result<Arc<Self>, GatewayError> {
        let Resources {
            store,
            geo,
            metrics,
        } = resources;

        let channels = ChannelRegistry::new();
        channels.load(store.as_ref()).await?;

        let clans = ClanRegistry::with_store(store.clone());
        clans.load().await?;

        let achievements: Vec<Achievement> = store
            .fetch_achievements()
            .await?
            .into_iter()
            .map(Achievement::from)
            .collect();
        info!("🏆 Loaded {} achievements", achievements.len());

        let api_keys: DashMap<String, PlayerId> =
            store.fetch_api_keys().await?.into_iter().collect();

        let bot_name = store
            .fetch_bot_name(BOT_PLAYER_ID)
            .await?
            .ok_or_else(|| {
                GatewayError::Internal(format!("no bot account with id {BOT_PLAYER_ID}"))
            })?;
        let bot = Arc::new(PlayerSession::bot(BOT_PLAYER_ID, bot_name));

        let gateway = Arc::new(Self {
            matches: MatchSlotTable::new(config.max_matches),
            config,
            store,
            geo,
            metrics,
            sessions: SessionRegistry::new(),
            channels,
            clans,
            caches: Caches::new(),
            achievements,
            api_keys,
            bot: bot.clone(),
            started_at: current_timestamp(),
        });

        gateway.sessions.insert(bot).await;
        gateway.metrics.set_online_players(1);
        info!("🤖 Bot session '{}' online", gateway.bot.name);

        Ok(gateway)
    }

    /// Seconds since the context was built.
    pub fn uptime(&self) -> u64 {
        current_timestamp().saturating_sub(self.started_at)
    }

    /// Brings an authenticated session online.
    pub async fn login(&self, session: Arc<PlayerSession>) {
        info!("👤 {session} logged in");
        self.sessions.insert(session).await;

        self.metrics.set_online_players(self.sessions.len().await);
        self.caches.invalidate_status().await;
    }

    /// Takes a session offline.
    ///
    /// This is the single teardown path: client-initiated logout and the
    /// liveness reaper both come through here, so the registry, the metrics
    /// gauge, and the status cache always move together. Logging out a
    /// session that is already gone is a no-op.
    pub async fn logout(&self, session: &Arc<PlayerSession>) {
        if !self.sessions.remove(session).await {
            return;
        }
        info!("👤 {session} logged out");

        self.metrics.set_online_players(self.sessions.len().await);
        self.caches.invalidate_status().await;
    }

    /// The public service status, served from cache until invalidated by a
    /// login, logout, or the periodic reroll. The registry counts are only
    /// taken on a cache miss.
    pub async fn service_status(&self) -> StatusSnapshot {
        if let Some(snapshot) = self.caches.cached_status().await {
            return snapshot;
        }

        let snapshot = StatusSnapshot {
            online_players: self.sessions.len().await,
            active_matches: self.matches.occupied().await,
        };
        self.caches.store_status(snapshot.clone()).await;
        snapshot
    }

    /// Releases the external resources this context holds; called once
    /// during shutdown, after the acceptor has drained.
    pub async fn release_resources(&self) {
        Resources {
            store: self.store.clone(),
            geo: self.geo.clone(),
            metrics: self.metrics.clone(),
        }
        .release()
        .await;
    }

    /// Resolves an API key to its owning player.
    pub fn resolve_api_key(&self, key: &str) -> Option<PlayerId> {
        let id = self.api_keys.get(key).map(|e| *e.value());
        if id.is_none() {
            debug!("Rejected unknown API key");
        }
        id
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("listen_address", &self.config.listen_address)
            .field("achievements", &self.achievements.len())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn bootstrap_brings_the_bot_online() {
        let (gateway, _store) = null_gateway().await;

        assert_eq!(gateway.sessions.len().await, 1);
        let bot = gateway.sessions.get_by_id(BOT_PLAYER_ID).await.unwrap();
        assert!(bot.is_bot);
        assert_eq!(bot.name, "Lagoon");
    }

    #[tokio::test]
    async fn bootstrap_without_a_bot_account_fails() {
        let store = Arc::new(MemoryStore::new());
        let resources = Resources {
            store,
            geo: None,
            metrics: Arc::new(crate::resources::NullMetrics),
        };

        let err = Gateway::bootstrap(GatewayConfig::default(), resources)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Internal(_)));
    }

    #[tokio::test]
    async fn login_and_logout_move_the_gauge() {
        let metrics = Arc::new(RecordingMetrics::default());
        let (gateway, _store) = test_gateway(metrics.clone()).await;

        let session = Arc::new(crate::session::PlayerSession::from_record(user_record(
            7, "Player",
        )));
        gateway.login(session.clone()).await;
        assert_eq!(metrics.online.load(Ordering::SeqCst), 2);

        gateway.logout(&session).await;
        assert_eq!(metrics.online.load(Ordering::SeqCst), 1);

        // Second logout of the same session changes nothing.
        gateway.logout(&session).await;
        assert_eq!(metrics.online.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_is_invalidated_by_population_changes() {
        let (gateway, _store) = null_gateway().await;

        let before = gateway.service_status().await;
        assert_eq!(before.online_players, 1);

        let session = Arc::new(crate::session::PlayerSession::from_record(user_record(
            7, "Player",
        )));
        gateway.login(session).await;

        let after = gateway.service_status().await;
        assert_eq!(after.online_players, 2);
    }

    #[tokio::test]
    async fn status_reads_are_cache_first() {
        let (gateway, _store) = null_gateway().await;

        let first = gateway.service_status().await;
        assert_eq!(first.online_players, 1);

        // A bare registry insert skips the invalidation that login performs,
        // so the cached snapshot must be returned untouched.
        let session = Arc::new(crate::session::PlayerSession::from_record(user_record(
            7, "Player",
        )));
        gateway.sessions.insert(session).await;
        assert_eq!(gateway.service_status().await.online_players, 1);

        gateway.caches.invalidate_status().await;
        assert_eq!(gateway.service_status().await.online_players, 2);
    }

    #[tokio::test]
    async fn api_keys_resolve_to_their_owner() {
        let store = Arc::new(MemoryStore::new());
        store.set_bot_name(BOT_PLAYER_ID, "Lagoon");
        let mut record = user_record(9, "Key Holder");
        record.api_key = Some("key-xyz".to_string());
        store.add_user(record);

        let resources = Resources {
            store,
            geo: None,
            metrics: Arc::new(crate::resources::NullMetrics),
        };
        let gateway = Gateway::bootstrap(GatewayConfig::default(), resources)
            .await
            .unwrap();

        assert_eq!(gateway.resolve_api_key("key-xyz"), Some(PlayerId(9)));
        assert_eq!(gateway.resolve_api_key("key-unknown"), None);
    }
}
