//! The persistent-store seam.
//!
//! Every query the gateway needs is a named, typed operation on [`Store`];
//! there is no generic criteria language. A production deployment implements
//! this trait over its database; [`MemoryStore`] backs tests and local runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::achievement::Predicate;
use crate::clan::ClanId;
use crate::session::{ClanRole, PlayerId, Privileges};

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A player's persistent account record.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: PlayerId,
    pub name: String,
    pub safe_name: String,
    pub pw_hash: String,
    pub privileges: Privileges,
    pub clan_id: Option<ClanId>,
    pub clan_role: Option<ClanRole>,
    pub api_key: Option<String>,
    /// Unix timestamp the paid supporter period ends, if any.
    pub supporter_until: Option<u64>,
}

/// A chat channel as persisted.
#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub name: String,
    pub topic: String,
    pub read_privileges: Privileges,
    pub write_privileges: Privileges,
    /// Whether new sessions are placed into this channel at login.
    pub auto_join: bool,
}

/// A clan as persisted.
#[derive(Debug, Clone)]
pub struct ClanRow {
    pub id: ClanId,
    pub name: String,
    pub tag: String,
    pub owner_id: PlayerId,
    pub member_ids: Vec<PlayerId>,
    pub created_at: u64,
}

/// An achievement definition as persisted: identity plus the unlock
/// condition as a structured predicate.
#[derive(Debug, Clone)]
pub struct AchievementRow {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub condition: Predicate,
}

/// Typed access to the persistent store.
///
/// Writes are persistence-only: callers own the matching in-memory updates,
/// and the registries never read back what they just wrote.
#[async_trait]
pub trait Store: Send + Sync {
    async fn fetch_user_by_id(&self, id: PlayerId) -> Result<Option<UserRecord>, StoreError>;

    async fn fetch_user_by_safe_name(
        &self,
        safe_name: &str,
    ) -> Result<Option<UserRecord>, StoreError>;

    /// Total registered accounts, for the startup banner.
    async fn user_count(&self) -> Result<u64, StoreError>;

    async fn fetch_channels(&self) -> Result<Vec<ChannelRow>, StoreError>;

    async fn fetch_clans(&self) -> Result<Vec<ClanRow>, StoreError>;

    async fn fetch_achievements(&self) -> Result<Vec<AchievementRow>, StoreError>;

    /// All issued API keys, keyed by the key itself.
    async fn fetch_api_keys(&self) -> Result<HashMap<String, PlayerId>, StoreError>;

    /// Display name of the server-owned bot account.
    async fn fetch_bot_name(&self, id: PlayerId) -> Result<Option<String>, StoreError>;

    /// Persists a user's clan affiliation; `None` clears it.
    async fn set_clan_membership(
        &self,
        user: PlayerId,
        membership: Option<(ClanId, ClanRole)>,
    ) -> Result<(), StoreError>;

    /// Persists a clan's owner.
    async fn set_clan_owner(&self, clan: ClanId, owner: PlayerId) -> Result<(), StoreError>;

    /// Deletes a clan row entirely.
    async fn delete_clan(&self, clan: ClanId) -> Result<(), StoreError>;

    /// Clears the supporter bit on every account whose paid period ended at
    /// or before `now`, returning how many rows changed.
    async fn expire_lapsed_supporters(&self, now: u64) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    users: Vec<UserRecord>,
    channels: Vec<ChannelRow>,
    clans: Vec<ClanRow>,
    achievements: Vec<AchievementRow>,
    api_keys: HashMap<String, PlayerId>,
    bot_names: HashMap<PlayerId, String>,
}

/// In-memory [`Store`] for tests and local development.
///
/// The mutex is a plain `std` one; no method holds it across an await.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, record: UserRecord) {
        let mut state = self.state.lock().unwrap();
        if let Some(key) = record.api_key.clone() {
            state.api_keys.insert(key, record.id);
        }
        state.users.push(record);
    }

    pub fn add_channel(&self, row: ChannelRow) {
        self.state.lock().unwrap().channels.push(row);
    }

    pub fn add_clan(&self, row: ClanRow) {
        self.state.lock().unwrap().clans.push(row);
    }

    pub fn add_achievement(&self, row: AchievementRow) {
        self.state.lock().unwrap().achievements.push(row);
    }

    pub fn set_bot_name(&self, id: PlayerId, name: impl Into<String>) {
        self.state.lock().unwrap().bot_names.insert(id, name.into());
    }

    #[cfg(test)]
    pub(crate) fn user(&self, id: PlayerId) -> Option<UserRecord> {
        self.state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
    }

    #[cfg(test)]
    pub(crate) fn clan(&self, id: ClanId) -> Option<ClanRow> {
        self.state
            .lock()
            .unwrap()
            .clans
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch_user_by_id(&self, id: PlayerId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn fetch_user_by_safe_name(
        &self,
        safe_name: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.safe_name == safe_name)
            .cloned())
    }

    async fn user_count(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().unwrap().users.len() as u64)
    }

    async fn fetch_channels(&self) -> Result<Vec<ChannelRow>, StoreError> {
        Ok(self.state.lock().unwrap().channels.clone())
    }

    async fn fetch_clans(&self) -> Result<Vec<ClanRow>, StoreError> {
        Ok(self.state.lock().unwrap().clans.clone())
    }

    async fn fetch_achievements(&self) -> Result<Vec<AchievementRow>, StoreError> {
        Ok(self.state.lock().unwrap().achievements.clone())
    }

    async fn fetch_api_keys(&self) -> Result<HashMap<String, PlayerId>, StoreError> {
        Ok(self.state.lock().unwrap().api_keys.clone())
    }

    async fn fetch_bot_name(&self, id: PlayerId) -> Result<Option<String>, StoreError> {
        Ok(self.state.lock().unwrap().bot_names.get(&id).cloned())
    }

    async fn set_clan_membership(
        &self,
        user: PlayerId,
        membership: Option<(ClanId, ClanRole)>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .users
            .iter_mut()
            .find(|u| u.id == user)
            .ok_or_else(|| StoreError::Query(format!("no such user: {user}")))?;

        match membership {
            Some((clan_id, role)) => {
                record.clan_id = Some(clan_id);
                record.clan_role = Some(role);
            }
            None => {
                record.clan_id = None;
                record.clan_role = None;
            }
        }
        Ok(())
    }

    async fn set_clan_owner(&self, clan: ClanId, owner: PlayerId) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .clans
            .iter_mut()
            .find(|c| c.id == clan)
            .ok_or_else(|| StoreError::Query(format!("no such clan: {clan}")))?;
        row.owner_id = owner;
        Ok(())
    }

    async fn delete_clan(&self, clan: ClanId) -> Result<(), StoreError> {
        self.state.lock().unwrap().clans.retain(|c| c.id != clan);
        Ok(())
    }

    async fn expire_lapsed_supporters(&self, now: u64) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut expired = 0;

        for user in &mut state.users {
            let lapsed = matches!(user.supporter_until, Some(until) if until <= now);
            if lapsed && user.privileges.contains(Privileges::SUPPORTER) {
                user.privileges.remove(Privileges::SUPPORTER);
                user.supporter_until = None;
                expired += 1;
            }
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supporter(id: i64, until: Option<u64>) -> UserRecord {
        UserRecord {
            id: PlayerId(id),
            name: format!("user{id}"),
            safe_name: format!("user{id}"),
            pw_hash: "$2b$stored".to_string(),
            privileges: Privileges::NORMAL | Privileges::SUPPORTER,
            clan_id: None,
            clan_role: None,
            api_key: None,
            supporter_until: until,
        }
    }

    #[tokio::test]
    async fn expiry_clears_only_lapsed_supporters() {
        let store = MemoryStore::new();
        store.add_user(supporter(1, Some(100)));
        store.add_user(supporter(2, Some(10_000)));
        store.add_user(supporter(3, None));

        let expired = store.expire_lapsed_supporters(500).await.unwrap();
        assert_eq!(expired, 1);

        assert!(!store
            .user(PlayerId(1))
            .unwrap()
            .privileges
            .contains(Privileges::SUPPORTER));
        assert!(store
            .user(PlayerId(2))
            .unwrap()
            .privileges
            .contains(Privileges::SUPPORTER));
        assert!(store
            .user(PlayerId(3))
            .unwrap()
            .privileges
            .contains(Privileges::SUPPORTER));
    }

    #[tokio::test]
    async fn expiry_is_idempotent() {
        let store = MemoryStore::new();
        store.add_user(supporter(1, Some(100)));

        assert_eq!(store.expire_lapsed_supporters(500).await.unwrap(), 1);
        assert_eq!(store.expire_lapsed_supporters(500).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn api_keys_index_on_insert() {
        let store = MemoryStore::new();
        let mut user = supporter(5, None);
        user.api_key = Some("key-abc".to_string());
        store.add_user(user);

        let keys = store.fetch_api_keys().await.unwrap();
        assert_eq!(keys.get("key-abc"), Some(&PlayerId(5)));
    }
}
