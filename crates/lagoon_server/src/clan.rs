//! Clans and their registry.
//!
//! Clan mutation is the one place where in-memory state, the persistent
//! store, and a live session's affiliation all have to move together, so
//! membership changes are methods here rather than scattered over handlers.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::session::{ClanMembership, ClanRole, PlayerId, PlayerSession};
use crate::store::{ClanRow, Store, StoreError};

/// Stable integer identity of a clan, assigned by the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClanId(pub i64);

impl fmt::Display for ClanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The mutable part of a clan: owner and member set.
#[derive(Debug)]
struct ClanState {
    owner_id: PlayerId,
    member_ids: HashSet<PlayerId>,
}

/// A clan known to the gateway.
///
/// Identity fields are immutable; the member set and owner sit behind a
/// plain mutex that is never held across an await.
#[derive(Debug)]
pub struct ClanRecord {
    pub id: ClanId,
    pub name: String,
    pub tag: String,
    pub created_at: u64,
    state: Mutex<ClanState>,
}

impl ClanRecord {
    pub fn owner_id(&self) -> PlayerId {
        self.state.lock().unwrap().owner_id
    }

    pub fn member_count(&self) -> usize {
        self.state.lock().unwrap().member_ids.len()
    }

    pub fn has_member(&self, id: PlayerId) -> bool {
        self.state.lock().unwrap().member_ids.contains(&id)
    }
}

impl From<ClanRow> for ClanRecord {
    fn from(row: ClanRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            tag: row.tag,
            created_at: row.created_at,
            state: Mutex::new(ClanState {
                owner_id: row.owner_id,
                member_ids: row.member_ids.into_iter().collect(),
            }),
        }
    }
}

impl fmt::Display for ClanRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.tag, self.name)
    }
}

/// The set of clans, loaded from the store once at startup.
///
/// Membership changes write through to the store; the registry owns the
/// ordering so in-memory state never disagrees with what was persisted.
pub struct ClanRegistry {
    store: Arc<dyn Store>,
    clans: RwLock<Vec<Arc<ClanRecord>>>,
}

impl ClanRegistry {
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            clans: RwLock::new(Vec::new()),
        }
    }

    /// One-shot startup load.
    pub async fn load(&self) -> Result<(), StoreError> {
        let rows = self.store.fetch_clans().await?;
        let mut clans = self.clans.write().await;

        for row in rows {
            clans.push(Arc::new(ClanRecord::from(row)));
        }

        info!("🛡️  Loaded {} clans", clans.len());
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.clans.read().await.len()
    }

    pub async fn get_by_id(&self, id: ClanId) -> Option<Arc<ClanRecord>> {
        self.clans.read().await.iter().find(|c| c.id == id).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Arc<ClanRecord>> {
        self.clans
            .read()
            .await
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub async fn get_by_tag(&self, tag: &str) -> Option<Arc<ClanRecord>> {
        self.clans
            .read()
            .await
            .iter()
            .find(|c| c.tag == tag)
            .cloned()
    }

    /// Adds a clan. An id collision is a logged no-op.
    pub async fn add(&self, clan: Arc<ClanRecord>) {
        let mut clans = self.clans.write().await;

        if clans.iter().any(|c| c.id == clan.id) {
            warn!("{clan} double-added to the clan registry?");
            return;
        }

        debug!("{clan} added to the clan registry");
        clans.push(clan);
    }

    /// Removes a clan, returning whether it was present.
    pub async fn remove(&self, clan: &Arc<ClanRecord>) -> bool {
        let mut clans = self.clans.write().await;

        let Some(idx) = clans.iter().position(|c| Arc::ptr_eq(c, clan)) else {
            warn!("{clan} removed from the clan registry while not present?");
            return false;
        };

        clans.remove(idx);
        debug!("{clan} removed from the clan registry");
        true
    }

    /// Adds a player to a clan as a regular member: member set, persistent
    /// row, and the live session's affiliation all updated.
    pub async fn add_member(
        &self,
        clan: &Arc<ClanRecord>,
        session: &PlayerSession,
    ) -> Result<(), StoreError> {
        {
            let mut state = clan.state.lock().unwrap();
            if !state.member_ids.insert(session.id) {
                warn!("{session} double-added to {clan}?");
            }
        }

        self.store
            .set_clan_membership(session.id, Some((clan.id, ClanRole::Member)))
            .await?;

        *session.clan.write().await = Some(ClanMembership {
            clan_id: clan.id,
            role: ClanRole::Member,
        });

        debug!("{session} joined {clan}");
        Ok(())
    }

    /// Removes a player from a clan.
    ///
    /// An emptied clan is disbanded (deleted from the store and dropped from
    /// the registry). When the departing player owned a clan that still has
    /// members, ownership passes to an arbitrary remaining member.
    /// The session's affiliation is cleared in every case.
    // TODO: prefer officer-tier members when picking a successor.
    pub async fn remove_member(
        &self,
        clan: &Arc<ClanRecord>,
        session: &PlayerSession,
    ) -> Result<(), StoreError> {
        enum Aftermath {
            Disband,
            Succession(PlayerId),
            None,
        }

        let aftermath = {
            let mut state = clan.state.lock().unwrap();
            if !state.member_ids.remove(&session.id) {
                warn!("{session} removed from {clan} while not a member?");
            }

            if state.member_ids.is_empty() {
                Aftermath::Disband
            } else if state.owner_id == session.id {
                let successor = *state
                    .member_ids
                    .iter()
                    .next()
                    .expect("non-empty member set has a first element");
                state.owner_id = successor;
                Aftermath::Succession(successor)
            } else {
                Aftermath::None
            }
        };

        self.store.set_clan_membership(session.id, None).await?;

        match aftermath {
            Aftermath::Disband => {
                self.store.delete_clan(clan.id).await?;
                self.remove(clan).await;
                info!("{clan} disbanded (last member {session} left)");
            }
            Aftermath::Succession(successor) => {
                self.store.set_clan_owner(clan.id, successor).await?;
                self.store
                    .set_clan_membership(successor, Some((clan.id, ClanRole::Owner)))
                    .await?;
                info!("{clan} ownership passed to player {successor}");
            }
            Aftermath::None => {}
        }

        *session.clan.write().await = None;
        debug!("{session} left {clan}");
        Ok(())
    }
}

impl fmt::Debug for ClanRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClanRegistry").finish_non_exhaustive()
    }
}
