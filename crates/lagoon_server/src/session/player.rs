//! The in-memory record of a connected player.

use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clan::ClanId;
use crate::current_timestamp;
use crate::session::PlayerId;
use crate::store::UserRecord;

bitflags! {
    /// Server-side privilege bits attached to a player.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Privileges: u32 {
        /// Unbanned, may connect.
        const NORMAL = 1 << 0;
        /// Has verified their account.
        const VERIFIED = 1 << 1;
        /// Time-bounded supporter perks; cleared by the expiry sweep once
        /// the paid period lapses.
        const SUPPORTER = 1 << 2;
        const MODERATOR = 1 << 3;
        const ADMINISTRATOR = 1 << 4;
        const DEVELOPER = 1 << 5;
    }
}

impl Privileges {
    /// Whether any staff bit is set.
    pub fn is_staff(self) -> bool {
        self.intersects(Self::MODERATOR | Self::ADMINISTRATOR | Self::DEVELOPER)
    }
}

/// Opaque per-session identifier distinguishing concurrent logins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    /// The nil token carried by offline store projections; never present on
    /// a session inside the registry.
    pub const OFFLINE: SessionToken = SessionToken(Uuid::nil());

    /// Generates a fresh token for a new login.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Whether this is the offline-projection token.
    pub fn is_offline(&self) -> bool {
        self.0.is_nil()
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A player's clan affiliation, referenced by id rather than by pointer so
/// clan teardown never has to chase session objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClanMembership {
    pub clan_id: ClanId,
    pub role: ClanRole,
}

/// Privilege tier inside a clan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClanRole {
    Member = 1,
    Officer = 2,
    Owner = 3,
}

/// The in-memory record of one currently connected, authenticated client.
///
/// Identity fields are immutable for the session's lifetime; the fields
/// handlers update on every received action (`last_recv`, privilege bits)
/// are atomics so concurrent readers never observe a torn value, and the
/// clan reference sits behind its own lock.
#[derive(Debug)]
pub struct PlayerSession {
    pub id: PlayerId,
    pub name: String,
    pub safe_name: String,
    pub token: SessionToken,
    /// Stored credential hash, compared through the credential cache.
    pub pw_hash: String,
    /// Bots are server-owned sessions and are exempt from liveness eviction.
    pub is_bot: bool,

    priv_bits: AtomicU32,
    last_recv: AtomicU64,
    pub clan: RwLock<Option<ClanMembership>>,
}

impl PlayerSession {
    /// Creates a live session from a store record, minting a fresh token.
    pub fn from_record(record: UserRecord) -> Self {
        let clan = record.clan_id.zip(record.clan_role).map(|(clan_id, role)| {
            ClanMembership { clan_id, role }
        });

        Self {
            id: record.id,
            safe_name: record.safe_name,
            name: record.name,
            token: SessionToken::generate(),
            pw_hash: record.pw_hash,
            is_bot: false,
            priv_bits: AtomicU32::new(record.privileges.bits()),
            last_recv: AtomicU64::new(current_timestamp()),
            clan: RwLock::new(clan),
        }
    }

    /// Creates an offline projection of a store record: the nil token marks
    /// it as not-a-login, and it must never be inserted into the registry.
    pub fn offline_projection(record: UserRecord) -> Self {
        let mut session = Self::from_record(record);
        session.token = SessionToken::OFFLINE;
        session
    }

    /// Creates the server-owned bot session.
    pub fn bot(id: PlayerId, name: String) -> Self {
        let safe_name = crate::session::make_safe_name(&name);
        Self {
            id,
            name,
            safe_name,
            token: SessionToken::generate(),
            pw_hash: String::new(),
            is_bot: true,
            priv_bits: AtomicU32::new(Privileges::NORMAL.bits()),
            last_recv: AtomicU64::new(current_timestamp()),
            clan: RwLock::new(None),
        }
    }

    /// Records client activity. Called by protocol handlers on every
    /// received action; this is what keeps the liveness reaper away.
    pub fn touch(&self) {
        self.last_recv.store(current_timestamp(), Ordering::Relaxed);
    }

    /// Unix timestamp of the last observed client activity.
    pub fn last_recv(&self) -> u64 {
        self.last_recv.load(Ordering::Relaxed)
    }

    /// Seconds of silence as of `now`.
    pub fn idle_for(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_recv())
    }

    pub fn privileges(&self) -> Privileges {
        Privileges::from_bits_truncate(self.priv_bits.load(Ordering::Relaxed))
    }

    pub fn set_privileges(&self, privileges: Privileges) {
        self.priv_bits.store(privileges.bits(), Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn set_last_recv(&self, when: u64) {
        self.last_recv.store(when, Ordering::Relaxed);
    }
}

impl std::fmt::Display for PlayerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}
