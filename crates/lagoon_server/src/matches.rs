//! Multiplayer matches and the fixed-capacity slot table.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::current_timestamp;
use crate::error::GatewayError;
use crate::mode::GameMode;
use crate::session::PlayerId;

/// Identifier of an active match: its index in the slot table. Ids are
/// recycled as soon as the slot is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchId(pub usize);

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An active multiplayer match.
///
/// The id is assigned exactly once, by the slot table at allocation; a
/// record that was never allocated has none.
#[derive(Debug)]
pub struct MatchRecord {
    id: OnceLock<MatchId>,
    pub name: String,
    pub host_id: PlayerId,
    pub mode: GameMode,
    pub created_at: u64,
}

impl MatchRecord {
    pub fn new(name: impl Into<String>, host_id: PlayerId, mode: GameMode) -> Self {
        Self {
            id: OnceLock::new(),
            name: name.into(),
            host_id,
            mode,
            created_at: current_timestamp(),
        }
    }

    /// The match's slot id, if it has been allocated one.
    pub fn id(&self) -> Option<MatchId> {
        self.id.get().copied()
    }
}

impl fmt::Display for MatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{} (match {id})", self.name),
            None => write!(f, "{} (unallocated)", self.name),
        }
    }
}

/// Fixed-capacity table of active matches.
///
/// Capacity is set once at construction and never grows; a full table is an
/// expected operational condition surfaced to the requesting client, not a
/// fault. Allocation always takes the lowest free slot, so released ids are
/// reused immediately.
#[derive(Debug)]
pub struct MatchSlotTable {
    slots: RwLock<Vec<Option<Arc<MatchRecord>>>>,
    capacity: usize,
}

impl MatchSlotTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(vec![None; capacity]),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Places a match into the lowest free slot and stamps its id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MatchSlotsFull`] when every slot is occupied.
    pub async fn allocate(&self, record: MatchRecord) -> Result<Arc<MatchRecord>, GatewayError> {
        let mut slots = self.slots.write().await;

        let Some(idx) = slots.iter().position(Option::is_none) else {
            warn!("Match slot table full, rejecting '{}'", record.name);
            return Err(GatewayError::MatchSlotsFull(self.capacity));
        };

        // The record is freshly constructed and unshared, so this cannot race.
        record
            .id
            .set(MatchId(idx))
            .expect("freshly allocated match already had an id");

        let record = Arc::new(record);
        slots[idx] = Some(record.clone());
        debug!("{record} added to the match table");
        Ok(record)
    }

    /// Frees the slot holding exactly this match.
    ///
    /// Identity is pointer identity, not id equality: a stale handle whose
    /// slot has since been recycled to a different match frees nothing.
    pub async fn release(&self, record: &Arc<MatchRecord>) -> bool {
        let mut slots = self.slots.write().await;

        let Some(slot) = slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|m| Arc::ptr_eq(m, record)))
        else {
            warn!("{record} released from the match table while not present?");
            return false;
        };

        *slot = None;
        debug!("{record} removed from the match table");
        true
    }

    /// The match currently occupying `id`'s slot, if any.
    pub async fn get(&self, id: MatchId) -> Option<Arc<MatchRecord>> {
        self.slots.read().await.get(id.0)?.clone()
    }

    /// Number of occupied slots.
    pub async fn occupied(&self) -> usize {
        self.slots
            .read()
            .await
            .iter()
            .filter(|s| s.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> MatchRecord {
        MatchRecord::new(name, PlayerId(1), GameMode::VanillaStd)
    }

    #[tokio::test]
    async fn allocation_takes_the_lowest_free_slot() {
        let table = MatchSlotTable::new(4);

        let a = table.allocate(record("A")).await.unwrap();
        let b = table.allocate(record("B")).await.unwrap();
        let c = table.allocate(record("C")).await.unwrap();
        assert_eq!(a.id(), Some(MatchId(0)));
        assert_eq!(b.id(), Some(MatchId(1)));
        assert_eq!(c.id(), Some(MatchId(2)));
    }

    #[tokio::test]
    async fn released_ids_are_recycled_immediately() {
        let table = MatchSlotTable::new(4);

        let _a = table.allocate(record("A")).await.unwrap();
        let b = table.allocate(record("B")).await.unwrap();
        let _c = table.allocate(record("C")).await.unwrap();
        let _d = table.allocate(record("D")).await.unwrap();

        let err = table.allocate(record("E")).await.unwrap_err();
        assert!(matches!(err, GatewayError::MatchSlotsFull(4)));

        assert!(table.release(&b).await);

        let f = table.allocate(record("F")).await.unwrap();
        assert_eq!(f.id(), Some(MatchId(1)));
        assert_eq!(table.occupied().await, 4);
    }

    #[tokio::test]
    async fn release_is_by_identity_not_id() {
        let table = MatchSlotTable::new(2);

        let a = table.allocate(record("A")).await.unwrap();
        assert!(table.release(&a).await);

        // Slot 0 now belongs to B; the stale handle to A must not free it.
        let b = table.allocate(record("B")).await.unwrap();
        assert_eq!(b.id(), Some(MatchId(0)));
        assert!(!table.release(&a).await);
        assert!(table.get(MatchId(0)).await.is_some());
    }

    #[tokio::test]
    async fn full_table_reports_capacity() {
        let table = MatchSlotTable::new(1);
        let _a = table.allocate(record("A")).await.unwrap();

        match table.allocate(record("B")).await {
            Err(GatewayError::MatchSlotsFull(cap)) => assert_eq!(cap, 1),
            other => panic!("expected MatchSlotsFull, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_resolves_only_live_slots() {
        let table = MatchSlotTable::new(2);
        let a = table.allocate(record("A")).await.unwrap();

        assert!(table.get(MatchId(0)).await.is_some());
        assert!(table.get(MatchId(1)).await.is_none());
        assert!(table.get(MatchId(9)).await.is_none());

        table.release(&a).await;
        assert!(table.get(MatchId(0)).await.is_none());
    }
}
