//! Chat channels and their registry.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::session::Privileges;
use crate::store::{ChannelRow, Store, StoreError};

/// A chat channel known to the gateway.
#[derive(Debug)]
pub struct ChannelRecord {
    pub name: String,
    pub topic: String,
    pub read_privileges: Privileges,
    pub write_privileges: Privileges,
    /// Whether new sessions are placed into this channel at login.
    pub auto_join: bool,
}

impl ChannelRecord {
    /// Whether a player with `privileges` may see this channel.
    pub fn can_read(&self, privileges: Privileges) -> bool {
        privileges.contains(self.read_privileges)
    }

    pub fn can_write(&self, privileges: Privileges) -> bool {
        privileges.contains(self.write_privileges)
    }
}

impl From<ChannelRow> for ChannelRecord {
    fn from(row: ChannelRow) -> Self {
        Self {
            name: row.name,
            topic: row.topic,
            read_privileges: row.read_privileges,
            write_privileges: row.write_privileges,
            auto_join: row.auto_join,
        }
    }
}

impl std::fmt::Display for ChannelRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The set of channels, loaded from the store once at startup and mutated
/// at runtime by moderation commands.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<Vec<Arc<ChannelRecord>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot startup load. Runtime additions go through [`add`](Self::add).
    pub async fn load(&self, store: &dyn Store) -> Result<(), StoreError> {
        let rows = store.fetch_channels().await?;
        let mut channels = self.channels.write().await;

        for row in rows {
            channels.push(Arc::new(ChannelRecord::from(row)));
        }

        info!("💬 Loaded {} chat channels", channels.len());
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Arc<ChannelRecord>> {
        self.channels
            .read()
            .await
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Channels a fresh login is placed into, subject to read privileges.
    pub async fn auto_join_for(&self, privileges: Privileges) -> Vec<Arc<ChannelRecord>> {
        self.channels
            .read()
            .await
            .iter()
            .filter(|c| c.auto_join && c.can_read(privileges))
            .cloned()
            .collect()
    }

    /// Adds a channel. A name collision is a logged no-op.
    pub async fn add(&self, channel: Arc<ChannelRecord>) {
        let mut channels = self.channels.write().await;

        if channels.iter().any(|c| c.name == channel.name) {
            warn!("{channel} double-added to the channel registry?");
            return;
        }

        debug!("{channel} added to the channel registry");
        channels.push(channel);
    }

    /// Removes a channel by name, returning whether it existed.
    pub async fn remove(&self, name: &str) -> bool {
        let mut channels = self.channels.write().await;

        let Some(idx) = channels.iter().position(|c| c.name == name) else {
            warn!("{name} removed from the channel registry while not present?");
            return false;
        };

        channels.remove(idx);
        debug!("{name} removed from the channel registry");
        true
    }
}
