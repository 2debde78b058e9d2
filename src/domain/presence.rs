//! Connection Presence Registry
//!
//! Tracks, per live socket connection, which user it authenticated as and
//! which portfolio it joined. Presence is never persisted: after a restart
//! clients re-join and the registry rebuilds itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier of a live socket connection, unique for the process lifetime
pub type ConnectionId = u64;

/// Allocate the next connection identifier
pub fn next_connection_id() -> ConnectionId {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// What a connection resolved to when it joined a portfolio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_fb_id: i64,
    pub portfolio_id: i64,
}

/// In-memory map of who is online in which portfolio.
///
/// Owned behind an `Arc` and shared between the gateway and the protocol
/// handler; the tokio mutex guards the map, never held across awaits on
/// anything else.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: Mutex<HashMap<ConnectionId, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection's identity and portfolio. Recording an already
    /// known connection overwrites its entry, which is what makes a re-join
    /// idempotent for presence.
    pub async fn record(&self, conn: ConnectionId, user_fb_id: i64, portfolio_id: i64) {
        self.entries.lock().await.insert(
            conn,
            PresenceEntry {
                user_fb_id,
                portfolio_id,
            },
        );
    }

    /// Remove a connection's entry, returning what it was
    pub async fn forget(&self, conn: ConnectionId) -> Option<PresenceEntry> {
        self.entries.lock().await.remove(&conn)
    }

    /// Look up what a connection joined, if anything
    pub async fn get(&self, conn: ConnectionId) -> Option<PresenceEntry> {
        self.entries.lock().await.get(&conn).copied()
    }

    /// Snapshot of every live entry
    pub async fn all_entries(&self) -> Vec<(ConnectionId, PresenceEntry)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(conn, entry)| (*conn, *entry))
            .collect()
    }

    /// Entries currently joined to the given portfolio
    pub async fn entries_for_portfolio(
        &self,
        portfolio_id: i64,
    ) -> Vec<(ConnectionId, PresenceEntry)> {
        self.all_entries()
            .await
            .into_iter()
            .filter(|(_, entry)| entry.portfolio_id == portfolio_id)
            .collect()
    }

    /// Sorted, deduplicated ids of the users online in a portfolio. A user
    /// with several live connections appears once.
    pub async fn online_user_ids(&self, portfolio_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .entries_for_portfolio(portfolio_id)
            .await
            .into_iter()
            .map(|(_, entry)| entry.user_fb_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Whether at least one connection of this user is in the portfolio
    pub async fn is_online(&self, user_fb_id: i64, portfolio_id: i64) -> bool {
        self.entries.lock().await.values().any(|entry| {
            entry.user_fb_id == user_fb_id && entry.portfolio_id == portfolio_id
        })
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
