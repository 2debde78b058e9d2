//! Room Broadcaster
//!
//! Fan-out of server events to every connection joined to a portfolio's
//! room. Rooms are keyed by portfolio id; a connection belongs to at most
//! one room at a time. Delivery goes through each connection's outbound
//! channel, so a send to a connection that is already gone is a normal
//! no-op rather than an error.

use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::application::protocol::ServerEvent;
use crate::domain::presence::ConnectionId;

/// Outbound channel of a single connection, drained by its writer task
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Default)]
struct RoomsInner {
    /// portfolio id → the connections in its room
    rooms: HashMap<i64, HashMap<ConnectionId, EventSender>>,
    /// reverse index: which room a connection is in
    joined: HashMap<ConnectionId, i64>,
}

/// Mutex-guarded room table, shared via `Arc` between the gateway and the
/// protocol handler.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<RoomsInner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a connection into a portfolio's room. A connection already in
    /// another room leaves it first; the previous portfolio id is returned
    /// so the caller can notify that room.
    pub async fn join(
        &self,
        conn: ConnectionId,
        portfolio_id: i64,
        sender: EventSender,
    ) -> Option<i64> {
        let mut inner = self.inner.lock().await;

        let previous = inner.joined.insert(conn, portfolio_id);
        if let Some(prev_id) = previous {
            if prev_id != portfolio_id {
                remove_from_room(&mut inner.rooms, prev_id, conn);
            }
        }

        inner.rooms.entry(portfolio_id).or_default().insert(conn, sender);
        previous.filter(|prev_id| *prev_id != portfolio_id)
    }

    /// Take a connection out of whatever room it is in
    pub async fn leave(&self, conn: ConnectionId) -> Option<i64> {
        let mut inner = self.inner.lock().await;
        let portfolio_id = inner.joined.remove(&conn)?;
        remove_from_room(&mut inner.rooms, portfolio_id, conn);
        Some(portfolio_id)
    }

    /// Send an event to every connection in a portfolio's room
    pub async fn broadcast(&self, portfolio_id: i64, event: ServerEvent) {
        self.fan_out(portfolio_id, None, event).await;
    }

    /// Send an event to every connection in the room except one, used when
    /// the originator gets its own unicast instead
    pub async fn broadcast_except(
        &self,
        portfolio_id: i64,
        excluded: ConnectionId,
        event: ServerEvent,
    ) {
        self.fan_out(portfolio_id, Some(excluded), event).await;
    }

    async fn fan_out(
        &self,
        portfolio_id: i64,
        excluded: Option<ConnectionId>,
        event: ServerEvent,
    ) {
        let inner = self.inner.lock().await;
        let Some(room) = inner.rooms.get(&portfolio_id) else {
            return;
        };

        for (conn, sender) in room {
            if excluded == Some(*conn) {
                continue;
            }
            if sender.send(event.clone()).is_err() {
                // Writer task is gone; the disconnect flow will clean up
                debug!(
                    "Dropped event for closed connection {} in room {}",
                    conn, portfolio_id
                );
            }
        }
    }

    /// Number of connections in a portfolio's room
    pub async fn room_size(&self, portfolio_id: i64) -> usize {
        self.inner
            .lock()
            .await
            .rooms
            .get(&portfolio_id)
            .map_or(0, HashMap::len)
    }

    /// Number of non-empty rooms
    pub async fn room_count(&self) -> usize {
        self.inner.lock().await.rooms.len()
    }

    /// Number of connections currently in any room
    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.joined.len()
    }
}

fn remove_from_room(
    rooms: &mut HashMap<i64, HashMap<ConnectionId, EventSender>>,
    portfolio_id: i64,
    conn: ConnectionId,
) {
    if let Some(room) = rooms.get_mut(&portfolio_id) {
        room.remove(&conn);
        if room.is_empty() {
            rooms.remove(&portfolio_id);
        }
    }
}
