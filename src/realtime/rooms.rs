//! In-process room membership for realtime fan-out.
//!
//! Rooms are keyed by workspace id. Each joined connection registers an
//! unbounded sender for outgoing frames; broadcast is best-effort and
//! at-most-once per connection. A connection that lags or disconnects is
//! dropped from the room on the next send failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique connection id.
pub fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<i64, HashMap<u64, UnboundedSender<String>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, workspace_id: i64, conn_id: u64, sender: UnboundedSender<String>) {
        let mut rooms = self.rooms.lock().unwrap();
        rooms.entry(workspace_id).or_default().insert(conn_id, sender);
    }

    pub fn leave(&self, workspace_id: i64, conn_id: u64) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(room) = rooms.get_mut(&workspace_id) {
            room.remove(&conn_id);
            if room.is_empty() {
                rooms.remove(&workspace_id);
            }
        }
    }

    /// Remove a connection from every room it joined. Called on disconnect.
    pub fn remove_connection(&self, conn_id: u64) {
        let mut rooms = self.rooms.lock().unwrap();
        rooms.retain(|_, room| {
            room.remove(&conn_id);
            !room.is_empty()
        });
    }

    /// Send a pre-serialized frame to every connection in the room.
    /// Connections whose channel is closed are pruned. Returns the number of
    /// connections the frame was queued for.
    pub fn broadcast(&self, workspace_id: i64, frame: &str) -> usize {
        let mut rooms = self.rooms.lock().unwrap();
        let Some(room) = rooms.get_mut(&workspace_id) else {
            return 0;
        };
        let mut delivered = 0;
        room.retain(|conn_id, sender| match sender.send(frame.to_owned()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                tracing::debug!(conn_id, workspace_id, "pruning closed realtime connection");
                false
            }
        });
        if room.is_empty() {
            rooms.remove(&workspace_id);
        }
        delivered
    }

    pub fn room_size(&self, workspace_id: i64) -> usize {
        self.rooms
            .lock()
            .unwrap()
            .get(&workspace_id)
            .map_or(0, HashMap::len)
    }
}
