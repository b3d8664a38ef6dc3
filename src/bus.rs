//! Case Event Bus - per-case in-process publish/subscribe
//!
//! Every case gets a broadcast room created on first use. Subscribers join
//! with a role (PHW via session credential, specialist via escalation
//! token); events are fanned out best-effort within one connection lifetime
//! and are never persisted or replayed. A subscriber that falls behind the
//! channel capacity observes a lag error and is disconnected by its
//! transport rather than blocking publishers.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::types::{CaseEvent, SubscriberRole};

pub struct CaseEventBus {
    capacity: usize,
    rooms: RwLock<HashMap<Uuid, broadcast::Sender<CaseEvent>>>,
}

impl CaseEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Join a case room. The receiver sees every event published after this
    /// call, in publish order, until it lags or the connection ends.
    pub fn subscribe(&self, case_id: Uuid, role: SubscriberRole) -> broadcast::Receiver<CaseEvent> {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        let sender = rooms
            .entry(case_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        debug!(case_id = %case_id, role = ?role, "Subscriber joined case room");
        sender.subscribe()
    }

    /// Publish an event to a case room. Returns the number of subscribers
    /// reached; an empty room is torn down rather than retained.
    pub fn publish(&self, case_id: Uuid, event: CaseEvent) -> usize {
        let sender = {
            let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
            rooms.get(&case_id).cloned()
        };

        let Some(sender) = sender else {
            return 0;
        };

        match sender.send(event) {
            Ok(reached) => reached,
            Err(_) => {
                // Last receiver is gone; drop the room
                let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
                if rooms
                    .get(&case_id)
                    .map(|s| s.receiver_count() == 0)
                    .unwrap_or(false)
                {
                    rooms.remove(&case_id);
                    debug!(case_id = %case_id, "Case room torn down");
                }
                0
            }
        }
    }

    /// Number of live subscribers on a case room.
    pub fn subscriber_count(&self, case_id: Uuid) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms
            .get(&case_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}
