//! Per-user delivery rooms.
//!
//! Each connection owns an inbox; joining a room registers that inbox under
//! the room id. An emit resolves the target rooms to the distinct inboxes
//! registered there, so a connection gets one copy per message however many
//! of the rooms it has joined, and traffic for other rooms never touches it.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

use crate::store::ChatMessageView;

type Inbox = UnboundedSender<Arc<ChatMessageView>>;

#[derive(Default)]
struct Registry {
    rooms: HashMap<Uuid, HashMap<u64, Inbox>>,
}

#[derive(Clone, Default)]
pub struct ChatHub {
    registry: Arc<Mutex<Registry>>,
    next_connection: Arc<AtomicU64>,
}

impl ChatHub {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A fresh connection handle with no rooms joined.
    pub fn subscribe(&self) -> RoomSubscription {
        let (inbox, receiver) = mpsc::unbounded_channel();
        RoomSubscription {
            connection: self.next_connection.fetch_add(1, Ordering::Relaxed),
            hub: self.clone(),
            rooms: HashSet::new(),
            inbox,
            receiver,
        }
    }

    /// Deliver `message` to everyone in any of `rooms`. Returns the number of connections reached.
    pub fn emit(&self, rooms: &[Uuid], message: ChatMessageView) -> usize {
        let targets: HashMap<u64, Inbox> = {
            let registry = self.registry();
            rooms
                .iter()
                .filter_map(|room| registry.rooms.get(room))
                .flat_map(|members| members.iter().map(|(id, inbox)| (*id, inbox.clone())))
                .collect()
        };

        if targets.is_empty() {
            debug!(?rooms, "no live chat connections, delivery dropped");
            return 0;
        }

        let message = Arc::new(message);
        targets
            .values()
            .filter(|inbox| inbox.send(Arc::clone(&message)).is_ok())
            .count()
    }

    #[cfg(test)]
    fn room_count(&self) -> usize {
        self.registry().rooms.len()
    }
}

/// One connection's view of the hub. Dropping it leaves every room.
pub struct RoomSubscription {
    connection: u64,
    hub: ChatHub,
    rooms: HashSet<Uuid>,
    inbox: Inbox,
    receiver: UnboundedReceiver<Arc<ChatMessageView>>,
}

impl RoomSubscription {
    /// Returns false when the room was already joined.
    pub fn join(&mut self, room: Uuid) -> bool {
        if !self.rooms.insert(room) {
            return false;
        }
        self.hub
            .registry()
            .rooms
            .entry(room)
            .or_default()
            .insert(self.connection, self.inbox.clone());
        true
    }

    pub fn leave(&mut self, room: Uuid) -> bool {
        if !self.rooms.remove(&room) {
            return false;
        }
        let mut registry = self.hub.registry();
        unregister(&mut registry, room, self.connection);
        true
    }

    #[cfg(test)]
    pub fn is_member(&self, room: Uuid) -> bool {
        self.rooms.contains(&room)
    }

    /// Next message addressed to a joined room. Waits while nothing is queued.
    pub async fn recv(&mut self) -> ChatMessageView {
        loop {
            // The subscription holds a sender of its own, so the channel never closes.
            if let Some(message) = self.receiver.recv().await {
                return Arc::unwrap_or_clone(message);
            }
        }
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        if self.rooms.is_empty() {
            return;
        }
        let mut registry = self.hub.registry();
        for room in self.rooms.drain() {
            unregister(&mut registry, room, self.connection);
        }
    }
}

fn unregister(registry: &mut Registry, room: Uuid, connection: u64) {
    if let Some(members) = registry.rooms.get_mut(&room) {
        members.remove(&connection);
        if members.is_empty() {
            registry.rooms.remove(&room);
        }
    }
}
