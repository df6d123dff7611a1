use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::ServerEvent;
use crate::presence::ConnectionId;

pub const ROOM_CHANNEL_CAPACITY: usize = 256;

/// One event as published to a room channel. `origin` lets subscribers drop
/// their own transient echoes (typing), while messages and read receipts are
/// delivered to every subscribed connection, the publisher's included.
#[derive(Debug, Clone)]
pub struct Published {
    pub origin: ConnectionId,
    pub exclude_origin: bool,
    pub event: ServerEvent,
}

impl Published {
    pub fn to_room(origin: ConnectionId, event: ServerEvent) -> Published {
        Published { origin, exclude_origin: false, event }
    }

    pub fn excluding_origin(origin: ConnectionId, event: ServerEvent) -> Published {
        Published { origin, exclude_origin: true, event }
    }
}

/// One broadcast sender per room. Entries lock independently, so traffic in
/// one room never waits on another; publishing clones the sender out of the
/// map and sends without holding it. Subscribers of the same channel see
/// events in publish order.
#[derive(Default)]
pub struct RoomChannels {
    rooms: DashMap<Uuid, broadcast::Sender<Published>>,
}

impl RoomChannels {
    pub fn new() -> RoomChannels {
        RoomChannels::default()
    }

    pub fn subscribe(&self, room_id: Uuid) -> broadcast::Receiver<Published> {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Best-effort fan-out; returns how many subscribers will see the event.
    /// A room nobody has joined has no channel, and the event goes nowhere.
    pub fn publish(&self, room_id: Uuid, published: Published) -> usize {
        let Some(tx) = self.rooms.get(&room_id).map(|entry| entry.value().clone()) else {
            return 0;
        };
        tx.send(published).unwrap_or(0)
    }

    /// Drops a room's channel once its last subscriber is gone.
    pub fn prune(&self, room_id: Uuid) {
        self.rooms.remove_if(&room_id, |_, tx| tx.receiver_count() == 0);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.rooms.len()
    }
}
