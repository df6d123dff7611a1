//! Process-wide registry of who currently holds a live relay connection.
//!
//! One task owns the map exclusively; connection tasks talk to it through a
//! command queue instead of a lock, which makes "last registration wins"
//! sequential by construction and keeps a slow client from ever blocking a
//! presence update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{debug_handler, extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::relay::{PresenceStatus, ServerEvent};
use crate::{AppState, UserId};

/// Identifies one live connection. A reconnect gets a fresh id, so the
/// disconnect of a superseded connection can never mark its successor
/// offline.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

enum Command {
    Register {
        user_id: UserId,
        conn: ConnectionId,
        outbound: mpsc::Sender<ServerEvent>,
    },
    Unregister {
        conn: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<UserId>>,
    },
    Forward {
        target: UserId,
        event: ServerEvent,
    },
}

struct Entry {
    /// Live connection handle; `None` once the user has gone offline.
    conn: Option<(ConnectionId, mpsc::Sender<ServerEvent>)>,
    last_seen: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PresenceHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl PresenceHandle {
    /// Spawns the registry task. Status changes go out on `status_tx`, which
    /// every connection mirrors to its client.
    pub fn spawn(status_tx: broadcast::Sender<ServerEvent>) -> PresenceHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, status_tx));
        PresenceHandle { tx }
    }

    /// Associates a user with a connection, silently superseding any earlier
    /// one (single connection per user).
    pub fn register(&self, user_id: UserId, conn: ConnectionId, outbound: mpsc::Sender<ServerEvent>) {
        let _ = self.tx.send(Command::Register { user_id, conn, outbound });
    }

    /// Marks the owner of `conn` offline. A no-op when a newer connection
    /// has already taken over the user.
    pub fn unregister(&self, conn: ConnectionId) {
        let _ = self.tx.send(Command::Unregister { conn });
    }

    /// Call-signaling pass-through: delivered if the target is online,
    /// silently dropped otherwise.
    pub fn forward(&self, target: UserId, event: ServerEvent) {
        let _ = self.tx.send(Command::Forward { target, event });
    }

    /// All users currently online. Commands are processed in order, so the
    /// snapshot reflects every register/unregister issued before it.
    pub async fn snapshot(&self) -> Vec<UserId> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Snapshot { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>, status_tx: broadcast::Sender<ServerEvent>) {
    let mut entries: HashMap<UserId, Entry> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Register { user_id, conn, outbound } => {
                let last_seen = Utc::now();
                let prev = entries.insert(user_id, Entry { conn: Some((conn, outbound)), last_seen });
                if prev.is_some_and(|e| e.conn.is_some()) {
                    tracing::debug!(user = user_id, "registration superseded an earlier connection");
                }
                tracing::info!(user = user_id, conn, "user online");
                broadcast_status(&status_tx, user_id, PresenceStatus::Online, last_seen);
            }
            Command::Unregister { conn } => {
                let owner = entries
                    .iter_mut()
                    .find(|(_, entry)| entry.conn.as_ref().is_some_and(|(id, _)| *id == conn));
                if let Some((&user_id, entry)) = owner {
                    entry.conn = None;
                    entry.last_seen = Utc::now();
                    tracing::info!(user = user_id, conn, "user offline");
                    broadcast_status(&status_tx, user_id, PresenceStatus::Offline, entry.last_seen);
                }
            }
            Command::Snapshot { reply } => {
                let mut online: Vec<UserId> = entries
                    .iter()
                    .filter(|(_, entry)| entry.conn.is_some())
                    .map(|(&user_id, _)| user_id)
                    .collect();
                online.sort_unstable();
                let _ = reply.send(online);
            }
            Command::Forward { target, event } => {
                if let Some(entry) = entries.get(&target)
                    && let Some((_, outbound)) = &entry.conn
                {
                    // try_send: a backed-up client must not stall presence.
                    if outbound.try_send(event).is_err() {
                        tracing::debug!(user = target, "dropped signaling event for a backed-up connection");
                    }
                } else {
                    tracing::debug!(user = target, "dropped signaling event for an offline target");
                }
            }
        }
    }
}

fn broadcast_status(
    status_tx: &broadcast::Sender<ServerEvent>,
    user_id: UserId,
    status: PresenceStatus,
    last_seen: DateTime<Utc>,
) {
    // Nobody listening yet is fine; send only fails without subscribers.
    let _ = status_tx.send(ServerEvent::UserStatus { user_id, status, last_seen });
}

pub fn router() -> Router<AppState> {
    Router::new().route("/online", get(online))
}

/// Initial-state fetch a client performs on load, independent of the live
/// `user:status` stream.
#[debug_handler(state = AppState)]
async fn online(State(presence): State<PresenceHandle>) -> Json<Vec<UserId>> {
    Json(presence.snapshot().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn harness() -> (PresenceHandle, broadcast::Receiver<ServerEvent>) {
        let status_tx = broadcast::channel(16).0;
        let status_rx = status_tx.subscribe();
        (PresenceHandle::spawn(status_tx), status_rx)
    }

    fn outbound() -> (mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
        mpsc::channel(8)
    }

    async fn next_status(rx: &mut broadcast::Receiver<ServerEvent>) -> (UserId, PresenceStatus) {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Ok(ServerEvent::UserStatus { user_id, status, .. })) => (user_id, status),
            other => panic!("expected a status broadcast, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registration_broadcasts_and_appears_in_the_snapshot() {
        let (presence, mut status_rx) = harness();
        let (tx, _rx) = outbound();

        presence.register(7, next_connection_id(), tx);
        assert_eq!(next_status(&mut status_rx).await, (7, PresenceStatus::Online));
        assert_eq!(presence.snapshot().await, vec![7]);
    }

    #[tokio::test]
    async fn stale_disconnect_never_overrides_a_newer_registration() {
        let (presence, mut status_rx) = harness();
        let (tx1, _rx1) = outbound();
        let (tx2, _rx2) = outbound();
        let (h1, h2) = (next_connection_id(), next_connection_id());

        presence.register(4, h1, tx1);
        presence.register(4, h2, tx2);
        presence.unregister(h1);
        assert_eq!(presence.snapshot().await, vec![4]);

        presence.unregister(h2);
        assert_eq!(presence.snapshot().await, Vec::<UserId>::new());

        // online (h1), online (h2), then a single offline for h2.
        assert_eq!(next_status(&mut status_rx).await, (4, PresenceStatus::Online));
        assert_eq!(next_status(&mut status_rx).await, (4, PresenceStatus::Online));
        assert_eq!(next_status(&mut status_rx).await, (4, PresenceStatus::Offline));
        assert!(status_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_of_an_unknown_handle_is_a_no_op() {
        let (presence, mut status_rx) = harness();
        let (tx, _rx) = outbound();

        presence.register(9, next_connection_id(), tx);
        presence.unregister(u64::MAX);
        assert_eq!(presence.snapshot().await, vec![9]);

        assert_eq!(next_status(&mut status_rx).await, (9, PresenceStatus::Online));
        assert!(status_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn forward_reaches_only_live_targets() {
        let (presence, _status_rx) = harness();
        let (tx, mut rx) = outbound();

        presence.register(2, next_connection_id(), tx);
        presence.forward(2, ServerEvent::Error { message: "ring".into() });
        presence.forward(99, ServerEvent::Error { message: "lost".into() });
        presence.snapshot().await; // drain the command queue

        match rx.try_recv() {
            Ok(ServerEvent::Error { message }) => assert_eq!(message, "ring"),
            other => panic!("expected the forwarded event, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
