use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::channels::{Published, RoomChannels};
use super::events::{ClientEvent, ServerEvent};
use crate::presence::{next_connection_id, ConnectionId, PresenceHandle};
use crate::{messages, UserId};

/// Outbound frames queued for one connection's writer task.
pub type Outbound = mpsc::Sender<ServerEvent>;

/// Server-side state of one client connection: anonymous until
/// `user:register`, then subscribed to zero or more room channels.
///
/// Each joined room runs one forwarder task that feeds this connection's
/// outbound queue, so a single writer drains everything the client sees and
/// per-channel ordering survives the fan-in. Store calls happen on the
/// connection task itself; no channel state is held across them.
pub struct Connection {
    id: ConnectionId,
    db_pool: SqlitePool,
    presence: PresenceHandle,
    channels: Arc<RoomChannels>,
    outbound: Outbound,
    user_id: Option<UserId>,
    joined: HashMap<Uuid, JoinHandle<()>>,
}

impl Connection {
    pub fn new(
        db_pool: SqlitePool,
        presence: PresenceHandle,
        channels: Arc<RoomChannels>,
        outbound: Outbound,
    ) -> Connection {
        Connection {
            id: next_connection_id(),
            db_pool,
            presence,
            channels,
            outbound,
            user_id: None,
            joined: HashMap::new(),
        }
    }

    pub async fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Register { user_id } => {
                self.user_id = Some(user_id);
                self.presence.register(user_id, self.id, self.outbound.clone());
                tracing::info!(conn = self.id, user = user_id, "connection registered");
            }
            ClientEvent::Join { room_id } => self.join(room_id).await,
            ClientEvent::Leave { room_id } => self.leave(room_id),
            ClientEvent::SendMessage { room_id, message } => {
                // Already persisted by the sender through the message store;
                // delivery here is fan-out only, the sender's own
                // subscription included.
                let seen = self
                    .channels
                    .publish(room_id, Published::to_room(self.id, ServerEvent::MessageReceive(message)));
                tracing::debug!(conn = self.id, room = %room_id, seen, "message fanned out");
            }
            ClientEvent::TypingStart { room_id, user_id, user_name } => {
                self.channels.publish(
                    room_id,
                    Published::excluding_origin(
                        self.id,
                        ServerEvent::TypingUpdate { user_id, user_name, is_typing: true },
                    ),
                );
            }
            ClientEvent::TypingStop { room_id, user_id } => {
                self.channels.publish(
                    room_id,
                    Published::excluding_origin(
                        self.id,
                        ServerEvent::TypingUpdate { user_id, user_name: None, is_typing: false },
                    ),
                );
            }
            ClientEvent::MarkRead { room_id, message_id, user_id } => {
                match messages::store::mark_read(&self.db_pool, message_id, user_id).await {
                    Ok(read_at) => {
                        self.channels.publish(
                            room_id,
                            Published::to_room(
                                self.id,
                                ServerEvent::ReadUpdate { message_id, user_id, read_at },
                            ),
                        );
                    }
                    Err(err) => {
                        tracing::warn!(conn = self.id, message = %message_id, %err, "mark-read failed");
                        self.refuse(err.to_string()).await;
                    }
                }
            }
            ClientEvent::CallInitiate { target_user_id, payload } => {
                self.presence.forward(target_user_id, ServerEvent::CallIncoming { payload });
            }
            ClientEvent::CallAnswer { target_user_id, payload } => {
                self.presence.forward(target_user_id, ServerEvent::CallAnswered { payload });
            }
            ClientEvent::CallIceCandidate { target_user_id, payload } => {
                self.presence.forward(target_user_id, ServerEvent::CallIceCandidate { payload });
            }
            ClientEvent::CallEnd { target_user_id, payload } => {
                self.presence.forward(target_user_id, ServerEvent::CallEnded { payload });
            }
        }
    }

    async fn join(&mut self, room_id: Uuid) {
        if self.user_id.is_none() {
            self.refuse("register before joining a chat").await;
            return;
        }
        if self.joined.contains_key(&room_id) {
            return;
        }

        // Subscribe here, not in the task: events published from this point
        // on are queued even before the forwarder first polls.
        let mut rx = self.channels.subscribe(room_id);
        let outbound = self.outbound.clone();
        let conn_id = self.id;
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(published) => {
                        if published.exclude_origin && published.origin == conn_id {
                            continue;
                        }
                        if outbound.send(published.event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(conn = conn_id, room = %room_id, skipped, "slow subscriber skipped room events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.joined.insert(room_id, forwarder);
        tracing::debug!(conn = self.id, room = %room_id, "joined room channel");
    }

    fn leave(&mut self, room_id: Uuid) {
        if let Some(forwarder) = self.joined.remove(&room_id) {
            forwarder.abort();
            self.channels.prune(room_id);
            tracing::debug!(conn = self.id, room = %room_id, "left room channel");
        }
    }

    /// Disconnect path: marks the user offline (unless a newer connection
    /// superseded this one) and unsubscribes from every joined room.
    pub fn shutdown(&mut self) {
        self.presence.unregister(self.id);
        for (room_id, forwarder) in self.joined.drain() {
            forwarder.abort();
            self.channels.prune(room_id);
        }
        tracing::info!(conn = self.id, "connection closed");
    }

    async fn refuse(&self, message: impl Into<String>) {
        let _ = self.outbound.send(ServerEvent::Error { message: message.into() }).await;
    }
}
