use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::messages::Message;
use crate::UserId;

/// Whether a user currently holds a live relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Frames a client sends over the socket: `{"event": …, "data": {…}}`.
///
/// Call-signaling frames carry the routing field plus an opaque WebRTC
/// payload (offer, answer, candidate) that is forwarded untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    #[serde(rename = "user:register")]
    Register { user_id: UserId },
    #[serde(rename = "chat:join")]
    Join { room_id: Uuid },
    #[serde(rename = "chat:leave")]
    Leave { room_id: Uuid },
    /// The message has already been persisted through the message store;
    /// the relay only fans it out.
    #[serde(rename = "message:send")]
    SendMessage { room_id: Uuid, message: Message },
    #[serde(rename = "typing:start")]
    TypingStart {
        room_id: Uuid,
        user_id: UserId,
        #[serde(default)]
        user_name: Option<String>,
    },
    #[serde(rename = "typing:stop")]
    TypingStop { room_id: Uuid, user_id: UserId },
    #[serde(rename = "message:read")]
    MarkRead {
        room_id: Uuid,
        message_id: Uuid,
        user_id: UserId,
    },
    #[serde(rename = "call:initiate")]
    CallInitiate {
        target_user_id: UserId,
        #[serde(flatten)]
        payload: Value,
    },
    #[serde(rename = "call:answer")]
    CallAnswer {
        target_user_id: UserId,
        #[serde(flatten)]
        payload: Value,
    },
    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate {
        target_user_id: UserId,
        #[serde(flatten)]
        payload: Value,
    },
    #[serde(rename = "call:end")]
    CallEnd {
        target_user_id: UserId,
        #[serde(flatten)]
        payload: Value,
    },
}

/// Frames the server pushes to clients, in the same `{"event", "data"}`
/// envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "message:receive")]
    MessageReceive(Message),
    #[serde(rename = "typing:update")]
    TypingUpdate {
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        is_typing: bool,
    },
    #[serde(rename = "message:read:update")]
    ReadUpdate {
        message_id: Uuid,
        user_id: UserId,
        read_at: DateTime<Utc>,
    },
    #[serde(rename = "user:status")]
    UserStatus {
        user_id: UserId,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    },
    #[serde(rename = "call:incoming")]
    CallIncoming {
        #[serde(flatten)]
        payload: Value,
    },
    #[serde(rename = "call:answered")]
    CallAnswered {
        #[serde(flatten)]
        payload: Value,
    },
    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate {
        #[serde(flatten)]
        payload: Value,
    },
    #[serde(rename = "call:ended")]
    CallEnded {
        #[serde(flatten)]
        payload: Value,
    },
    /// Sent only to the connection whose request failed; store errors never
    /// reach the rest of the room.
    #[serde(rename = "error")]
    Error { message: String },
}
