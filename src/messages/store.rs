use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{rooms, AppResult, ChatError, UserId};

/// Typed message payload. The tag doubles as the wire `messageType` field,
/// so a text message without content or a media message without a URL cannot
/// be constructed in the first place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        content: String,
    },
    Image {
        #[serde(rename = "mediaUrl")]
        media_url: String,
        #[serde(default)]
        content: String,
    },
    Voice {
        #[serde(rename = "mediaUrl")]
        media_url: String,
        #[serde(default)]
        content: String,
    },
}

impl MessageBody {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Voice { .. } => "voice",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Text { content } | Self::Image { content, .. } | Self::Voice { content, .. } => {
                content
            }
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        match self {
            Self::Text { .. } => None,
            Self::Image { media_url, .. } | Self::Voice { media_url, .. } => Some(media_url),
        }
    }
}

/// What clients actually submit: loose optional fields, `messageType`
/// defaulting to `text`. `into_body` is the single validation point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        MessageDraft {
            content: Some(content.into()),
            message_type: Some("text".to_owned()),
            media_url: None,
        }
    }

    pub fn into_body(self) -> AppResult<MessageBody> {
        let message_type = self.message_type.as_deref().unwrap_or("text");
        match message_type {
            "text" => match self.content {
                Some(content) if !content.is_empty() => Ok(MessageBody::Text { content }),
                _ => Err(ChatError::validation("a text message needs content")),
            },
            "image" | "voice" => {
                let media_url = match self.media_url {
                    Some(url) if !url.is_empty() => url,
                    _ => {
                        return Err(ChatError::validation(format!(
                            "a {message_type} message needs a mediaUrl"
                        )))
                    }
                };
                let content = self.content.unwrap_or_default();
                if message_type == "image" {
                    Ok(MessageBody::Image { media_url, content })
                } else {
                    Ok(MessageBody::Voice { media_url, content })
                }
            }
            other => Err(ChatError::validation(format!(
                "unknown messageType: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_room: Uuid,
    pub sender: UserId,
    pub sender_name: String,
    #[serde(flatten)]
    pub body: MessageBody,
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
}

type MessageRow = (
    String,
    String,
    i64,
    String,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
);

const MESSAGE_COLUMNS: &str =
    "id,room_id,sender,sender_name,message_type,content,media_url,created_at";

fn body_from_columns(
    message_type: &str,
    content: String,
    media_url: Option<String>,
) -> AppResult<MessageBody> {
    match message_type {
        "text" => Ok(MessageBody::Text { content }),
        "image" | "voice" => {
            let media_url = media_url.ok_or_else(|| {
                anyhow::anyhow!("stored {message_type} message has no media url")
            })?;
            if message_type == "image" {
                Ok(MessageBody::Image { media_url, content })
            } else {
                Ok(MessageBody::Voice { media_url, content })
            }
        }
        other => Err(anyhow::anyhow!("stored message has unknown type {other}").into()),
    }
}

async fn reads_for(pool: &SqlitePool, message_id: &str) -> AppResult<Vec<ReadReceipt>> {
    let rows: Vec<(i64, DateTime<Utc>)> = sqlx::query_as(
        "SELECT user_id,read_at FROM message_reads WHERE message_id=? ORDER BY read_at,user_id",
    )
    .bind(message_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(user_id, read_at)| ReadReceipt { user_id, read_at })
        .collect())
}

async fn hydrate(pool: &SqlitePool, row: MessageRow) -> AppResult<Message> {
    let (id, room_id, sender, sender_name, message_type, content, media_url, created_at) = row;
    let read_by = reads_for(pool, &id).await?;
    Ok(Message {
        id: Uuid::parse_str(&id)?,
        chat_room: Uuid::parse_str(&room_id)?,
        sender,
        sender_name,
        body: body_from_columns(&message_type, content, media_url)?,
        read_by,
        created_at,
    })
}

/// Persists a message and moves the room's last-message pointer in one
/// transaction, so a reader that sees the pointer can always fetch the
/// message it names.
pub async fn append(
    pool: &SqlitePool,
    room_id: Uuid,
    sender: UserId,
    sender_name: &str,
    draft: MessageDraft,
) -> AppResult<Message> {
    let body = draft.into_body()?;
    let id = Uuid::now_v7();
    let created_at = Utc::now();

    let mut tx = pool.begin().await?;
    sqlx::query(&format!(
        "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?,?,?,?,?,?,?,?)"
    ))
    .bind(id.to_string())
    .bind(room_id.to_string())
    .bind(sender)
    .bind(sender_name)
    .bind(body.message_type())
    .bind(body.content())
    .bind(body.media_url())
    .bind(created_at)
    .execute(&mut *tx)
    .await?;

    let touched = rooms::store::touch_last_message(&mut *tx, room_id, id, created_at).await?;
    if touched == 0 {
        return Err(ChatError::NotFound("chat room"));
    }
    tx.commit().await?;

    Ok(Message {
        id,
        chat_room: room_id,
        sender,
        sender_name: sender_name.to_owned(),
        body,
        read_by: Vec::new(),
        created_at,
    })
}

pub async fn get(pool: &SqlitePool, message_id: Uuid) -> AppResult<Message> {
    let row: Option<MessageRow> =
        sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id=?"))
            .bind(message_id.to_string())
            .fetch_optional(pool)
            .await?;

    match row {
        Some(row) => hydrate(pool, row).await,
        None => Err(ChatError::NotFound("message")),
    }
}

/// One page of a room's history in chronological order. `limit`/`skip`
/// paginate backward from the newest message; the page itself is reversed
/// before return so callers always render oldest-first.
pub async fn list_by_room(
    pool: &SqlitePool,
    room_id: Uuid,
    limit: i64,
    skip: i64,
) -> AppResult<Vec<Message>> {
    let limit = limit.clamp(1, 200);
    let skip = skip.max(0);

    let rows: Vec<MessageRow> = sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id=? \
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    ))
    .bind(room_id.to_string())
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await?;

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        messages.push(hydrate(pool, row).await?);
    }
    messages.reverse();
    Ok(messages)
}

/// Idempotent read receipt: the first call records `now`, later calls for
/// the same reader keep the original timestamp. Returns the effective
/// `readAt` either way.
pub async fn mark_read(
    pool: &SqlitePool,
    message_id: Uuid,
    user_id: UserId,
) -> AppResult<DateTime<Utc>> {
    let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM messages WHERE id=?")
        .bind(message_id.to_string())
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(ChatError::NotFound("message"));
    }

    sqlx::query(
        "INSERT OR IGNORE INTO message_reads (message_id,user_id,read_at) VALUES (?,?,?)",
    )
    .bind(message_id.to_string())
    .bind(user_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let (read_at,): (DateTime<Utc>,) =
        sqlx::query_as("SELECT read_at FROM message_reads WHERE message_id=? AND user_id=?")
            .bind(message_id.to_string())
            .bind(user_id)
            .fetch_one(pool)
            .await?;
    Ok(read_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::rooms::store::get_or_create_direct;

    async fn room(pool: &SqlitePool) -> Uuid {
        get_or_create_direct(pool, 1, 2, "engineering").await.unwrap().id
    }

    #[tokio::test]
    async fn append_updates_the_room_pointer_read_your_write() {
        let (pool, _dir) = test_pool().await;
        let room_id = room(&pool).await;

        let message = append(&pool, room_id, 1, "Ada", MessageDraft::text("hi"))
            .await
            .unwrap();

        let room = crate::rooms::store::get(&pool, room_id).await.unwrap();
        assert_eq!(room.last_message, Some(message.id));
        assert_eq!(room.last_message_time, Some(message.created_at));

        let fetched = get(&pool, message.id).await.unwrap();
        assert_eq!(fetched.body, MessageBody::Text { content: "hi".into() });
        assert_eq!(fetched.sender_name, "Ada");
    }

    #[tokio::test]
    async fn append_rejects_invalid_drafts() {
        let (pool, _dir) = test_pool().await;
        let room_id = room(&pool).await;

        let empty_text = MessageDraft { content: None, ..Default::default() };
        assert!(matches!(
            append(&pool, room_id, 1, "Ada", empty_text).await,
            Err(ChatError::Validation(_))
        ));

        let image_without_url = MessageDraft {
            message_type: Some("image".into()),
            ..Default::default()
        };
        assert!(matches!(
            append(&pool, room_id, 1, "Ada", image_without_url).await,
            Err(ChatError::Validation(_))
        ));

        assert!(matches!(
            append(&pool, Uuid::now_v7(), 1, "Ada", MessageDraft::text("hi")).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn media_drafts_become_typed_bodies() {
        let draft = MessageDraft {
            message_type: Some("voice".into()),
            media_url: Some("http://localhost:4000/api/upload/files/voice-x.webm".into()),
            content: None,
        };
        let body = draft.into_body().unwrap();
        assert_eq!(body.message_type(), "voice");
        assert_eq!(
            body.media_url(),
            Some("http://localhost:4000/api/upload/files/voice-x.webm")
        );

        let unknown = MessageDraft {
            message_type: Some("video".into()),
            ..Default::default()
        };
        assert!(matches!(unknown.into_body(), Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn paging_returns_chronological_pages_from_the_newest() {
        let (pool, _dir) = test_pool().await;
        let room_id = room(&pool).await;

        let mut ids = Vec::new();
        for n in 1..=5 {
            let m = append(&pool, room_id, 1, "Ada", MessageDraft::text(format!("m{n}")))
                .await
                .unwrap();
            ids.push(m.id);
        }

        let all = list_by_room(&pool, room_id, 50, 0).await.unwrap();
        assert_eq!(all.iter().map(|m| m.id).collect::<Vec<_>>(), ids);

        // Newest page first, each page internally chronological.
        let newest = list_by_room(&pool, room_id, 2, 0).await.unwrap();
        assert_eq!(newest.iter().map(|m| m.id).collect::<Vec<_>>(), ids[3..5]);

        let older = list_by_room(&pool, room_id, 2, 2).await.unwrap();
        assert_eq!(older.iter().map(|m| m.id).collect::<Vec<_>>(), ids[1..3]);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_per_reader() {
        let (pool, _dir) = test_pool().await;
        let room_id = room(&pool).await;
        let message = append(&pool, room_id, 1, "Ada", MessageDraft::text("hi"))
            .await
            .unwrap();

        let first = mark_read(&pool, message.id, 2).await.unwrap();
        let second = mark_read(&pool, message.id, 2).await.unwrap();
        assert_eq!(first, second);

        let fetched = get(&pool, message.id).await.unwrap();
        assert_eq!(fetched.read_by.len(), 1);
        assert_eq!(fetched.read_by[0].user_id, 2);
        assert_eq!(fetched.read_by[0].read_at, first);

        assert!(matches!(
            mark_read(&pool, Uuid::now_v7(), 2).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn message_serializes_with_the_flattened_wire_shape() {
        let message = Message {
            id: Uuid::now_v7(),
            chat_room: Uuid::now_v7(),
            sender: 1,
            sender_name: "Ada".into(),
            body: MessageBody::Image {
                media_url: "http://localhost:4000/api/upload/files/x.png".into(),
                content: String::new(),
            },
            read_by: Vec::new(),
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["messageType"], "image");
        assert_eq!(value["mediaUrl"], "http://localhost:4000/api/upload/files/x.png");
        assert_eq!(value["senderName"], "Ada");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back.body, message.body);
    }
}
