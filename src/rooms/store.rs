use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{AppResult, ChatError, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub is_group: bool,
    pub participants: Vec<UserId>,
    pub community: String,
    pub created_by: UserId,
    /// Weak reference to the newest message; maintained by the message
    /// store, never written by clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

type RoomRow = (
    String,
    Option<String>,
    bool,
    String,
    i64,
    Option<String>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

const ROOM_COLUMNS: &str =
    "id,name,is_group,community,created_by,last_message_id,last_message_time,created_at";

/// Canonicalized key for a direct-chat pair; order of the arguments never
/// matters.
fn direct_key(user_a: UserId, user_b: UserId) -> String {
    format!("{}:{}", user_a.min(user_b), user_a.max(user_b))
}

async fn from_row(pool: &SqlitePool, row: RoomRow) -> AppResult<ChatRoom> {
    let (id, name, is_group, community, created_by, last_message_id, last_message_time, created_at) =
        row;

    let participants: Vec<(i64,)> =
        sqlx::query_as("SELECT user_id FROM room_participants WHERE room_id=? ORDER BY user_id")
            .bind(&id)
            .fetch_all(pool)
            .await?;

    Ok(ChatRoom {
        id: Uuid::parse_str(&id)?,
        name,
        is_group,
        participants: participants.into_iter().map(|(u,)| u).collect(),
        community,
        created_by,
        last_message: match last_message_id {
            Some(m) => Some(Uuid::parse_str(&m)?),
            None => None,
        },
        last_message_time,
        created_at,
    })
}

pub async fn get(pool: &SqlitePool, room_id: Uuid) -> AppResult<ChatRoom> {
    let row: Option<RoomRow> =
        sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE id=?"))
            .bind(room_id.to_string())
            .fetch_optional(pool)
            .await?;

    match row {
        Some(row) => from_row(pool, row).await,
        None => Err(ChatError::NotFound("chat room")),
    }
}

/// Looks up the direct room for an unordered user pair, creating it if this
/// is the first chat between the two. Concurrent callers for the same pair
/// race on the UNIQUE `direct_key` insert and all end up with the same room.
pub async fn get_or_create_direct(
    pool: &SqlitePool,
    user_a: UserId,
    user_b: UserId,
    community: &str,
) -> AppResult<ChatRoom> {
    if user_a == user_b {
        return Err(ChatError::validation(
            "a direct chat needs two distinct participants",
        ));
    }

    let key = direct_key(user_a, user_b);
    let id = Uuid::now_v7();

    let mut tx = pool.begin().await?;
    let inserted = sqlx::query(
        "INSERT INTO chat_rooms (id,is_group,direct_key,community,created_by,created_at) \
         VALUES (?,0,?,?,?,?) ON CONFLICT(direct_key) DO NOTHING",
    )
    .bind(id.to_string())
    .bind(&key)
    .bind(community)
    .bind(user_a)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if inserted == 1 {
        for user in [user_a, user_b] {
            sqlx::query("INSERT INTO room_participants (room_id,user_id) VALUES (?,?)")
                .bind(id.to_string())
                .bind(user)
                .execute(&mut *tx)
                .await?;
        }
    }
    tx.commit().await?;

    let (winner,): (String,) = sqlx::query_as("SELECT id FROM chat_rooms WHERE direct_key=?")
        .bind(&key)
        .fetch_one(pool)
        .await?;
    get(pool, Uuid::parse_str(&winner)?).await
}

pub async fn create_group(
    pool: &SqlitePool,
    name: &str,
    participants: &[UserId],
    community: &str,
    created_by: UserId,
) -> AppResult<ChatRoom> {
    if name.trim().is_empty() {
        return Err(ChatError::validation("a group chat needs a name"));
    }
    if participants.is_empty() {
        return Err(ChatError::validation("a group chat needs participants"));
    }
    if !participants.contains(&created_by) {
        return Err(ChatError::validation(
            "the creator must be a participant of the group",
        ));
    }

    let id = Uuid::now_v7();
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO chat_rooms (id,name,is_group,community,created_by,created_at) \
         VALUES (?,?,1,?,?,?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(community)
    .bind(created_by)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    for user in participants {
        sqlx::query("INSERT OR IGNORE INTO room_participants (room_id,user_id) VALUES (?,?)")
            .bind(id.to_string())
            .bind(user)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    get(pool, id).await
}

/// Idempotent membership add.
pub async fn join(pool: &SqlitePool, room_id: Uuid, user_id: UserId) -> AppResult<ChatRoom> {
    let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM chat_rooms WHERE id=?")
        .bind(room_id.to_string())
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(ChatError::NotFound("chat room"));
    }

    sqlx::query("INSERT OR IGNORE INTO room_participants (room_id,user_id) VALUES (?,?)")
        .bind(room_id.to_string())
        .bind(user_id)
        .execute(pool)
        .await?;

    get(pool, room_id).await
}

/// Rooms the user belongs to, most recently active first; rooms without a
/// message yet sort last.
pub async fn list_for_user(pool: &SqlitePool, user_id: UserId) -> AppResult<Vec<ChatRoom>> {
    let rows: Vec<RoomRow> = sqlx::query_as(&format!(
        "SELECT {ROOM_COLUMNS} FROM chat_rooms \
         WHERE id IN (SELECT room_id FROM room_participants WHERE user_id=?) \
         ORDER BY last_message_time IS NULL, last_message_time DESC",
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut rooms = Vec::with_capacity(rows.len());
    for row in rows {
        rooms.push(from_row(pool, row).await?);
    }
    Ok(rooms)
}

pub async fn list_for_community(pool: &SqlitePool, community: &str) -> AppResult<Vec<ChatRoom>> {
    let rows: Vec<RoomRow> = sqlx::query_as(&format!(
        "SELECT {ROOM_COLUMNS} FROM chat_rooms \
         WHERE community=? AND is_group=1 \
         ORDER BY last_message_time IS NULL, last_message_time DESC",
    ))
    .bind(community)
    .fetch_all(pool)
    .await?;

    let mut rooms = Vec::with_capacity(rows.len());
    for row in rows {
        rooms.push(from_row(pool, row).await?);
    }
    Ok(rooms)
}

/// Invoked by the message store inside its append transaction; not part of
/// the public surface. Returns the number of rooms updated so the caller
/// can detect a dangling room id.
pub(crate) async fn touch_last_message(
    executor: impl sqlx::Executor<'_, Database = Sqlite>,
    room_id: Uuid,
    message_id: Uuid,
    at: DateTime<Utc>,
) -> AppResult<u64> {
    let updated = sqlx::query("UPDATE chat_rooms SET last_message_id=?, last_message_time=? WHERE id=?")
        .bind(message_id.to_string())
        .bind(at)
        .bind(room_id.to_string())
        .execute(executor)
        .await?
        .rows_affected();
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;

    #[tokio::test]
    async fn direct_room_is_created_once_per_pair() {
        let (pool, _dir) = test_pool().await;

        let first = get_or_create_direct(&pool, 1, 2, "engineering").await.unwrap();
        let second = get_or_create_direct(&pool, 2, 1, "engineering").await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(!first.is_group);
        assert_eq!(first.participants, vec![1, 2]);
        assert_eq!(first.created_by, 1);
    }

    #[tokio::test]
    async fn concurrent_direct_creates_converge_on_one_room() {
        let (pool, _dir) = test_pool().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                get_or_create_direct(&pool, 7, 9, "design").await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chat_rooms WHERE direct_key='7:9'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn direct_room_rejects_self_chat() {
        let (pool, _dir) = test_pool().await;
        let err = get_or_create_direct(&pool, 3, 3, "law").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn group_creation_validates_its_inputs() {
        let (pool, _dir) = test_pool().await;

        assert!(matches!(
            create_group(&pool, "", &[1, 2], "medicine", 1).await,
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            create_group(&pool, "Study Group", &[], "medicine", 1).await,
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            create_group(&pool, "Study Group", &[2, 3], "medicine", 1).await,
            Err(ChatError::Validation(_))
        ));

        let room = create_group(&pool, "Study Group", &[1, 2, 3], "medicine", 1)
            .await
            .unwrap();
        assert!(room.is_group);
        assert_eq!(room.name.as_deref(), Some("Study Group"));
        assert_eq!(room.participants, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn join_is_idempotent_and_checks_existence() {
        let (pool, _dir) = test_pool().await;
        let room = create_group(&pool, "Study Group", &[1, 2, 3], "medicine", 1)
            .await
            .unwrap();

        let joined = join(&pool, room.id, 4).await.unwrap();
        assert_eq!(joined.participants, vec![1, 2, 3, 4]);

        let again = join(&pool, room.id, 4).await.unwrap();
        assert_eq!(again.participants, vec![1, 2, 3, 4]);

        let rooms = list_for_user(&pool, 4).await.unwrap();
        assert!(rooms.iter().any(|r| r.id == room.id));

        assert!(matches!(
            join(&pool, Uuid::now_v7(), 4).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn user_listing_orders_by_activity_with_quiet_rooms_last() {
        let (pool, _dir) = test_pool().await;

        let quiet = get_or_create_direct(&pool, 1, 2, "engineering").await.unwrap();
        let old = get_or_create_direct(&pool, 1, 3, "engineering").await.unwrap();
        let busy = get_or_create_direct(&pool, 1, 4, "engineering").await.unwrap();

        let earlier = Utc::now() - chrono::Duration::minutes(5);
        touch_last_message(&pool, old.id, Uuid::now_v7(), earlier).await.unwrap();
        touch_last_message(&pool, busy.id, Uuid::now_v7(), Utc::now()).await.unwrap();

        let rooms = list_for_user(&pool, 1).await.unwrap();
        let ids: Vec<Uuid> = rooms.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![busy.id, old.id, quiet.id]);
    }

    #[tokio::test]
    async fn community_listing_returns_group_rooms_only() {
        let (pool, _dir) = test_pool().await;

        get_or_create_direct(&pool, 1, 2, "engineering").await.unwrap();
        let group = create_group(&pool, "Rustaceans", &[1, 2], "engineering", 1)
            .await
            .unwrap();
        create_group(&pool, "Surgeons", &[3, 4], "medicine", 3).await.unwrap();

        let rooms = list_for_community(&pool, "engineering").await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, group.id);
    }
}
