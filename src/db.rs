use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::AppResult;

// Participant sets and read receipts live in join tables so that adds are
// idempotent at the constraint level. `direct_key` holds the canonicalized
// "<min>:<max>" user pair of a non-group room; its UNIQUE index is what makes
// concurrent get-or-create converge on a single room.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chat_rooms (
    id                TEXT PRIMARY KEY,
    name              TEXT,
    is_group          INTEGER NOT NULL,
    direct_key        TEXT UNIQUE,
    community         TEXT NOT NULL,
    created_by        INTEGER NOT NULL,
    last_message_id   TEXT,
    last_message_time TEXT,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS room_participants (
    room_id TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    PRIMARY KEY (room_id, user_id)
);

CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY,
    room_id      TEXT NOT NULL,
    sender       INTEGER NOT NULL,
    sender_name  TEXT NOT NULL,
    message_type TEXT NOT NULL,
    content      TEXT NOT NULL DEFAULT '',
    media_url    TEXT,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_room_created
    ON messages (room_id, created_at DESC);

CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,
    user_id    INTEGER NOT NULL,
    read_at    TEXT NOT NULL,
    PRIMARY KEY (message_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_rooms_community ON chat_rooms (community, is_group);
";

pub async fn connect(database_url: &str) -> AppResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await?;

    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Pool backed by a throwaway on-disk database, so concurrent
    /// connections in tests all see the same data.
    pub(crate) async fn test_pool() -> (SqlitePool, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}/chat.db?mode=rwc", dir.path().display());
        let pool = connect(&url).await.expect("test pool");
        (pool, dir)
    }
}
