pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod messages;
pub mod presence;
pub mod relay;
pub mod rooms;

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

pub use error::{AppResult, ChatError};

/// User ids are minted by the external identity service; the chat core only
/// carries them around.
pub type UserId = i64;

pub const STATUS_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub presence: presence::PresenceHandle,
    pub channels: Arc<relay::RoomChannels>,
    /// Process-global stream of `user:status` events; every connection
    /// mirrors it to its client regardless of room membership.
    pub status_tx: broadcast::Sender<relay::ServerEvent>,
    pub media: media::MediaConfig,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, media: media::MediaConfig) -> AppState {
        let status_tx = broadcast::channel(STATUS_CHANNEL_CAPACITY).0;
        AppState {
            db_pool,
            presence: presence::PresenceHandle::spawn(status_tx.clone()),
            channels: Arc::new(relay::RoomChannels::new()),
            status_tx,
            media,
        }
    }
}
