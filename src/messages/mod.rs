pub mod store;

use axum::{
    debug_handler,
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{AppResult, AppState, UserId};

pub use store::{Message, MessageBody, MessageDraft, ReadReceipt};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(send))
        .route("/room/{chat_room_id}", get(by_room))
        .route("/{message_id}/read", post(mark_read))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    chat_room_id: Uuid,
    sender: UserId,
    sender_name: String,
    #[serde(flatten)]
    draft: MessageDraft,
}

#[debug_handler(state = AppState)]
async fn send(
    State(db_pool): State<SqlitePool>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<Message>> {
    let message = store::append(
        &db_pool,
        req.chat_room_id,
        req.sender,
        &req.sender_name,
        req.draft,
    )
    .await?;
    Ok(Json(message))
}

#[derive(Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    skip: Option<i64>,
}

#[debug_handler(state = AppState)]
async fn by_room(
    State(db_pool): State<SqlitePool>,
    Path(chat_room_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let messages = store::list_by_room(
        &db_pool,
        chat_room_id,
        page.limit.unwrap_or(50),
        page.skip.unwrap_or(0),
    )
    .await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadRequest {
    user_id: UserId,
}

#[debug_handler(state = AppState)]
async fn mark_read(
    State(db_pool): State<SqlitePool>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<ReadRequest>,
) -> AppResult<Json<Message>> {
    store::mark_read(&db_pool, message_id, req.user_id).await?;
    Ok(Json(store::get(&db_pool, message_id).await?))
}
