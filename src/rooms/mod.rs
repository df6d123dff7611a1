pub mod store;

use axum::{
    debug_handler,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{AppResult, AppState, UserId};

pub use store::ChatRoom;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/direct", post(direct))
        .route("/group", post(group))
        .route("/user/{user_id}", get(for_user))
        .route("/community/{community}", get(for_community))
        .route("/{chat_room_id}", get(by_id))
        .route("/{chat_room_id}/join", post(join))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectChatRequest {
    user_id1: UserId,
    user_id2: UserId,
    community: String,
}

#[debug_handler(state = AppState)]
async fn direct(
    State(db_pool): State<SqlitePool>,
    Json(req): Json<DirectChatRequest>,
) -> AppResult<Json<ChatRoom>> {
    let room =
        store::get_or_create_direct(&db_pool, req.user_id1, req.user_id2, &req.community).await?;
    Ok(Json(room))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupChatRequest {
    name: String,
    participants: Vec<UserId>,
    community: String,
    created_by: UserId,
}

#[debug_handler(state = AppState)]
async fn group(
    State(db_pool): State<SqlitePool>,
    Json(req): Json<GroupChatRequest>,
) -> AppResult<Json<ChatRoom>> {
    let room = store::create_group(
        &db_pool,
        &req.name,
        &req.participants,
        &req.community,
        req.created_by,
    )
    .await?;
    tracing::info!(room = %room.id, name = %req.name, "group chat created");
    Ok(Json(room))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest {
    user_id: UserId,
}

#[debug_handler(state = AppState)]
async fn join(
    State(db_pool): State<SqlitePool>,
    Path(chat_room_id): Path<Uuid>,
    Json(req): Json<JoinRequest>,
) -> AppResult<Json<ChatRoom>> {
    let room = store::join(&db_pool, chat_room_id, req.user_id).await?;
    Ok(Json(room))
}

#[debug_handler(state = AppState)]
async fn for_user(
    State(db_pool): State<SqlitePool>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<Vec<ChatRoom>>> {
    Ok(Json(store::list_for_user(&db_pool, user_id).await?))
}

#[debug_handler(state = AppState)]
async fn for_community(
    State(db_pool): State<SqlitePool>,
    Path(community): Path<String>,
) -> AppResult<Json<Vec<ChatRoom>>> {
    Ok(Json(store::list_for_community(&db_pool, &community).await?))
}

#[debug_handler(state = AppState)]
async fn by_id(
    State(db_pool): State<SqlitePool>,
    Path(chat_room_id): Path<Uuid>,
) -> AppResult<Json<ChatRoom>> {
    Ok(Json(store::get(&db_pool, chat_room_id).await?))
}
