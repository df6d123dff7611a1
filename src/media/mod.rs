pub mod intake;

use axum::{
    debug_handler,
    extract::{Multipart, Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::{AppResult, AppState, ChatError};

pub use intake::{MediaConfig, MediaKind, MAX_UPLOAD_BYTES};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/image", post(upload_image))
        .route("/voice", post(upload_voice))
        .route("/files/{name}", get(serve_file))
}

/// Pulls the `file` part out of a multipart body along with its declared
/// content type.
async fn file_field(mut multipart: Multipart) -> AppResult<(Vec<u8>, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ChatError::validation(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let declared = field
            .content_type()
            .map(str::to_owned)
            .ok_or_else(|| ChatError::validation("file part has no content type"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ChatError::validation(e.to_string()))?;
        return Ok((bytes.to_vec(), declared));
    }
    Err(ChatError::validation("no file uploaded"))
}

async fn upload(
    media: MediaConfig,
    kind: MediaKind,
    multipart: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    let (bytes, declared) = file_field(multipart).await?;
    let url = intake::store(&media, kind, &bytes, &declared).await?;
    Ok(Json(json!({ "url": url })))
}

#[debug_handler(state = AppState)]
async fn upload_image(
    State(media): State<MediaConfig>,
    multipart: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    upload(media, MediaKind::Image, multipart).await
}

#[debug_handler(state = AppState)]
async fn upload_voice(
    State(media): State<MediaConfig>,
    multipart: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    upload(media, MediaKind::Voice, multipart).await
}

#[debug_handler(state = AppState)]
async fn serve_file(
    State(media): State<MediaConfig>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    if !intake::is_safe_name(&name) {
        return Err(ChatError::NotFound("media file"));
    }

    let bytes = tokio::fs::read(media.upload_dir.join(&name))
        .await
        .map_err(|_| ChatError::NotFound("media file"))?;

    Ok((
        [(header::CONTENT_TYPE, intake::content_type_for(&name))],
        bytes,
    ))
}
