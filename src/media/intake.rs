use std::path::PathBuf;

use uuid::Uuid;

use crate::{AppResult, ChatError};

/// Hard ceiling on a single upload, matching the service's public contract.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Declared MIME type → stored file extension. Anything not listed here is
/// refused outright; the declaration is trusted, not sniffed.
const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("audio/webm", "webm"),
    ("audio/wav", "wav"),
    ("audio/mpeg", "mp3"),
    ("audio/mp3", "mp3"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Voice,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub upload_dir: PathBuf,
    pub public_base_url: String,
}

impl MediaConfig {
    pub fn file_url(&self, name: &str) -> String {
        format!(
            "{}/api/upload/files/{name}",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

fn extension_for(declared_mime: &str) -> Option<&'static str> {
    ALLOWED_TYPES
        .iter()
        .find(|(mime, _)| *mime == declared_mime)
        .map(|(_, ext)| *ext)
}

/// Stored filenames are v7 uuids plus a known extension; anything else in a
/// retrieval path is refused before it touches the filesystem.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or_default();
    ALLOWED_TYPES
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(mime, _)| *mime)
        .unwrap_or("application/octet-stream")
}

/// Validates and writes one upload, returning the public URL it will be
/// served under. Bytes are written exactly once; no deduplication.
pub async fn store(
    cfg: &MediaConfig,
    kind: MediaKind,
    bytes: &[u8],
    declared_mime: &str,
) -> AppResult<String> {
    let ext = extension_for(declared_mime)
        .ok_or_else(|| ChatError::UnsupportedMedia(declared_mime.to_owned()))?;

    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ChatError::PayloadTooLarge {
            size: bytes.len(),
            limit: MAX_UPLOAD_BYTES,
        });
    }

    let id = Uuid::now_v7();
    let name = match kind {
        MediaKind::Image => format!("{id}.{ext}"),
        MediaKind::Voice => format!("voice-{id}.{ext}"),
    };

    tokio::fs::create_dir_all(&cfg.upload_dir).await?;
    tokio::fs::write(cfg.upload_dir.join(&name), bytes).await?;
    tracing::debug!(file = %name, bytes = bytes.len(), "stored media upload");

    Ok(cfg.file_url(&name))
}
