//! Listing, downloading and deleting captured files.

use super::handlers::ApiError;
use super::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::ErrorKind;
use tokio_util::io::ReaderStream;

/// Broad category of a captured file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Image,
    Raw,
    Video,
    Other,
}

impl FileKind {
    pub fn from_name(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" => FileKind::Image,
            "dng" | "raw" => FileKind::Raw,
            "mjpeg" | "mp4" | "h264" | "mkv" => FileKind::Video,
            _ => FileKind::Other,
        }
    }
}

fn content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "dng" => "image/x-adobe-dng",
        "mp4" => "video/mp4",
        "mjpeg" => "video/x-motion-jpeg",
        _ => "application/octet-stream",
    }
}

/// One entry of the captures listing.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Local>,
    pub kind: FileKind,
}

/// Whether `name` is a plain, visible file name with no path components.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && name != ".."
}

fn check_name(name: &str) -> Result<(), ApiError> {
    if is_safe_name(name) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("invalid file name: {name}")))
    }
}

pub(super) async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let dir = state.session.captures_dir().to_path_buf();
    let mut entries = Vec::new();

    let mut read_dir = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot read {}: {e}", dir.display())))?;

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_safe_name(&name) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta
            .modified()
            .map(DateTime::<Local>::from)
            .unwrap_or_else(|_| Local::now());
        entries.push(FileEntry {
            kind: FileKind::from_name(&name),
            name,
            size: meta.len(),
            modified,
        });
    }

    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
    Ok(Json(json!({ "files": entries })))
}

pub(super) async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    check_name(&name)?;
    let path = state.session.captures_dir().join(&name);

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("no such file: {name}")))
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .len();

    let disposition = format!("attachment; filename=\"{name}\"");
    Ok((
        [
            (header::CONTENT_TYPE, content_type(&name).to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

pub(super) async fn delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check_name(&name)?;
    if state.session.is_recording_file(&name) {
        return Err(ApiError::Conflict(format!("{name} is being recorded")));
    }

    let path = state.session.captures_dir().join(&name);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            tracing::info!(file = %name, "Capture deleted");
            Ok(Json(json!({ "deleted": name })))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(ApiError::NotFound(format!("no such file: {name}")))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}
