//! HTTP handlers for uploads and downloads addressed by box name and path.
//! Bodies are streamed in both directions, never buffered whole.

use crate::{
    errors::AppError,
    models::{
        item::{Item, ItemView},
        properties::Properties,
    },
    services::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub flat: Option<String>,
}

/// True for a query flag given bare (`?force`) or with a truthy value.
pub fn flag(value: Option<&str>) -> bool {
    match value {
        None => false,
        Some(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"),
    }
}

/// Upload a file to `/upload/{box}/{*path}`.
///
/// Multipart form: an optional `properties` field (JSON object or
/// `k=v;k=v`) followed by the `file` field holding the content.
/// `?flat` stores the file directly below the box root.
pub async fn upload_file(
    State(state): State<AppState>,
    Path((box_name, path)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let flat = flag(query.flat.as_deref());
    let mut properties = Properties::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        match field.name() {
            Some("properties") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                properties = Properties::parse_form(&raw)
                    .map_err(|err| AppError::bad_request(format!("invalid properties: {}", err)))?;
            }
            Some("file") => {
                let stream = field.map(|chunk| chunk.map_err(io::Error::other));
                let cancel = state.shutdown.child_token();
                let item = state
                    .files
                    .upload_file(&box_name, &path, flat, properties, stream, &cancel)
                    .await?;
                return Ok((StatusCode::CREATED, Json(ItemView::from(&item))));
            }
            _ => continue,
        }
    }

    Err(AppError::bad_request("multipart form has no `file` field"))
}

/// Download the file at `/download/{box}/{*path}` as a streaming response.
pub async fn download_file(
    State(state): State<AppState>,
    Path((box_name, path)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (item, file) = state.files.download(&box_name, &path).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &item);
    Ok(response)
}

fn set_file_headers(headers: &mut HeaderMap, item: &Item) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&item.size.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    let quoted = format!("\"{}\"", item.sha256);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    // Header values must be visible ASCII; anything else falls back to `_`.
    let safe_name: String = item
        .name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", safe_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    if let Ok(value) = HeaderValue::from_str(&item.updated_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
