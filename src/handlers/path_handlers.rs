//! HTTP handlers for tree operations addressed as `/{box}/{*path}`:
//! listing, property edits, deletion, folder creation, copy and move.

use super::file_handlers::flag;
use crate::{
    errors::AppError,
    models::{item::ItemView, properties::Properties},
    services::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Present (even without a value) to return only the property bag.
    pub properties: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub force: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActionQuery {
    pub action: String,
    pub flat: Option<String>,
}

/// Body of a copy/move request. `to` is a `box/path` address.
#[derive(Debug, Deserialize)]
pub struct TransferReq {
    pub to: String,
    pub properties: Option<Properties>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FolderReq {
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Serialize)]
struct TransferResponse {
    item: ItemView,
    skipped: usize,
}

/// `GET /{box}`: the box root with its top-level items.
pub async fn list_root(
    State(state): State<AppState>,
    Path(box_name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.items.list_path(&box_name, "").await?))
}

/// `GET /{box}/{*path}`: the item with its direct children, or only its
/// properties with `?properties`.
pub async fn list_path(
    State(state): State<AppState>,
    Path((box_name, path)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError> {
    if query.properties.is_some() {
        let properties = state.items.get_properties(&box_name, &path).await?;
        return Ok(Json(properties).into_response());
    }
    Ok(Json(state.items.list_path(&box_name, &path).await?).into_response())
}

/// `PATCH /{box}/{*path}`: replace the item's properties.
pub async fn update_properties(
    State(state): State<AppState>,
    Path((box_name, path)): Path<(String, String)>,
    Json(properties): Json<Properties>,
) -> Result<impl IntoResponse, AppError> {
    let item = state
        .items
        .update_properties(&box_name, &path, properties)
        .await?;
    Ok(Json(ItemView::from(&item)))
}

/// `DELETE /{box}/{*path}`: soft delete; folders need `?force`.
pub async fn delete_path(
    State(state): State<AppState>,
    Path((box_name, path)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, AppError> {
    state
        .items
        .request_delete(&box_name, &path, flag(query.force.as_deref()))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /{box}/{*path}?action=copy|move|mkdir`
pub async fn path_action(
    State(state): State<AppState>,
    Path((box_name, path)): Path<(String, String)>,
    Query(query): Query<ActionQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    let source = format!("{}/{}", box_name, path.trim_start_matches('/'));
    match query.action.as_str() {
        "copy" | "move" => {
            let req: TransferReq = parse_body(&body)?;
            let cancel = state.shutdown.child_token();
            let transfer = if query.action == "copy" {
                state
                    .mover
                    .copy(&source, &req.to, req.properties, &cancel)
                    .await?
            } else {
                state
                    .mover
                    .move_item(&source, &req.to, req.properties, &cancel)
                    .await?
            };
            let body = TransferResponse {
                item: ItemView::from(&transfer.item),
                skipped: transfer.skipped,
            };
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
        "mkdir" => {
            let req: FolderReq = if body.is_empty() {
                FolderReq::default()
            } else {
                parse_body(&body)?
            };
            let folder = state
                .files
                .create_folder(&box_name, &path, flag(query.flat.as_deref()), req.properties)
                .await?;
            Ok((StatusCode::CREATED, Json(ItemView::from(&folder))).into_response())
        }
        other => Err(AppError::bad_request(format!(
            "unknown action `{}` (expected copy, move or mkdir)",
            other
        ))),
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|err| AppError::bad_request(format!("invalid body: {}", err)))
}
