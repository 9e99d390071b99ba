//! HTTP handlers for box lifecycle operations under `/boxes`.

use crate::{errors::AppError, models::properties::Properties, services::AppState};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateBoxReq {
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBoxReq {
    pub name: Option<String>,
    pub properties: Option<Properties>,
}

/// `POST /boxes`
pub async fn create_box(
    State(state): State<AppState>,
    Json(req): Json<CreateBoxReq>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.boxes.create(&req.name, req.properties).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /boxes`
pub async fn list_boxes(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.boxes.list().await?))
}

/// `GET /boxes/{id}`
pub async fn get_box(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.boxes.get(id).await?))
}

/// `PATCH /boxes/{id}`
pub async fn update_box(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateBoxReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.boxes.update(id, req.name, req.properties).await?))
}

/// `DELETE /boxes/{id}`: soft delete; the janitor empties and removes it.
pub async fn delete_box(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.boxes.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
