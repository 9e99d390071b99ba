//! Janitor trigger and status endpoints.

use crate::{errors::AppError, services::AppState};
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

#[derive(Serialize)]
struct JanitorStatus {
    running: bool,
    scheduled: bool,
}

/// `POST /janitor/clean`: run a pass now; 409 while one is in progress.
pub async fn trigger_clean(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let report = state.janitor.trigger_forced().await?;
    Ok(Json(report))
}

/// `GET /janitor/status`
pub async fn janitor_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(JanitorStatus {
        running: state.janitor.is_running(),
        scheduled: state.janitor.is_scheduled(),
    })
}
