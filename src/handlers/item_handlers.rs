//! HTTP handlers for id-addressed item queries under `/items`.

use crate::{
    errors::AppError,
    models::{
        item::{Item, ItemView},
        properties::Properties,
    },
    services::{AppState, item_service::SearchParams},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

/// Query accepted by `GET /items/search`. The `$`-prefixed spellings are
/// accepted as aliases.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(alias = "$filter")]
    pub filter: Option<String>,
    #[serde(alias = "$orderby")]
    pub orderby: Option<String>,
    #[serde(alias = "$top")]
    pub limit: Option<i64>,
    #[serde(alias = "$skip")]
    pub skip: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    pub level: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemReq {
    pub name: Option<String>,
    pub properties: Option<Properties>,
}

fn views(items: &[Item]) -> Vec<ItemView> {
    items.iter().map(ItemView::from).collect()
}

/// `GET /items`
pub async fn list_items(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(views(&state.items.list_all().await?)))
}

/// `GET /items/deleted`: items waiting for the janitor.
pub async fn list_deleted_items(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(views(&state.items.list_deleted().await?)))
}

/// `GET /items/search?filter=...&orderby=...&limit=...&skip=...`
pub async fn search_items(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let params = SearchParams {
        filter: query.filter,
        orderby: query.orderby,
        limit: query.limit,
        skip: query.skip,
    };
    Ok(Json(views(&state.items.search(&params).await?)))
}

/// `GET /items/{id}`
pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let item = state.items.get(id).await?;
    Ok(Json(ItemView::from(&item)))
}

/// `PATCH /items/{id}`: rename and/or replace properties.
pub async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let item = state.items.update(id, req.name, req.properties).await?;
    Ok(Json(ItemView::from(&item)))
}

/// `GET /items/{id}/tree?level=N`: nested descendants, unbounded by default.
pub async fn item_tree(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<TreeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let item = state.items.tree(id, query.level.unwrap_or(-1)).await?;
    Ok(Json(ItemView::from(&item)))
}
