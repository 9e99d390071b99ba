//! Defines the HTTP routes of the store.
//!
//! ## Structure
//! - **Probes**: `GET /healthz`, `GET /readyz`
//! - **Boxes**
//!   - `GET|POST /boxes`: list / create
//!   - `GET|PATCH|DELETE /boxes/{id}`: fetch / rename or edit properties / soft delete
//! - **Items by id**
//!   - `GET /items`, `GET /items/deleted`, `GET /items/search?filter=&orderby=&limit=&skip=`
//!   - `GET|PATCH /items/{id}`, `GET /items/{id}/tree?level=N`
//! - **Janitor**: `POST /janitor/clean`, `GET /janitor/status`
//! - **Content**
//!   - `POST /upload/{box}/{*path}`: multipart upload (`?flat`)
//!   - `GET  /download/{box}/{*path}`: streamed download
//! - **Tree by path**
//!   - `GET /{box}`: root listing
//!   - `GET /{box}/{*path}`: listing (`?properties` for the bag only)
//!   - `PATCH /{box}/{*path}`: replace properties
//!   - `DELETE /{box}/{*path}`: soft delete (`?force` for folders)
//!   - `POST /{box}/{*path}?action=copy|move|mkdir`
//!
//! Static prefixes win over the `{box}` parameter, which is why those
//! names are reserved for boxes.

use crate::{
    handlers::{
        box_handlers::{create_box, delete_box, get_box, list_boxes, update_box},
        file_handlers::{download_file, upload_file},
        health_handlers::{healthz, readyz},
        item_handlers::{get_item, item_tree, list_deleted_items, list_items, search_items, update_item},
        janitor_handlers::{janitor_status, trigger_clean},
        path_handlers::{delete_path, list_path, list_root, path_action, update_properties},
    },
    services::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. `max_upload_bytes` bounds request bodies.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // boxes
        .route("/boxes", get(list_boxes).post(create_box))
        .route("/boxes/{id}", get(get_box).patch(update_box).delete(delete_box))
        // items by id
        .route("/items", get(list_items))
        .route("/items/deleted", get(list_deleted_items))
        .route("/items/search", get(search_items))
        .route("/items/{id}", get(get_item).patch(update_item))
        .route("/items/{id}/tree", get(item_tree))
        // janitor
        .route("/janitor/clean", post(trigger_clean))
        .route("/janitor/status", get(janitor_status))
        // content
        .route("/upload/{box_name}/{*path}", post(upload_file))
        .route("/download/{box_name}/{*path}", get(download_file))
        // tree by path
        .route("/{box_name}", get(list_root))
        .route(
            "/{box_name}/{*path}",
            get(list_path)
                .patch(update_properties)
                .delete(delete_path)
                .post(path_action),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DedupScope, repository::SqliteCatalog};
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "boxed-test-boundary";

    async fn app() -> (Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(SqliteCatalog::in_memory().await.unwrap());
        let state = AppState::new(catalog, dir.path(), DedupScope::Box);
        (routes(1024 * 1024).with_state(state), dir)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, bytes) = send(app, request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn upload(app: &Router, uri: &str, properties: Option<&str>, content: &str) -> (StatusCode, Value) {
        let mut body = String::new();
        if let Some(properties) = properties {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"properties\"\r\n\r\n{properties}\r\n"
            ));
        }
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"upload.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n{content}\r\n--{BOUNDARY}--\r\n"
        ));
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (app, _dir) = app().await;
        let (status, body) = get_json(&app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = get_json(&app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["catalog"]["ok"], true);
    }

    #[tokio::test]
    async fn upload_list_download_round() {
        let (app, _dir) = app().await;
        let (status, created) = send_json(&app, "POST", "/boxes", json!({"name": "docs"})).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "docs");

        let (status, item) = upload(&app, "/upload/docs/reports/q1.txt", Some("owner=ops"), "hello").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(item["path"], "reports/q1.txt");
        assert_eq!(item["size"], 5);
        assert_eq!(item["properties"]["owner"], json!(["ops"]));

        let (status, root) = get_json(&app, "/docs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(root["children"][0]["name"], "reports");
        assert_eq!(root["children"][0]["type"], "folder");

        let (status, props) = get_json(&app, "/docs/reports/q1.txt?properties").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(props["owner"], json!(["ops"]));

        let request = Request::builder()
            .uri("/download/docs/reports/q1.txt")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"q1.txt\""
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let (app, _dir) = app().await;
        send_json(&app, "POST", "/boxes", json!({"name": "docs"})).await;

        let (status, body) = get_json(&app, "/docs/missing.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);

        let (status, _) = send_json(&app, "POST", "/boxes", json!({"name": "docs"})).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send_json(&app, "POST", "/boxes", json!({"name": "Bad Name"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(&app, "/items/search?filter=name%20eq%20").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_copy_and_janitor() {
        let (app, _dir) = app().await;
        send_json(&app, "POST", "/boxes", json!({"name": "docs"})).await;
        send_json(&app, "POST", "/boxes", json!({"name": "archive"})).await;
        upload(&app, "/upload/docs/folder/a.txt", None, "hello").await;

        let (status, copied) = send_json(
            &app,
            "POST",
            "/docs/folder?action=copy",
            json!({"to": "archive/backup"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(copied["skipped"], 0);
        assert_eq!(copied["item"]["path"], "backup");

        let (status, _) = send_json(&app, "DELETE", "/docs/folder", Value::Null).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send_json(&app, "DELETE", "/docs/folder?force", Value::Null).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, deleted) = get_json(&app, "/items/deleted").await;
        assert_eq!(deleted.as_array().unwrap().len(), 2);

        let (status, report) = send_json(&app, "POST", "/janitor/clean", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["reclaimed"], 2);

        let (_, deleted) = get_json(&app, "/items/deleted").await;
        assert!(deleted.as_array().unwrap().is_empty());
        let (status, _) = get_json(&app, "/archive/backup/a.txt").await;
        assert_eq!(status, StatusCode::OK);
    }
}
