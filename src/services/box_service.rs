//! Box lifecycle: creation with its storage root, lookup, update and
//! soft deletion. Deleted boxes are emptied and removed by the janitor.

use crate::{
    errors::{StoreError, StoreResult},
    models::{properties::Properties, storage_box::StorageBox},
    repository::Catalog,
    services::object_store::ObjectStore,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

const BOX_NAME_MIN_LEN: usize = 1;
const BOX_NAME_MAX_LEN: usize = 63;

/// First path segments taken by fixed routes.
const RESERVED_NAMES: [&str; 7] = ["boxes", "items", "janitor", "upload", "download", "healthz", "readyz"];

pub struct BoxService<C> {
    catalog: Arc<C>,
    store: ObjectStore,
}

impl<C> Clone for BoxService<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            store: self.store.clone(),
        }
    }
}

impl<C: Catalog> BoxService<C> {
    pub fn new(catalog: Arc<C>, store: ObjectStore) -> Self {
        Self { catalog, store }
    }

    /// Create a box and its storage root directory.
    ///
    /// Returns `AlreadyExists` if a live box already has that name.
    pub async fn create(&self, name: &str, properties: Properties) -> StoreResult<StorageBox> {
        ensure_box_name_safe(name)?;

        let mut record = StorageBox::new(name, "", properties);
        let root = self.store.box_dir(record.id);
        record.path = root.to_string_lossy().into_owned();
        fs::create_dir_all(&root).await?;

        if let Err(err) = self.catalog.create_box(&record).await {
            if let Err(cleanup) = fs::remove_dir(&root).await {
                debug!("failed to remove box root {}: {}", root.display(), cleanup);
            }
            return Err(err);
        }

        info!("created box {} at {}", record.name, record.path);
        Ok(record)
    }

    /// Fetch a live box by id.
    pub async fn get(&self, id: Uuid) -> StoreResult<StorageBox> {
        self.catalog
            .find_box_by_id(id)
            .await?
            .filter(|record| !record.is_deleted())
            .ok_or_else(|| StoreError::NotFound(format!("box `{}`", id)))
    }

    pub async fn list(&self) -> StoreResult<Vec<StorageBox>> {
        self.catalog.find_all_boxes().await
    }

    /// Rename a box and/or replace its properties.
    pub async fn update(
        &self,
        id: Uuid,
        name: Option<String>,
        properties: Option<Properties>,
    ) -> StoreResult<StorageBox> {
        let mut record = self.get(id).await?;
        if let Some(name) = name {
            ensure_box_name_safe(&name)?;
            record.name = name;
        }
        if let Some(properties) = properties {
            record.properties = properties;
        }
        record.updated_at = Utc::now();
        self.catalog.update_box(&record).await?;
        Ok(record)
    }

    /// Soft-delete a box. Its items are reclaimed on the next cleanup pass.
    pub async fn delete(&self, id: Uuid) -> StoreResult<()> {
        if !self.catalog.delete_box(id).await? {
            return Err(StoreError::NotFound(format!("box `{}`", id)));
        }
        info!("box {} marked for deletion", id);
        Ok(())
    }
}

/// Validate a box name.
///
/// Box names become the first segment of every item address, so they are
/// limited to lowercase letters, digits, dots, hyphens and underscores, must
/// start and end with a letter or digit and may not contain `..`. Names of
/// fixed API routes are reserved.
pub fn ensure_box_name_safe(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidRequest(format!("box name `{}` invalid: {}", name, reason));

    if name.len() < BOX_NAME_MIN_LEN || name.len() > BOX_NAME_MAX_LEN {
        return Err(invalid("must be between 1 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-' | '_'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, hyphens and underscores",
        ));
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") {
        return Err(invalid("cannot contain consecutive dots"));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(invalid("name is reserved"));
    }
    Ok(())
}
