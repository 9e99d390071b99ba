//! Core services of the store and the shared state handed to handlers.

pub mod box_service;
pub mod file_service;
pub mod item_service;
pub mod janitor_service;
pub mod mover_service;
pub mod object_store;
pub mod path_tree;
pub mod query_filter;

#[cfg(test)]
pub mod test_support;

use crate::{config::DedupScope, repository::SqliteCatalog};
use box_service::BoxService;
use file_service::FileService;
use item_service::ItemService;
use janitor_service::Janitor;
use mover_service::Mover;
use object_store::ObjectStore;
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Everything a request handler may need. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<SqliteCatalog>,
    pub store: ObjectStore,
    pub boxes: BoxService<SqliteCatalog>,
    pub items: ItemService<SqliteCatalog>,
    pub files: FileService<SqliteCatalog>,
    pub mover: Mover<SqliteCatalog>,
    pub janitor: Arc<Janitor<SqliteCatalog>>,
    /// Cancelled on shutdown; streaming requests listen on child tokens.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(catalog: Arc<SqliteCatalog>, storage_dir: impl Into<PathBuf>, scope: DedupScope) -> Self {
        let store = ObjectStore::new(storage_dir, scope);
        let janitor = Arc::new(Janitor::new(catalog.clone(), store.clone()));
        let reclaimer = janitor.reclaimer().clone();
        Self {
            boxes: BoxService::new(catalog.clone(), store.clone()),
            items: ItemService::new(catalog.clone()),
            files: FileService::new(catalog.clone(), store.clone(), reclaimer.clone()),
            mover: Mover::new(catalog.clone(), store.clone(), reclaimer),
            janitor,
            catalog,
            store,
            shutdown: CancellationToken::new(),
        }
    }
}
