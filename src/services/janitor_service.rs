//! Garbage collection of soft-deleted items, boxes and their blobs.
//!
//! A cleanup pass runs either on a cron schedule or when forced through the
//! API. Only one pass runs at a time: the state lives in a mutex that is held
//! just long enough to flip `Idle`/`Running`, never for the pass itself. A
//! forced trigger during a pass is a [`StoreError::Conflict`]; a scheduled
//! tick during a pass is skipped.
//!
//! Rows are always deleted before their blob, and a blob is only removed when
//! no live item in the dedup scope still references its digest.

use crate::{
    config::DedupScope,
    errors::{StoreError, StoreResult},
    models::{item::Item, storage_box::StorageBox},
    repository::Catalog,
    services::object_store::ObjectStore,
};
use chrono::Utc;
use cron::Schedule;
use serde::Serialize;
use std::{
    collections::BTreeSet,
    io::ErrorKind,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{fs, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of reclaiming one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reclaimed {
    pub rows: u64,
    pub blobs_removed: usize,
}

/// Deletes rows for good and releases the blobs nobody references anymore.
/// Shared by the janitor and cross-box moves.
pub struct Reclaimer<C> {
    catalog: Arc<C>,
    store: ObjectStore,
}

impl<C> Clone for Reclaimer<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            store: self.store.clone(),
        }
    }
}

impl<C: Catalog> Reclaimer<C> {
    pub fn new(catalog: Arc<C>, store: ObjectStore) -> Self {
        Self { catalog, store }
    }

    /// Hard-delete `item` (a folder takes its subtree rows with it), then for a
    /// file release its blob.
    pub async fn reclaim(&self, record: &StorageBox, item: &Item) -> StoreResult<Reclaimed> {
        let rows = self.catalog.hard_delete_item(item).await?;
        if item.is_folder() {
            return Ok(Reclaimed {
                rows,
                blobs_removed: 0,
            });
        }

        let removed = self.release_blob(record, &item.sha256).await?;
        Ok(Reclaimed {
            rows,
            blobs_removed: usize::from(removed),
        })
    }

    /// Hard-delete a whole subtree and release the blob of every file in it.
    ///
    /// Blob failures are logged; the rows are already gone at that point and a
    /// leftover blob is only wasted space.
    pub async fn reclaim_tree(&self, record: &StorageBox, item: &Item) -> StoreResult<Reclaimed> {
        let digests: BTreeSet<String> = self
            .catalog
            .find_subtree(item)
            .await?
            .into_iter()
            .filter(Item::is_file)
            .map(|file| file.sha256)
            .collect();

        let rows = self.catalog.hard_delete_item(item).await?;

        let mut blobs_removed = 0;
        for digest in &digests {
            match self.release_blob(record, digest).await {
                Ok(true) => blobs_removed += 1,
                Ok(false) => {}
                Err(err) => warn!(blob = %digest, error = %err, "failed to release blob"),
            }
        }
        Ok(Reclaimed {
            rows,
            blobs_removed,
        })
    }

    /// Remove the blob for `sha256` from `record`'s root unless a live item in
    /// the dedup scope still references it. Returns whether it was removed.
    pub async fn release_blob(&self, record: &StorageBox, sha256: &str) -> StoreResult<bool> {
        let scope_box = match self.store.scope() {
            DedupScope::Box => Some(record.id),
            DedupScope::Global => None,
        };
        let references = self.catalog.count_live_by_digest(sha256, scope_box).await?;
        if references > 0 {
            debug!("blob {} still has {} references", sha256, references);
            return Ok(false);
        }
        self.store.remove(sha256, &self.store.root_for(record)).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanState {
    Idle,
    Running,
}

/// Holds the state at `Running`; dropping it returns to `Idle`.
struct RunGuard {
    state: Arc<Mutex<CleanState>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *lock(&self.state) = CleanState::Idle;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Aggregate counts of one cleanup pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CleanReport {
    /// Live items marked deleted because their box was deleted.
    pub orphaned: u64,
    /// Soft-deleted items processed successfully.
    pub reclaimed: usize,
    /// Soft-deleted items that could not be reclaimed this pass.
    pub failed: usize,
    pub blobs_removed: usize,
    pub boxes_removed: usize,
}

struct ScheduledTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Janitor<C> {
    catalog: Arc<C>,
    store: ObjectStore,
    reclaimer: Reclaimer<C>,
    state: Arc<Mutex<CleanState>>,
    scheduled: Mutex<Option<ScheduledTask>>,
}

impl<C: Catalog> Janitor<C> {
    pub fn new(catalog: Arc<C>, store: ObjectStore) -> Self {
        let reclaimer = Reclaimer::new(catalog.clone(), store.clone());
        Self {
            catalog,
            store,
            reclaimer,
            state: Arc::new(Mutex::new(CleanState::Idle)),
            scheduled: Mutex::new(None),
        }
    }

    pub fn reclaimer(&self) -> &Reclaimer<C> {
        &self.reclaimer
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.state) == CleanState::Running
    }

    pub fn is_scheduled(&self) -> bool {
        lock(&self.scheduled).is_some()
    }

    fn try_begin(&self) -> Option<RunGuard> {
        let mut state = lock(&self.state);
        if *state == CleanState::Running {
            return None;
        }
        *state = CleanState::Running;
        Some(RunGuard {
            state: self.state.clone(),
        })
    }

    /// Run one pass now. Fails with `Conflict` while another pass is running.
    pub async fn trigger_forced(&self) -> StoreResult<CleanReport> {
        let _guard = self
            .try_begin()
            .ok_or_else(|| StoreError::Conflict("cleaning is already in progress".into()))?;
        info!(job = "clean", "forced cleanup started");
        self.run_pass().await
    }

    /// Start running passes on `expression` (cron, with or without a
    /// seconds field) until [`Janitor::stop`] is called.
    pub fn start_scheduled(self: &Arc<Self>, expression: &str) -> StoreResult<()> {
        let schedule = parse_schedule(expression)?;
        let mut slot = lock(&self.scheduled);
        if slot.is_some() {
            return Err(StoreError::Conflict("janitor is already scheduled".into()));
        }

        let cancel = CancellationToken::new();
        let janitor = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            janitor.schedule_loop(schedule, token).await;
        });
        *slot = Some(ScheduledTask { cancel, handle });
        info!(job = "clean", schedule = expression, "janitor scheduled");
        Ok(())
    }

    /// Cancel the schedule and wait for its task to finish. A no-op when
    /// nothing is scheduled.
    pub async fn stop(&self) {
        let task = lock(&self.scheduled).take();
        let Some(task) = task else {
            return;
        };
        task.cancel.cancel();
        if let Err(err) = task.handle.await {
            warn!(job = "clean", error = %err, "janitor task ended abnormally");
        }
        info!(job = "clean", "janitor stopped");
    }

    async fn schedule_loop(&self, schedule: Schedule, cancel: CancellationToken) {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!(job = "clean", "schedule has no upcoming runs");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let Some(_guard) = self.try_begin() else {
                debug!(job = "clean", "previous cleanup still running, skipping tick");
                continue;
            };
            if let Err(err) = self.run_pass().await {
                error!(job = "clean", error = %err, "scheduled cleanup failed");
            }
        }
    }

    async fn run_pass(&self) -> StoreResult<CleanReport> {
        let mut report = CleanReport::default();

        let deleted_boxes = self.catalog.find_deleted_boxes().await.map_err(|err| {
            error!(job = "clean", error = %err, "failed to list deleted boxes");
            err
        })?;
        for record in &deleted_boxes {
            match self.catalog.soft_delete_box_items(record.id).await {
                Ok(count) => report.orphaned += count,
                Err(err) => {
                    warn!(job = "clean", box_name = %record.name, error = %err, "failed to mark box items deleted")
                }
            }
        }

        let items = self.catalog.find_soft_deleted().await.map_err(|err| {
            error!(job = "clean", error = %err, "failed to list soft-deleted items");
            err
        })?;
        info!(job = "clean", count = items.len(), "reclaiming soft-deleted items");

        for item in &items {
            let record = match self.catalog.find_box_by_id(item.box_id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(job = "clean", item = %item.id, "owning box not found, skipping");
                    report.failed += 1;
                    continue;
                }
                Err(err) => {
                    warn!(job = "clean", item = %item.id, error = %err, "failed to load owning box, skipping");
                    report.failed += 1;
                    continue;
                }
            };

            match self.reclaimer.reclaim(&record, item).await {
                Ok(done) => {
                    debug!(job = "clean", item = %item.id, path = %item.path, "reclaimed");
                    report.reclaimed += 1;
                    report.blobs_removed += done.blobs_removed;
                }
                Err(err) => {
                    error!(job = "clean", item = %item.id, path = %item.path, error = %err, "failed to reclaim");
                    report.failed += 1;
                }
            }
        }

        for record in &deleted_boxes {
            match self.remove_box_if_empty(record).await {
                Ok(true) => report.boxes_removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(job = "clean", box_name = %record.name, error = %err, "failed to remove deleted box")
                }
            }
        }

        info!(
            job = "clean",
            reclaimed = report.reclaimed,
            failed = report.failed,
            blobs = report.blobs_removed,
            boxes = report.boxes_removed,
            "cleanup finished"
        );
        Ok(report)
    }

    async fn remove_box_if_empty(&self, record: &StorageBox) -> StoreResult<bool> {
        if self.catalog.count_box_items(record.id).await? > 0 {
            return Ok(false);
        }
        self.catalog.hard_delete_box(record.id).await?;

        if self.store.scope() == DedupScope::Box && !record.path.is_empty() {
            match fs::remove_dir_all(&record.path).await {
                Ok(()) => debug!("removed box root {}", record.path),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!("failed to remove box root {}: {}", record.path, err),
            }
        }
        Ok(true)
    }
}

/// Parse a cron expression, accepting the 5-field form without seconds.
pub fn parse_schedule(expression: &str) -> StoreResult<Schedule> {
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    };
    Schedule::from_str(&normalized).map_err(|err| {
        StoreError::InvalidRequest(format!("invalid clean schedule `{}`: {}", expression, err))
    })
}
