//! Reconciliation passes between the filesystem, storage and a loader.
//!
//! Three passes, each fanned out as one task per path or UUID:
//!
//! | Pass | Entry point | Effect on the loader |
//! |------|-------------|----------------------|
//! | A: ingestion | [`ReconciliationEngine::ingest_paths`] | new UUIDs pushed to the filesystem list |
//! | merge | [`ReconciliationEngine::merge_new_uuids`] | filesystem list moved into the database set |
//! | B: validation | [`ReconciliationEngine::validate_database`] | readable UUIDs pushed to the sanity list |
//! | deletion | [`ReconciliationEngine::delete_uuids`] | deleted UUIDs removed from both sets |
//!
//! Tasks run on a [`JoinSet`] with at most `max_in_flight` storage calls in
//! flight. Completions land in any order; each one bumps a shared counter and
//! advances the loader's progress to it, so progress only moves forward and
//! ends at the batch size. Per-item failures are logged and counted, never
//! fatal. Every dispatched task is awaited before a pass returns.

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{db_error, LoaderError, Result};
use crate::loader::ProjectLoader;
use crate::progress::{LoadPhase, LoadProgressEvent, LoadProgressReporter};
use crate::store::AnnotationStore;
use crate::traits::ImageProbe;

/// Result of Pass A.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub submitted: usize,
    pub inserted: usize,
    /// Paths the project already stored.
    pub skipped: usize,
    pub failed: usize,
}

/// Result of Pass B.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub checked: usize,
    pub readable: usize,
    pub unreadable: usize,
    pub failed: usize,
}

/// Result of a deletion request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionOutcome {
    pub deleted: Vec<Uuid>,
    /// Requested UUIDs the project did not hold.
    pub failed: Vec<Uuid>,
    /// Deleted UUIDs whose storage delete errored or matched no row.
    pub unconfirmed: usize,
}

enum IngestOutcome {
    Inserted,
    Failed,
}

enum ValidationOutcome {
    Readable,
    Unreadable,
    Failed,
}

pub struct ReconciliationEngine {
    store: Arc<dyn AnnotationStore>,
    probe: Arc<dyn ImageProbe>,
    reporter: Arc<dyn LoadProgressReporter>,
    max_in_flight: usize,
}

/// Completion bookkeeping shared by every task of one pass.
#[derive(Clone)]
struct Tracker {
    loader: Arc<ProjectLoader>,
    reporter: Arc<dyn LoadProgressReporter>,
    /// Held while advancing and reporting so events leave in counter order.
    processed: Arc<Mutex<u64>>,
    phase: LoadPhase,
}

impl Tracker {
    fn new(
        loader: &Arc<ProjectLoader>,
        reporter: &Arc<dyn LoadProgressReporter>,
        phase: LoadPhase,
    ) -> Self {
        Self {
            loader: Arc::clone(loader),
            reporter: Arc::clone(reporter),
            processed: Arc::new(Mutex::new(0)),
            phase,
        }
    }

    /// Count one settled item and publish the new progress.
    fn complete_one(&self) {
        let mut processed = self.processed.lock().unwrap_or_else(PoisonError::into_inner);
        *processed += 1;
        let progress = self.loader.advance_progress(*processed);
        self.reporter.report(&LoadProgressEvent {
            project: self.loader.identity().project_name.clone(),
            phase: self.phase,
            progress,
        });
    }

    fn report_current(&self) {
        self.reporter.report(&LoadProgressEvent {
            project: self.loader.identity().project_name.clone(),
            phase: self.phase,
            progress: self.loader.progress(),
        });
    }
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn AnnotationStore>,
        probe: Arc<dyn ImageProbe>,
        reporter: Arc<dyn LoadProgressReporter>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            store,
            probe,
            reporter,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Pass A: persist a fresh row for every path the project does not store yet.
    ///
    /// Progress restarts at `(0, paths.len())`. Skipped paths count as
    /// processed. Fails only if the stored paths cannot be read up front.
    pub async fn ingest_paths(
        &self,
        loader: &Arc<ProjectLoader>,
        paths: Vec<PathBuf>,
    ) -> Result<IngestSummary> {
        let identity = loader.identity().clone();
        let known: HashSet<PathBuf> = self
            .store
            .project_paths(&identity)
            .await
            .map_err(db_error)?
            .into_iter()
            .collect();

        let mut summary = IngestSummary {
            submitted: paths.len(),
            ..Default::default()
        };
        loader.begin_progress(paths.len());
        let tracker = Tracker::new(loader, &self.reporter, LoadPhase::Ingesting);
        tracker.report_current();

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        let mut dispatched = HashSet::new();

        for path in paths {
            if known.contains(&path) || !dispatched.insert(path.clone()) {
                debug!(path = %path.display(), "already stored, skipping");
                summary.skipped += 1;
                tracker.complete_one();
                continue;
            }

            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let tracker = tracker.clone();
            let identity = identity.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let uuid = Uuid::new_v4();
                let outcome = match store.insert_data_point(&identity, uuid, &path).await {
                    Ok(()) => {
                        tracker.loader.push_file_system_uuid(uuid);
                        IngestOutcome::Inserted
                    }
                    Err(e) => {
                        warn!(path = %path.display(), "insert failed: {:#}", e);
                        IngestOutcome::Failed
                    }
                };
                tracker.complete_one();
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(IngestOutcome::Inserted) => summary.inserted += 1,
                Ok(IngestOutcome::Failed) => summary.failed += 1,
                Err(e) => {
                    error!("ingest task aborted: {}", e);
                    summary.failed += 1;
                    tracker.complete_one();
                }
            }
        }

        info!(
            project = %identity.project_name,
            submitted = summary.submitted,
            inserted = summary.inserted,
            skipped = summary.skipped,
            failed = summary.failed,
            "ingestion pass finished"
        );
        Ok(summary)
    }

    /// Move UUIDs created by Pass A into the loader's database set.
    pub fn merge_new_uuids(&self, loader: &ProjectLoader) -> usize {
        let merged = loader.merge_new_uuids();
        debug!(
            project = %loader.identity().project_name,
            merged,
            "merged new uuids into database set"
        );
        merged
    }

    /// Pass B: rebuild the sanity list from the database set.
    ///
    /// Every stored UUID whose image still decodes is marked sanity-checked.
    /// An empty database set settles at once with progress `(0, 1)`.
    pub async fn validate_database(
        &self,
        loader: &Arc<ProjectLoader>,
    ) -> Result<ValidationSummary> {
        let uuids = loader.begin_validation();
        let tracker = Tracker::new(loader, &self.reporter, LoadPhase::Validating);
        tracker.report_current();

        let mut summary = ValidationSummary {
            checked: uuids.len(),
            ..Default::default()
        };
        if uuids.is_empty() {
            loader.finalize();
            return Ok(summary);
        }

        let identity = loader.identity().clone();
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for uuid in uuids {
            let store = Arc::clone(&self.store);
            let probe = Arc::clone(&self.probe);
            let semaphore = Arc::clone(&semaphore);
            let tracker = tracker.clone();
            let identity = identity.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = match store.data_path(&identity, uuid).await {
                    Ok(Some(path)) => {
                        let readable =
                            tokio::task::spawn_blocking(move || probe.is_readable_image(&path))
                                .await
                                .unwrap_or(false);
                        if readable {
                            tracker.loader.mark_sanity_checked(uuid);
                            ValidationOutcome::Readable
                        } else {
                            debug!(%uuid, "stored image is not readable");
                            ValidationOutcome::Unreadable
                        }
                    }
                    Ok(None) => {
                        warn!(%uuid, "uuid has no stored row");
                        ValidationOutcome::Unreadable
                    }
                    Err(e) => {
                        warn!(%uuid, "path lookup failed: {:#}", e);
                        ValidationOutcome::Failed
                    }
                };
                tracker.complete_one();
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ValidationOutcome::Readable) => summary.readable += 1,
                Ok(ValidationOutcome::Unreadable) => summary.unreadable += 1,
                Ok(ValidationOutcome::Failed) => summary.failed += 1,
                Err(e) => {
                    error!("validation task aborted: {}", e);
                    summary.failed += 1;
                    tracker.complete_one();
                }
            }
        }

        info!(
            project = %identity.project_name,
            checked = summary.checked,
            readable = summary.readable,
            unreadable = summary.unreadable,
            failed = summary.failed,
            "validation pass finished"
        );
        Ok(summary)
    }

    /// Delete the requested UUIDs that the project holds.
    ///
    /// Unknown UUIDs never reach storage and come back in `failed`. A row
    /// whose delete errors or finds nothing is logged and counted in
    /// `unconfirmed`; it still leaves the loader. Once every delete has
    /// settled all present UUIDs are dropped from the loader. If the loader
    /// no longer held every one of them it enters `ERROR` and a
    /// [`LoaderError::ConsistencyFault`] is returned.
    pub async fn delete_uuids(
        &self,
        loader: &Arc<ProjectLoader>,
        requested: &[Uuid],
    ) -> Result<DeletionOutcome> {
        let (present, absent) = loader.partition(requested);
        for uuid in &absent {
            debug!(%uuid, "delete requested for unknown uuid");
        }

        loader.begin_progress(present.len());
        let tracker = Tracker::new(loader, &self.reporter, LoadPhase::Deleting);

        let identity = loader.identity().clone();
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for uuid in present.iter().copied() {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let tracker = tracker.clone();
            let identity = identity.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let confirmed = match store.delete_data_point(&identity, uuid).await {
                    Ok(true) => true,
                    Ok(false) => {
                        warn!(%uuid, "no stored row to delete");
                        false
                    }
                    Err(e) => {
                        warn!(%uuid, "delete failed: {:#}", e);
                        false
                    }
                };
                tracker.complete_one();
                confirmed
            });
        }

        let mut unconfirmed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => unconfirmed += 1,
                Err(e) => {
                    error!("delete task aborted: {}", e);
                    unconfirmed += 1;
                    tracker.complete_one();
                }
            }
        }

        let requested_removal: HashSet<Uuid> = present.iter().copied().collect();
        let removed = loader.remove_uuids(&requested_removal);
        if removed.len() != requested_removal.len() {
            loader.fail();
            error!(
                project = %identity.project_name,
                requested = requested_removal.len(),
                removed = removed.len(),
                "loader lost track of rows being deleted"
            );
            return Err(LoaderError::ConsistencyFault(format!(
                "removing {} uuids from project '{}' but only {} were tracked",
                requested_removal.len(),
                identity.project_name,
                removed.len()
            )));
        }

        let mut deleted = present;
        deleted.sort();
        info!(
            project = %identity.project_name,
            deleted = deleted.len(),
            absent = absent.len(),
            unconfirmed,
            "deletion finished"
        );
        Ok(DeletionOutcome {
            deleted,
            failed: absent,
            unconfirmed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnnotationType, LoaderStatus, ProjectIdentity};
    use crate::progress::NoProgress;
    use crate::store::memory::InMemoryStore;
    use std::path::Path;

    /// Every path is readable.
    struct AlwaysReadable;

    impl ImageProbe for AlwaysReadable {
        fn is_readable_image(&self, _path: &Path) -> bool {
            true
        }

        fn metadata(
            &self,
            _path: &Path,
            _max_width: u32,
            _max_height: u32,
        ) -> anyhow::Result<crate::models::ImageMetadata> {
            anyhow::bail!("not used")
        }
    }

    fn setup() -> (Arc<InMemoryStore>, ReconciliationEngine, Arc<ProjectLoader>) {
        let store = Arc::new(InMemoryStore::new());
        let engine = ReconciliationEngine::new(
            store.clone(),
            Arc::new(AlwaysReadable),
            Arc::new(NoProgress),
            4,
        );
        let loader = Arc::new(ProjectLoader::new(ProjectIdentity {
            project_id: 1,
            project_name: "Cats".into(),
            annotation_type: AnnotationType::BoundingBox,
        }));
        (store, engine, loader)
    }

    #[tokio::test]
    async fn ingest_skips_known_paths_and_counts_them() {
        let (store, engine, loader) = setup();
        let first = engine
            .ingest_paths(&loader, vec!["/a.png".into(), "/b.png".into()])
            .await
            .unwrap();
        assert_eq!(first.inserted, 2);
        engine.merge_new_uuids(&loader);

        let second = engine
            .ingest_paths(&loader, vec!["/a.png".into(), "/c.png".into()])
            .await
            .unwrap();
        assert_eq!((second.inserted, second.skipped), (1, 1));
        assert_eq!(store.row_count(1), 3);
        let p = loader.progress();
        assert_eq!((p.completed(), p.total()), (2, 2));
    }

    #[tokio::test]
    async fn ingest_failures_are_absorbed() {
        let (store, engine, loader) = setup();
        store.fail_inserts_for("/bad.png");

        let summary = engine
            .ingest_paths(&loader, vec!["/bad.png".into(), "/good.png".into()])
            .await
            .unwrap();
        assert_eq!((summary.inserted, summary.failed), (1, 1));
        assert_eq!(loader.file_system_new_uuids().len(), 1);
        assert!(loader.progress().is_complete());
    }

    #[tokio::test]
    async fn empty_validation_settles_empty() {
        let (_store, engine, loader) = setup();
        loader.set_status(LoaderStatus::Loading).unwrap();

        let summary = engine.validate_database(&loader).await.unwrap();
        assert_eq!(summary.checked, 0);
        let p = loader.progress();
        assert_eq!((p.completed(), p.total()), (0, 1));
        assert_eq!(loader.status(), LoaderStatus::Empty);
    }
}
