//! Process-scoped entry point.
//!
//! A [`Workspace`] is built once at startup and owns everything the loading
//! core needs: the project registry, the selector gate, the storage backend,
//! the image and PDF collaborators, and the reconciliation engine. Request
//! layers (the CLI, an HTTP bridge, a UI shell) call its operations and turn
//! the results into [`Reply`](crate::reply::Reply) envelopes.
//!
//! # Load flow
//!
//! ```text
//! open_selection ─▶ PathSelector::select ─▶ begin_load ─▶ expand_selection
//!      ─▶ Pass A (ingest) ─▶ merge ─▶ Pass B (validate) ─▶ end_load
//! ```
//!
//! Any fault between `begin_load` and `end_load` marks the loader `ERROR`;
//! the gate is released either way.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::connector_fs::{expand_selection, PrerenderedPages};
use crate::db;
use crate::error::{db_error, LoaderError, Result};
use crate::loader::ProjectLoader;
use crate::migrate;
use crate::models::{
    AnnotationType, DataPoint, DataPointUpdate, ImageSource, LoaderStatus, ProjectId,
    ProjectIdentity, SelectionKind,
};
use crate::probe::{encode_file_data_url, ImageFileProbe};
use crate::progress::{LoadProgressReporter, NoProgress, Progress};
use crate::reconcile::{DeletionOutcome, IngestSummary, ReconciliationEngine, ValidationSummary};
use crate::registry::ProjectRegistry;
use crate::selector::{SelectorCoordinator, SelectorSession};
use crate::sqlite_store::SqliteStore;
use crate::store::AnnotationStore;
use crate::traits::{ImageProbe, PathSelector, PdfRasterizer};

/// Outcome of a load or reload.
#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub project: ProjectIdentity,
    /// The picker returned without a choice; nothing was scanned.
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,
    pub status: LoaderStatus,
    pub progress: Progress,
}

/// One row of [`Workspace::list_projects`].
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub project_id: ProjectId,
    pub project_name: String,
    pub annotation_type: AnnotationType,
    pub status: LoaderStatus,
    pub progress: Progress,
    pub uuid_count: usize,
    pub sanity_count: usize,
}

impl ProjectSummary {
    fn of(loader: &ProjectLoader) -> Self {
        let identity = loader.identity();
        Self {
            project_id: identity.project_id,
            project_name: identity.project_name.clone(),
            annotation_type: identity.annotation_type,
            status: loader.status(),
            progress: loader.progress(),
            uuid_count: loader.database_uuids().len(),
            sanity_count: loader.sanity_uuids().len(),
        }
    }
}

pub struct Workspace {
    config: Config,
    registry: Arc<ProjectRegistry>,
    selector: SelectorCoordinator,
    store: Arc<dyn AnnotationStore>,
    probe: Arc<dyn ImageProbe>,
    rasterizer: Arc<dyn PdfRasterizer>,
    reporter: Arc<dyn LoadProgressReporter>,
    engine: ReconciliationEngine,
}

impl Workspace {
    /// A workspace over `store` with the built-in image probe, pre-rendered
    /// PDF pages and no progress output.
    pub fn new(config: Config, store: Arc<dyn AnnotationStore>) -> Self {
        let registry = Arc::new(ProjectRegistry::new(config.loader.project_id_seed));
        let probe: Arc<dyn ImageProbe> = Arc::new(ImageFileProbe);
        let reporter: Arc<dyn LoadProgressReporter> = Arc::new(NoProgress);
        let engine = ReconciliationEngine::new(
            Arc::clone(&store),
            Arc::clone(&probe),
            Arc::clone(&reporter),
            config.loader.max_in_flight,
        );
        Self {
            selector: SelectorCoordinator::new(Arc::clone(&registry)),
            registry,
            store,
            probe,
            rasterizer: Arc::new(PrerenderedPages),
            reporter,
            engine,
            config,
        }
    }

    /// Open the configured SQLite database, create the schema if needed and
    /// restore persisted projects.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let workspace = Self::new(config.clone(), Arc::new(SqliteStore::new(pool)));
        workspace.restore().await?;
        Ok(workspace)
    }

    pub fn with_probe(mut self, probe: Arc<dyn ImageProbe>) -> Self {
        self.probe = probe;
        self.rebuild_engine();
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn LoadProgressReporter>) -> Self {
        self.reporter = reporter;
        self.rebuild_engine();
        self
    }

    fn rebuild_engine(&mut self) {
        self.engine = ReconciliationEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.probe),
            Arc::clone(&self.reporter),
            self.config.loader.max_in_flight,
        );
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProjectRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn AnnotationStore> {
        &self.store
    }

    // ── Projects ─────────────────────────────────────────────────────────

    /// Register every persisted project that is not registered yet and load
    /// its stored UUIDs. Returns how many projects were restored.
    pub async fn restore(&self) -> Result<usize> {
        let persisted = self.store.list_projects().await.map_err(db_error)?;
        let highest = self.store.highest_project_id().await.map_err(db_error)?;
        self.registry.reserve_through(highest);
        let mut restored = 0;
        for identity in persisted {
            if self.registry.loader(identity.project_id).is_ok() {
                continue;
            }
            let loader = self.registry.restore(identity)?;
            self.refresh_database_uuids(&loader).await?;
            restored += 1;
        }
        if restored > 0 {
            info!(restored, "restored projects from storage");
        }
        Ok(restored)
    }

    pub async fn create_project(
        &self,
        name: &str,
        annotation_type: AnnotationType,
    ) -> Result<ProjectIdentity> {
        if name.trim().is_empty() {
            return Err(LoaderError::UserDefined(
                "Project name must not be empty".to_string(),
            ));
        }

        let project_id = self.registry.register(name, annotation_type)?;
        let identity = self.registry.loader(project_id)?.identity().clone();
        if let Err(e) = self.store.save_project(&identity).await {
            // Keep registry and storage in step; the id stays retired.
            self.registry.unregister(project_id)?;
            return Err(db_error(e));
        }
        Ok(identity)
    }

    /// Delete a project with all its rows. Refused while it is being loaded.
    pub async fn delete_project(
        &self,
        name: &str,
        annotation_type: AnnotationType,
    ) -> Result<ProjectIdentity> {
        let loader = self.registry.loader_for(name, annotation_type)?;
        self.ensure_not_loading(&loader)?;

        self.store
            .delete_project(loader.identity())
            .await
            .map_err(db_error)?;
        self.registry.unregister(loader.project_id())
    }

    pub fn list_projects(&self) -> Vec<ProjectSummary> {
        self.registry
            .projects()
            .iter()
            .map(|loader| ProjectSummary::of(loader))
            .collect()
    }

    // ── Selection and loading ────────────────────────────────────────────

    pub fn open_selection(&self, kind: SelectionKind) -> bool {
        self.selector.open_selection(kind)
    }

    pub fn cancel_selection(&self) {
        self.selector.cancel();
    }

    pub fn selector_session(&self) -> SelectorSession {
        self.selector.session()
    }

    /// Ask `picker` for paths and run the full load flow on the result.
    pub async fn load_project(
        &self,
        name: &str,
        annotation_type: AnnotationType,
        kind: SelectionKind,
        picker: &dyn PathSelector,
    ) -> Result<LoadSummary> {
        let project_id = self.registry.lookup(name, annotation_type)?;
        if !self.selector.open_selection(kind) {
            return Err(LoaderError::UserDefined(if self.selector.is_busy() {
                "A project is still loading. Wait for it to finish before selecting again"
                    .to_string()
            } else {
                "A selection window is already open".to_string()
            }));
        }

        let Some(selection) = picker.select(kind).await else {
            self.selector.cancel();
            let loader = self.registry.loader(project_id)?;
            info!(project = name, "selection cancelled");
            return Ok(LoadSummary {
                project: loader.identity().clone(),
                cancelled: true,
                ingest: None,
                validation: None,
                status: loader.status(),
                progress: loader.progress(),
            });
        };

        let loader = match self.selector.begin_load(project_id) {
            Ok(loader) => loader,
            Err(e) => {
                self.selector.cancel();
                return Err(e);
            }
        };

        let outcome = self.run_load(&loader, selection).await;
        self.finish_load(&loader, outcome)
    }

    /// Re-validate the rows a project already stores, without scanning.
    pub async fn reload_project(
        &self,
        name: &str,
        annotation_type: AnnotationType,
    ) -> Result<LoadSummary> {
        let project_id = self.registry.lookup(name, annotation_type)?;
        let loader = self.selector.begin_load(project_id)?;

        let outcome = async {
            self.refresh_database_uuids(&loader).await?;
            let validation = self.engine.validate_database(&loader).await?;
            Ok::<_, LoaderError>((None, validation))
        }
        .await;
        self.finish_load(&loader, outcome)
    }

    async fn run_load(
        &self,
        loader: &Arc<ProjectLoader>,
        selection: Vec<PathBuf>,
    ) -> Result<(Option<IngestSummary>, ValidationSummary)> {
        let files = self.config.files.clone();
        let rasterizer = Arc::clone(&self.rasterizer);
        let max_pages = self.config.loader.max_pdf_pages;
        let paths = tokio::task::spawn_blocking(move || {
            expand_selection(&selection, &files, rasterizer.as_ref(), max_pages)
        })
        .await
        .map_err(|e| LoaderError::UserDefined(format!("Selection expansion aborted: {}", e)))?
        .map_err(|e| LoaderError::UserDefined(format!("{:#}", e)))?;

        self.refresh_database_uuids(loader).await?;
        let ingest = self.engine.ingest_paths(loader, paths).await?;
        self.engine.merge_new_uuids(loader);
        let validation = self.engine.validate_database(loader).await?;
        Ok((Some(ingest), validation))
    }

    fn finish_load(
        &self,
        loader: &Arc<ProjectLoader>,
        outcome: Result<(Option<IngestSummary>, ValidationSummary)>,
    ) -> Result<LoadSummary> {
        if let Err(e) = &outcome {
            error!(project = %loader.identity().project_name, "load failed: {}", e);
            loader.fail();
        }
        let status = match self.selector.end_load() {
            Ok(status) => status,
            Err(e) => {
                // Gate is already released; report what the loader itself holds.
                warn!(project = %loader.identity().project_name, "ending load: {}", e);
                loader.finalize()
            }
        };
        let (ingest, validation) = outcome?;
        Ok(LoadSummary {
            project: loader.identity().clone(),
            cancelled: false,
            ingest,
            validation: Some(validation),
            status,
            progress: loader.progress(),
        })
    }

    async fn refresh_database_uuids(&self, loader: &ProjectLoader) -> Result<()> {
        let uuids = self
            .store
            .project_uuids(loader.identity())
            .await
            .map_err(db_error)?;
        loader.record_database_uuids(uuids);
        Ok(())
    }

    fn ensure_not_loading(&self, loader: &ProjectLoader) -> Result<()> {
        if self.selector.is_busy() && self.selector.active_project_id() == Some(loader.project_id())
        {
            return Err(LoaderError::UserDefined(format!(
                "Project '{}' is loading. Wait for it to finish",
                loader.identity().project_name
            )));
        }
        Ok(())
    }

    // ── Data points ──────────────────────────────────────────────────────

    pub async fn delete_uuids(
        &self,
        name: &str,
        annotation_type: AnnotationType,
        uuids: &[Uuid],
    ) -> Result<DeletionOutcome> {
        let loader = self.registry.loader_for(name, annotation_type)?;
        self.ensure_not_loading(&loader)?;
        self.engine.delete_uuids(&loader, uuids).await
    }

    pub fn progress(&self, name: &str, annotation_type: AnnotationType) -> Result<Progress> {
        Ok(self.registry.loader_for(name, annotation_type)?.progress())
    }

    pub fn status(&self, name: &str, annotation_type: AnnotationType) -> Result<LoaderStatus> {
        Ok(self.registry.loader_for(name, annotation_type)?.status())
    }

    /// UUIDs confirmed readable by the last validation pass, in confirmation order.
    pub fn uuid_list(&self, name: &str, annotation_type: AnnotationType) -> Result<Vec<Uuid>> {
        Ok(self
            .registry
            .loader_for(name, annotation_type)?
            .sanity_uuids())
    }

    /// Stored row merged with live image facts and a thumbnail.
    pub async fn retrieve_data(
        &self,
        name: &str,
        annotation_type: AnnotationType,
        uuid: Uuid,
    ) -> Result<DataPoint> {
        let loader = self.registry.loader_for(name, annotation_type)?;
        let row = self
            .store
            .data_point(loader.identity(), uuid)
            .await
            .map_err(db_error)?
            .ok_or_else(|| {
                LoaderError::UserDefined(format!(
                    "Data not found when retrieving for project {} with uuid {}",
                    name, uuid
                ))
            })?;

        let probe = Arc::clone(&self.probe);
        let path = row.img_path.clone();
        let (max_w, max_h) = (
            self.config.thumbnail.max_width,
            self.config.thumbnail.max_height,
        );
        let meta = tokio::task::spawn_blocking(move || probe.metadata(&path, max_w, max_h))
            .await
            .map_err(|e| LoaderError::UserDefined(format!("Image probe aborted: {}", e)))?
            .map_err(|e| {
                LoaderError::UserDefined(format!(
                    "Failure in data retrieval for project {} with uuid {}: {:#}",
                    name, uuid, e
                ))
            })?;

        let annotation = match serde_json::from_str(&row.annotation) {
            Ok(value) => value,
            Err(e) => {
                warn!(%uuid, "stored annotation is not valid JSON: {}", e);
                serde_json::Value::Array(Vec::new())
            }
        };

        Ok(DataPoint {
            uuid,
            project_name: name.to_string(),
            img_path: row.img_path,
            annotation,
            img_depth: meta.depth,
            img_x: row.img_x,
            img_y: row.img_y,
            img_w: row.img_w,
            img_h: row.img_h,
            file_size: row.file_size,
            img_ori_w: meta.width,
            img_ori_h: meta.height,
            img_thumbnail: meta.thumbnail,
        })
    }

    /// The full image behind `uuid`, base64 encoded.
    pub async fn retrieve_data_path(
        &self,
        name: &str,
        annotation_type: AnnotationType,
        uuid: Uuid,
    ) -> Result<ImageSource> {
        let loader = self.registry.loader_for(name, annotation_type)?;
        let failure = || {
            format!(
                "Failure in data path retrieval for project {} with uuid {}",
                name, uuid
            )
        };
        let path = self
            .store
            .data_path(loader.identity(), uuid)
            .await
            .map_err(db_error)?
            .ok_or_else(|| LoaderError::UserDefined(failure()))?;

        let img_src = tokio::task::spawn_blocking(move || encode_file_data_url(&path))
            .await
            .map_err(|e| LoaderError::UserDefined(format!("Image read aborted: {}", e)))?
            .map_err(|e| LoaderError::UserDefined(format!("{}: {:#}", failure(), e)))?;
        Ok(ImageSource { uuid, img_src })
    }

    /// Persist an annotation edit. The annotation must be a JSON array.
    pub async fn update_data(
        &self,
        name: &str,
        annotation_type: AnnotationType,
        uuid: Uuid,
        update: &DataPointUpdate,
    ) -> Result<()> {
        let loader = self.registry.loader_for(name, annotation_type)?;
        if !update.annotation.is_array() {
            return Err(LoaderError::UserDefined(format!(
                "Annotation for uuid {} must be a JSON array",
                uuid
            )));
        }
        let updated = self
            .store
            .update_data_point(loader.identity(), uuid, update)
            .await
            .map_err(db_error)?;
        if !updated {
            return Err(LoaderError::NotFound(format!(
                "uuid {} in project '{}'",
                uuid, name
            )));
        }
        debug!(project = name, %uuid, "annotation updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::traits::StaticSelection;

    fn workspace() -> Workspace {
        Workspace::new(Config::minimal(), Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn empty_project_name_is_rejected() {
        let ws = workspace();
        let err = ws
            .create_project("  ", AnnotationType::BoundingBox)
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::UserDefined(_)));
        assert!(ws.registry().is_empty());
    }

    #[tokio::test]
    async fn cancelled_selection_leaves_loader_untouched() {
        let ws = workspace();
        ws.create_project("Cats", AnnotationType::BoundingBox)
            .await
            .unwrap();

        let summary = ws
            .load_project(
                "Cats",
                AnnotationType::BoundingBox,
                SelectionKind::Folder,
                &StaticSelection::cancelled(),
            )
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.status, LoaderStatus::Empty);
        assert_eq!(ws.selector_session(), SelectorSession::default());
    }

    #[tokio::test]
    async fn unsupported_selection_loads_nothing_and_releases_gate() {
        let ws = workspace();
        ws.create_project("Cats", AnnotationType::BoundingBox)
            .await
            .unwrap();

        let summary = ws
            .load_project(
                "Cats",
                AnnotationType::BoundingBox,
                SelectionKind::File,
                &StaticSelection::new(vec![PathBuf::from("/definitely/not/here")]),
            )
            .await
            .unwrap();
        assert_eq!(summary.ingest.unwrap().submitted, 0);
        assert_eq!(summary.status, LoaderStatus::Empty);
        assert!(!ws.selector_session().loader_busy);
    }

    /// Unregisters the project while its images are being checked.
    struct UnregisterDuringCheck {
        registry: Arc<ProjectRegistry>,
        project_id: ProjectId,
    }

    impl ImageProbe for UnregisterDuringCheck {
        fn is_readable_image(&self, _path: &std::path::Path) -> bool {
            let _ = self.registry.unregister(self.project_id);
            true
        }

        fn metadata(
            &self,
            _path: &std::path::Path,
            _max_width: u32,
            _max_height: u32,
        ) -> anyhow::Result<crate::models::ImageMetadata> {
            anyhow::bail!("not used")
        }
    }

    #[tokio::test]
    async fn load_outcome_survives_mid_load_unregister() {
        let ws = workspace();
        let project = ws
            .create_project("Cats", AnnotationType::BoundingBox)
            .await
            .unwrap();
        let registry = Arc::clone(ws.registry());
        let ws = ws.with_probe(Arc::new(UnregisterDuringCheck {
            registry,
            project_id: project.project_id,
        }));

        let summary = ws
            .load_project(
                "Cats",
                AnnotationType::BoundingBox,
                SelectionKind::File,
                &StaticSelection::new(vec![PathBuf::from("/imgs/a.png")]),
            )
            .await
            .unwrap();
        assert_eq!(summary.validation.unwrap().readable, 1);
        assert_eq!(summary.status, LoaderStatus::Loaded);
        assert!(!ws.selector_session().loader_busy);
        assert!(ws.registry().is_empty());
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let ws = workspace();
        assert!(matches!(
            ws.status("Nope", AnnotationType::Segmentation),
            Err(LoaderError::NotFound(_))
        ));
        assert!(matches!(
            ws.reload_project("Nope", AnnotationType::Segmentation).await,
            Err(LoaderError::NotFound(_))
        ));
    }
}
