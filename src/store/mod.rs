//! Storage abstraction for project and annotation rows.
//!
//! The [`AnnotationStore`] trait is the only way the loading core reaches
//! persisted state. Every call is a single attempt: failures are returned to
//! the caller as-is and never retried here.
//!
//! Implementations must be `Send + Sync`; reconciliation passes share one
//! store across many concurrently running tasks.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::{DataPointUpdate, ProjectId, ProjectIdentity, StoredDataPoint};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_project`](AnnotationStore::save_project) | Persist a project identity |
/// | [`list_projects`](AnnotationStore::list_projects) | All persisted projects |
/// | [`highest_project_id`](AnnotationStore::highest_project_id) | Id high-water mark |
/// | [`delete_project`](AnnotationStore::delete_project) | Drop a project and its rows |
/// | [`project_uuids`](AnnotationStore::project_uuids) | UUIDs stored for a project |
/// | [`project_paths`](AnnotationStore::project_paths) | Image paths stored for a project |
/// | [`insert_data_point`](AnnotationStore::insert_data_point) | New row with zeroed geometry |
/// | [`data_path`](AnnotationStore::data_path) | Stored image path of one row |
/// | [`data_point`](AnnotationStore::data_point) | Full stored row |
/// | [`update_data_point`](AnnotationStore::update_data_point) | Overwrite annotation and geometry |
/// | [`delete_data_point`](AnnotationStore::delete_data_point) | Delete one row |
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Insert or update a project identity.
    async fn save_project(&self, project: &ProjectIdentity) -> Result<()>;

    /// All persisted projects, ordered by id.
    async fn list_projects(&self) -> Result<Vec<ProjectIdentity>>;

    /// Highest project id ever saved, deleted projects included. 0 when none.
    async fn highest_project_id(&self) -> Result<ProjectId>;

    /// Remove a project together with all of its data rows.
    async fn delete_project(&self, project: &ProjectIdentity) -> Result<()>;

    async fn project_uuids(&self, project: &ProjectIdentity) -> Result<Vec<Uuid>>;

    async fn project_paths(&self, project: &ProjectIdentity) -> Result<Vec<PathBuf>>;

    /// Insert a row for `path` under `uuid` with an empty annotation and all
    /// geometry fields set to zero.
    async fn insert_data_point(
        &self,
        project: &ProjectIdentity,
        uuid: Uuid,
        path: &Path,
    ) -> Result<()>;

    async fn data_path(&self, project: &ProjectIdentity, uuid: Uuid) -> Result<Option<PathBuf>>;

    async fn data_point(
        &self,
        project: &ProjectIdentity,
        uuid: Uuid,
    ) -> Result<Option<StoredDataPoint>>;

    /// Overwrite the annotation and geometry of one row. Returns whether a
    /// row matched.
    async fn update_data_point(
        &self,
        project: &ProjectIdentity,
        uuid: Uuid,
        update: &DataPointUpdate,
    ) -> Result<bool>;

    /// Delete one row. Returns whether a row was removed.
    async fn delete_data_point(&self, project: &ProjectIdentity, uuid: Uuid) -> Result<bool>;
}
