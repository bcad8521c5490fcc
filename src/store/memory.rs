//! In-memory [`AnnotationStore`] implementation for tests and embedding.
//!
//! Uses `BTreeMap`/`HashMap` behind `std::sync::RwLock`. Failure and latency
//! can be injected per path or per UUID to exercise the per-item error paths
//! and out-of-order completions of the reconciliation passes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{DataPointUpdate, ProjectId, ProjectIdentity, StoredDataPoint};

use super::AnnotationStore;

/// In-memory store for tests and embedders without a database.
pub struct InMemoryStore {
    projects: RwLock<BTreeMap<ProjectId, ProjectIdentity>>,
    highest_id: AtomicI64,
    rows: RwLock<HashMap<(ProjectId, Uuid), StoredDataPoint>>,
    failing_paths: RwLock<HashSet<PathBuf>>,
    failing_uuids: RwLock<HashSet<Uuid>>,
    delays: RwLock<HashMap<Uuid, Duration>>,
    insert_delays: RwLock<HashMap<PathBuf, Duration>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(BTreeMap::new()),
            highest_id: AtomicI64::new(0),
            rows: RwLock::new(HashMap::new()),
            failing_paths: RwLock::new(HashSet::new()),
            failing_uuids: RwLock::new(HashSet::new()),
            delays: RwLock::new(HashMap::new()),
            insert_delays: RwLock::new(HashMap::new()),
        }
    }

    /// Make every insert of `path` fail.
    pub fn fail_inserts_for(&self, path: impl Into<PathBuf>) {
        self.failing_paths.write().unwrap().insert(path.into());
    }

    /// Make every query and delete touching `uuid` fail.
    pub fn fail_queries_for(&self, uuid: Uuid) {
        self.failing_uuids.write().unwrap().insert(uuid);
    }

    /// Delay every query and delete touching `uuid`.
    pub fn delay_for(&self, uuid: Uuid, delay: Duration) {
        self.delays.write().unwrap().insert(uuid, delay);
    }

    /// Delay every insert of `path`.
    pub fn delay_inserts_for(&self, path: impl Into<PathBuf>, delay: Duration) {
        self.insert_delays.write().unwrap().insert(path.into(), delay);
    }

    pub fn row_count(&self, project_id: ProjectId) -> usize {
        self.rows
            .read()
            .unwrap()
            .keys()
            .filter(|(pid, _)| *pid == project_id)
            .count()
    }

    async fn settle(&self, uuid: Uuid) -> Result<()> {
        let delay = self.delays.read().unwrap().get(&uuid).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_uuids.read().unwrap().contains(&uuid) {
            bail!("injected failure for uuid {}", uuid);
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnnotationStore for InMemoryStore {
    async fn save_project(&self, project: &ProjectIdentity) -> Result<()> {
        self.highest_id
            .fetch_max(project.project_id, Ordering::SeqCst);
        self.projects
            .write()
            .unwrap()
            .insert(project.project_id, project.clone());
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectIdentity>> {
        Ok(self.projects.read().unwrap().values().cloned().collect())
    }

    async fn highest_project_id(&self) -> Result<ProjectId> {
        Ok(self.highest_id.load(Ordering::SeqCst))
    }

    async fn delete_project(&self, project: &ProjectIdentity) -> Result<()> {
        self.rows
            .write()
            .unwrap()
            .retain(|(pid, _), _| *pid != project.project_id);
        self.projects.write().unwrap().remove(&project.project_id);
        Ok(())
    }

    async fn project_uuids(&self, project: &ProjectIdentity) -> Result<Vec<Uuid>> {
        let mut uuids: Vec<Uuid> = self
            .rows
            .read()
            .unwrap()
            .keys()
            .filter(|(pid, _)| *pid == project.project_id)
            .map(|(_, uuid)| *uuid)
            .collect();
        uuids.sort();
        Ok(uuids)
    }

    async fn project_paths(&self, project: &ProjectIdentity) -> Result<Vec<PathBuf>> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|((pid, _), _)| *pid == project.project_id)
            .map(|(_, row)| row.img_path.clone())
            .collect())
    }

    async fn insert_data_point(
        &self,
        project: &ProjectIdentity,
        uuid: Uuid,
        path: &Path,
    ) -> Result<()> {
        let delay = self.insert_delays.read().unwrap().get(path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_paths.read().unwrap().contains(path) {
            bail!("injected failure for path {}", path.display());
        }
        let mut rows = self.rows.write().unwrap();
        let key = (project.project_id, uuid);
        if rows.contains_key(&key) {
            bail!("UNIQUE constraint failed: uuid {}", uuid);
        }
        rows.insert(key, StoredDataPoint::fresh(uuid, path.to_path_buf()));
        Ok(())
    }

    async fn data_path(&self, project: &ProjectIdentity, uuid: Uuid) -> Result<Option<PathBuf>> {
        self.settle(uuid).await?;
        Ok(self
            .rows
            .read()
            .unwrap()
            .get(&(project.project_id, uuid))
            .map(|row| row.img_path.clone()))
    }

    async fn data_point(
        &self,
        project: &ProjectIdentity,
        uuid: Uuid,
    ) -> Result<Option<StoredDataPoint>> {
        self.settle(uuid).await?;
        Ok(self
            .rows
            .read()
            .unwrap()
            .get(&(project.project_id, uuid))
            .cloned())
    }

    async fn update_data_point(
        &self,
        project: &ProjectIdentity,
        uuid: Uuid,
        update: &DataPointUpdate,
    ) -> Result<bool> {
        self.settle(uuid).await?;
        let mut rows = self.rows.write().unwrap();
        let Some(row) = rows.get_mut(&(project.project_id, uuid)) else {
            return Ok(false);
        };
        row.annotation = update.annotation.to_string();
        row.img_depth = update.img_depth;
        row.img_x = update.img_x;
        row.img_y = update.img_y;
        row.img_w = update.img_w;
        row.img_h = update.img_h;
        row.file_size = update.file_size;
        row.img_ori_w = update.img_ori_w;
        row.img_ori_h = update.img_ori_h;
        Ok(true)
    }

    async fn delete_data_point(&self, project: &ProjectIdentity, uuid: Uuid) -> Result<bool> {
        self.settle(uuid).await?;
        Ok(self
            .rows
            .write()
            .unwrap()
            .remove(&(project.project_id, uuid))
            .is_some())
    }
}
