//! Project identity registry.
//!
//! Hands out project ids and indexes every project twice: by the composite
//! `(name, annotation type)` key and by id, the latter owning the project's
//! [`ProjectLoader`]. Lives for the whole process inside a
//! [`Workspace`](crate::workspace::Workspace).
//!
//! Ids come from a counter seeded at construction. The counter only moves
//! forward: unregistering a project never frees its id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::error::{LoaderError, Result};
use crate::loader::ProjectLoader;
use crate::models::{AnnotationType, ProjectId, ProjectIdentity, ProjectKey};

#[derive(Default)]
struct RegistryInner {
    by_key: HashMap<ProjectKey, ProjectId>,
    loaders: HashMap<ProjectId, Arc<ProjectLoader>>,
}

pub struct ProjectRegistry {
    last_id: AtomicI64,
    inner: RwLock<RegistryInner>,
}

impl ProjectRegistry {
    /// The first generated id is `seed + 1`.
    pub fn new(seed: ProjectId) -> Self {
        Self {
            last_id: AtomicI64::new(seed),
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generate_project_id(&self) -> ProjectId {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make sure no id up to and including `project_id` is generated again.
    pub fn reserve_through(&self, project_id: ProjectId) {
        self.last_id.fetch_max(project_id, Ordering::SeqCst);
    }

    /// Register a new project and allocate its loader.
    ///
    /// Annotation types arriving as text or integer codes are validated when
    /// parsed into [`AnnotationType`], which is where `InvalidAnnotationType`
    /// originates.
    pub fn register(&self, name: &str, annotation_type: AnnotationType) -> Result<ProjectId> {
        let key = ProjectKey::new(name, annotation_type);
        let mut inner = self.write();
        if inner.by_key.contains_key(&key) {
            return Err(LoaderError::DuplicateProject {
                name: name.to_string(),
                annotation_type,
            });
        }

        let project_id = self.generate_project_id();
        let identity = ProjectIdentity {
            project_id,
            project_name: name.to_string(),
            annotation_type,
        };
        inner.by_key.insert(key, project_id);
        inner
            .loaders
            .insert(project_id, Arc::new(ProjectLoader::new(identity)));

        info!(project = name, %annotation_type, project_id, "registered project");
        Ok(project_id)
    }

    /// Index a project restored from storage under its persisted id. The id
    /// counter moves past it so later registrations never collide.
    pub fn restore(&self, identity: ProjectIdentity) -> Result<Arc<ProjectLoader>> {
        let key = identity.key();
        let mut inner = self.write();
        if inner.by_key.contains_key(&key) || inner.loaders.contains_key(&identity.project_id) {
            return Err(LoaderError::DuplicateProject {
                name: identity.project_name,
                annotation_type: identity.annotation_type,
            });
        }

        self.reserve_through(identity.project_id);
        let project_id = identity.project_id;
        let loader = Arc::new(ProjectLoader::new(identity));
        inner.by_key.insert(key, project_id);
        inner.loaders.insert(project_id, Arc::clone(&loader));
        Ok(loader)
    }

    pub fn lookup(&self, name: &str, annotation_type: AnnotationType) -> Result<ProjectId> {
        self.read()
            .by_key
            .get(&ProjectKey::new(name, annotation_type))
            .copied()
            .ok_or_else(|| not_found(name, annotation_type))
    }

    /// True iff no project matches both `name` (exactly) and `annotation_type`.
    pub fn is_name_unique(&self, name: &str, annotation_type: AnnotationType) -> bool {
        !self
            .read()
            .by_key
            .contains_key(&ProjectKey::new(name, annotation_type))
    }

    pub fn loader(&self, project_id: ProjectId) -> Result<Arc<ProjectLoader>> {
        self.read()
            .loaders
            .get(&project_id)
            .cloned()
            .ok_or_else(|| LoaderError::NotFound(format!("project loader for id {}", project_id)))
    }

    pub fn loader_for(
        &self,
        name: &str,
        annotation_type: AnnotationType,
    ) -> Result<Arc<ProjectLoader>> {
        let inner = self.read();
        inner
            .by_key
            .get(&ProjectKey::new(name, annotation_type))
            .and_then(|id| inner.loaders.get(id))
            .cloned()
            .ok_or_else(|| not_found(name, annotation_type))
    }

    /// Drop a project and its loader. The id stays retired.
    pub fn unregister(&self, project_id: ProjectId) -> Result<ProjectIdentity> {
        let mut inner = self.write();
        let loader = inner
            .loaders
            .remove(&project_id)
            .ok_or_else(|| LoaderError::NotFound(format!("project id {}", project_id)))?;
        let identity = loader.identity().clone();
        inner.by_key.remove(&identity.key());
        info!(project = %identity.project_name, project_id, "unregistered project");
        Ok(identity)
    }

    /// All registered projects, ordered by id.
    pub fn projects(&self) -> Vec<Arc<ProjectLoader>> {
        let mut loaders: Vec<Arc<ProjectLoader>> = self.read().loaders.values().cloned().collect();
        loaders.sort_by_key(|l| l.project_id());
        loaders
    }

    pub fn len(&self) -> usize {
        self.read().loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn not_found(name: &str, annotation_type: AnnotationType) -> LoaderError {
    LoaderError::NotFound(format!(
        "project '{}' with annotation type {}",
        name, annotation_type
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_from_seed() {
        let registry = ProjectRegistry::new(10);
        assert_eq!(registry.generate_project_id(), 11);
        assert_eq!(registry.generate_project_id(), 12);
        let id = registry
            .register("Cats", AnnotationType::BoundingBox)
            .unwrap();
        assert_eq!(id, 13);
    }

    #[test]
    fn duplicate_pair_is_rejected_per_annotation_type() {
        let registry = ProjectRegistry::new(0);
        registry
            .register("Cats", AnnotationType::BoundingBox)
            .unwrap();

        let err = registry
            .register("Cats", AnnotationType::BoundingBox)
            .unwrap_err();
        assert!(matches!(err, LoaderError::DuplicateProject { .. }));
        assert_eq!(registry.len(), 1);

        registry
            .register("Cats", AnnotationType::Segmentation)
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn lookup_and_uniqueness_are_exact() {
        let registry = ProjectRegistry::new(0);
        let id = registry
            .register("Cats", AnnotationType::BoundingBox)
            .unwrap();

        assert_eq!(registry.lookup("Cats", AnnotationType::BoundingBox).unwrap(), id);
        assert!(matches!(
            registry.lookup("cats", AnnotationType::BoundingBox),
            Err(LoaderError::NotFound(_))
        ));
        assert!(!registry.is_name_unique("Cats", AnnotationType::BoundingBox));
        assert!(registry.is_name_unique("Cats ", AnnotationType::BoundingBox));
        assert!(registry.is_name_unique("Cats", AnnotationType::Segmentation));
    }

    #[test]
    fn loader_is_indexed_by_id() {
        let registry = ProjectRegistry::new(0);
        let id = registry.register("Dogs", AnnotationType::Segmentation).unwrap();
        let loader = registry.loader(id).unwrap();
        assert_eq!(loader.identity().project_name, "Dogs");
        assert!(Arc::ptr_eq(
            &loader,
            &registry.loader_for("Dogs", AnnotationType::Segmentation).unwrap()
        ));
        assert!(registry.loader(id + 1).is_err());
    }

    #[test]
    fn unregistered_ids_are_not_reused() {
        let registry = ProjectRegistry::new(0);
        let first = registry.register("A", AnnotationType::BoundingBox).unwrap();
        registry.unregister(first).unwrap();
        assert!(registry.is_name_unique("A", AnnotationType::BoundingBox));

        let second = registry.register("A", AnnotationType::BoundingBox).unwrap();
        assert!(second > first);
        assert!(registry.unregister(first).is_err());
    }

    #[test]
    fn restore_moves_counter_past_persisted_ids() {
        let registry = ProjectRegistry::new(0);
        registry
            .restore(ProjectIdentity {
                project_id: 40,
                project_name: "Old".into(),
                annotation_type: AnnotationType::BoundingBox,
            })
            .unwrap();
        assert_eq!(registry.generate_project_id(), 41);

        let dup = registry.restore(ProjectIdentity {
            project_id: 40,
            project_name: "Other".into(),
            annotation_type: AnnotationType::BoundingBox,
        });
        assert!(dup.is_err());
    }

    #[test]
    fn reserved_ids_are_skipped_and_never_lowered() {
        let registry = ProjectRegistry::new(0);
        registry.reserve_through(7);
        registry.reserve_through(3);
        assert_eq!(registry.generate_project_id(), 8);
    }
}
