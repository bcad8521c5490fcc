//! Per-project loader state.
//!
//! A [`ProjectLoader`] tracks which data points of one project are known to
//! storage, which of those still point at a readable image (the sanity list),
//! which were created by the current filesystem scan, how far the current
//! pass has progressed, and the loader status.
//!
//! Reconciliation passes complete out of order on many tasks at once, so all
//! state sits behind one mutex per loader. No method holds the lock across an
//! `.await`.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LoaderError, Result};
use crate::models::{LoaderStatus, ProjectId, ProjectIdentity};
use crate::progress::Progress;

#[derive(Debug, Default)]
struct LoaderState {
    uuid_list_from_database: HashSet<Uuid>,
    /// Subset of `uuid_list_from_database`, in confirmation order.
    sanity_uuid_list: Vec<Uuid>,
    file_system_new_uuid_list: Vec<Uuid>,
    progress: Progress,
    status: LoaderStatus,
}

#[derive(Debug)]
pub struct ProjectLoader {
    identity: ProjectIdentity,
    state: Mutex<LoaderState>,
}

impl ProjectLoader {
    pub fn new(identity: ProjectIdentity) -> Self {
        Self {
            identity,
            state: Mutex::new(LoaderState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> &ProjectIdentity {
        &self.identity
    }

    pub fn project_id(&self) -> ProjectId {
        self.identity.project_id
    }

    /// Replace the set of UUIDs known to storage and restart progress at
    /// `(0, len)`, or `(0, 1)` for an empty set. Sanity entries no longer in
    /// the set are dropped.
    pub fn record_database_uuids<I>(&self, uuids: I)
    where
        I: IntoIterator<Item = Uuid>,
    {
        let mut state = self.state();
        state.uuid_list_from_database = uuids.into_iter().collect();
        let LoaderState {
            uuid_list_from_database,
            sanity_uuid_list,
            ..
        } = &mut *state;
        sanity_uuid_list.retain(|uuid| uuid_list_from_database.contains(uuid));
        state.progress = Progress::new(state.uuid_list_from_database.len() as u64);
    }

    /// Restart progress for a pass over `total` items.
    pub fn begin_progress(&self, total: usize) -> Progress {
        let mut state = self.state();
        state.progress = Progress::new(total as u64);
        state.progress
    }

    /// Start a validation pass: the sanity list is rebuilt from scratch and
    /// progress restarts over the database set. Returns the UUIDs to check,
    /// sorted.
    pub fn begin_validation(&self) -> Vec<Uuid> {
        let mut state = self.state();
        state.sanity_uuid_list.clear();
        state.progress = Progress::new(state.uuid_list_from_database.len() as u64);
        let mut uuids: Vec<Uuid> = state.uuid_list_from_database.iter().copied().collect();
        uuids.sort();
        uuids
    }

    /// Append `uuid` to the sanity list. Ignored unless it is a known database
    /// UUID not already listed. Returns whether the list changed.
    pub fn mark_sanity_checked(&self, uuid: Uuid) -> bool {
        let mut state = self.state();
        if !state.uuid_list_from_database.contains(&uuid) || state.sanity_uuid_list.contains(&uuid)
        {
            return false;
        }
        state.sanity_uuid_list.push(uuid);
        true
    }

    pub fn advance_progress(&self, completed_so_far: u64) -> Progress {
        let mut state = self.state();
        state.progress.advance(completed_so_far);
        state.progress
    }

    pub fn push_file_system_uuid(&self, uuid: Uuid) {
        self.state().file_system_new_uuid_list.push(uuid);
    }

    /// Move the UUIDs created by the last filesystem scan into the database
    /// set. Returns how many were added.
    pub fn merge_new_uuids(&self) -> usize {
        let mut state = self.state();
        let new_uuids = std::mem::take(&mut state.file_system_new_uuid_list);
        let before = state.uuid_list_from_database.len();
        state.uuid_list_from_database.extend(new_uuids);
        state.uuid_list_from_database.len() - before
    }

    /// Split a removal request into `(present, absent)` against the database
    /// set. Request order is kept and duplicates collapse.
    pub fn partition(&self, requested: &[Uuid]) -> (Vec<Uuid>, Vec<Uuid>) {
        let state = self.state();
        let mut seen = HashSet::new();
        let mut present = Vec::new();
        let mut absent = Vec::new();
        for uuid in requested {
            if !seen.insert(*uuid) {
                continue;
            }
            if state.uuid_list_from_database.contains(uuid) {
                present.push(*uuid);
            } else {
                absent.push(*uuid);
            }
        }
        (present, absent)
    }

    /// Remove `uuids` from the database set and the sanity list. Returns the
    /// ones that were present in the database set beforehand.
    pub fn remove_uuids(&self, uuids: &HashSet<Uuid>) -> HashSet<Uuid> {
        let mut state = self.state();
        let removed: HashSet<Uuid> = uuids
            .iter()
            .filter(|uuid| state.uuid_list_from_database.remove(uuid))
            .copied()
            .collect();
        state
            .sanity_uuid_list
            .retain(|uuid| !removed.contains(uuid));
        removed
    }

    pub fn set_status(&self, next: LoaderStatus) -> Result<()> {
        let mut state = self.state();
        if !state.status.can_transition_to(next) {
            return Err(LoaderError::InvalidTransition {
                from: state.status,
                to: next,
            });
        }
        debug!(
            project = %self.identity.project_name,
            from = %state.status,
            to = %next,
            "loader status change"
        );
        state.status = next;
        Ok(())
    }

    /// Settle a finished scan: `LOADING` becomes `LOADED` when the sanity list
    /// has entries and `EMPTY` otherwise. Any other status is left untouched.
    pub fn finalize(&self) -> LoaderStatus {
        let mut state = self.state();
        if state.status == LoaderStatus::Loading {
            state.status = if state.sanity_uuid_list.is_empty() {
                LoaderStatus::Empty
            } else {
                LoaderStatus::Loaded
            };
        }
        state.status
    }

    /// Enter `ERROR`. Always allowed.
    pub fn fail(&self) {
        self.state().status = LoaderStatus::Error;
    }

    pub fn status(&self) -> LoaderStatus {
        self.state().status
    }

    pub fn progress(&self) -> Progress {
        self.state().progress
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.state().uuid_list_from_database.contains(uuid)
    }

    /// Database UUIDs, sorted.
    pub fn database_uuids(&self) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = self.state().uuid_list_from_database.iter().copied().collect();
        uuids.sort();
        uuids
    }

    pub fn sanity_uuids(&self) -> Vec<Uuid> {
        self.state().sanity_uuid_list.clone()
    }

    pub fn file_system_new_uuids(&self) -> Vec<Uuid> {
        self.state().file_system_new_uuid_list.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnnotationType;

    fn loader() -> ProjectLoader {
        ProjectLoader::new(ProjectIdentity {
            project_id: 1,
            project_name: "Cats".into(),
            annotation_type: AnnotationType::BoundingBox,
        })
    }

    fn uuids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn empty_database_set_never_yields_zero_total() {
        let l = loader();
        l.record_database_uuids(Vec::new());
        let p = l.progress();
        assert_eq!((p.completed(), p.total()), (0, 1));
    }

    #[test]
    fn recording_sets_total_to_set_size() {
        let l = loader();
        let ids = uuids(4);
        l.record_database_uuids(ids.iter().copied().chain(ids.iter().copied()));
        let p = l.progress();
        assert_eq!((p.completed(), p.total()), (0, 4));
        assert_eq!(l.database_uuids().len(), 4);
    }

    #[test]
    fn sanity_requires_membership_and_is_idempotent() {
        let l = loader();
        let ids = uuids(2);
        l.record_database_uuids(vec![ids[0]]);

        assert!(l.mark_sanity_checked(ids[0]));
        assert!(!l.mark_sanity_checked(ids[0]));
        assert!(!l.mark_sanity_checked(ids[1]));
        assert_eq!(l.sanity_uuids(), vec![ids[0]]);
    }

    #[test]
    fn re_recording_prunes_sanity_list() {
        let l = loader();
        let ids = uuids(2);
        l.record_database_uuids(ids.clone());
        l.mark_sanity_checked(ids[0]);
        l.mark_sanity_checked(ids[1]);

        l.record_database_uuids(vec![ids[1]]);
        assert_eq!(l.sanity_uuids(), vec![ids[1]]);
    }

    #[test]
    fn advance_never_exceeds_total() {
        let l = loader();
        l.record_database_uuids(uuids(3));
        assert_eq!(l.advance_progress(2).completed(), 2);
        assert_eq!(l.advance_progress(1).completed(), 2);
        assert_eq!(l.advance_progress(99).completed(), 3);
    }

    #[test]
    fn remove_reports_only_present() {
        let l = loader();
        let ids = uuids(3);
        l.record_database_uuids(vec![ids[0], ids[1]]);
        l.mark_sanity_checked(ids[0]);

        let request: HashSet<Uuid> = [ids[0], ids[2]].into_iter().collect();
        let removed = l.remove_uuids(&request);

        assert_eq!(removed, [ids[0]].into_iter().collect());
        assert_eq!(l.database_uuids(), vec![ids[1]]);
        assert!(l.sanity_uuids().is_empty());
    }

    #[test]
    fn partition_splits_and_dedupes() {
        let l = loader();
        let ids = uuids(3);
        l.record_database_uuids(vec![ids[0], ids[1]]);

        let (present, absent) = l.partition(&[ids[0], ids[2], ids[0]]);
        assert_eq!(present, vec![ids[0]]);
        assert_eq!(absent, vec![ids[2]]);
    }

    #[test]
    fn merge_moves_new_uuids_into_database_set() {
        let l = loader();
        let ids = uuids(2);
        l.record_database_uuids(vec![ids[0]]);
        l.push_file_system_uuid(ids[1]);

        assert_eq!(l.merge_new_uuids(), 1);
        assert!(l.contains(&ids[1]));
        assert!(l.file_system_new_uuids().is_empty());
    }

    #[test]
    fn invalid_transition_is_rejected_not_coerced() {
        let l = loader();
        let err = l.set_status(LoaderStatus::Loaded).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::InvalidTransition {
                from: LoaderStatus::Empty,
                to: LoaderStatus::Loaded
            }
        ));
        assert_eq!(l.status(), LoaderStatus::Empty);

        l.set_status(LoaderStatus::Loading).unwrap();
        assert!(l.set_status(LoaderStatus::Loading).is_err());
    }

    #[test]
    fn finalize_follows_sanity_list() {
        let l = loader();
        let ids = uuids(1);
        l.record_database_uuids(ids.clone());

        l.set_status(LoaderStatus::Loading).unwrap();
        assert_eq!(l.finalize(), LoaderStatus::Empty);

        l.set_status(LoaderStatus::Loading).unwrap();
        l.mark_sanity_checked(ids[0]);
        assert_eq!(l.finalize(), LoaderStatus::Loaded);

        l.fail();
        assert_eq!(l.finalize(), LoaderStatus::Error);
        l.set_status(LoaderStatus::Loading).unwrap();
    }

    #[test]
    fn validation_clears_previous_sanity_list() {
        let l = loader();
        let ids = uuids(2);
        l.record_database_uuids(ids.clone());
        l.mark_sanity_checked(ids[0]);
        l.advance_progress(2);

        let pending = l.begin_validation();
        assert_eq!(pending.len(), 2);
        assert!(l.sanity_uuids().is_empty());
        assert_eq!(l.progress().completed(), 0);
    }
}
