//! Process-wide selector gate.
//!
//! Only one file/folder picker may be open and only one bulk load may run at a
//! time, across all projects. The [`SelectorCoordinator`] owns that session
//! state and is the single source of truth for which project is being loaded.
//!
//! Lock order is session, then loader. Nothing takes them the other way round.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::error::{LoaderError, Result};
use crate::loader::ProjectLoader;
use crate::models::{LoaderStatus, ProjectId, SelectionKind};
use crate::registry::ProjectRegistry;

/// Snapshot of the selector session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectorSession {
    /// `None` when no picker has been requested.
    pub current_selection_kind: Option<SelectionKind>,
    pub active_project_id: Option<ProjectId>,
    pub window_open: bool,
    /// Set from the start of a load until every dispatched operation settles.
    pub loader_busy: bool,
}

pub struct SelectorCoordinator {
    registry: Arc<ProjectRegistry>,
    session: Mutex<SelectorSession>,
}

impl SelectorCoordinator {
    pub fn new(registry: Arc<ProjectRegistry>) -> Self {
        Self {
            registry,
            session: Mutex::new(SelectorSession::default()),
        }
    }

    fn session_mut(&self) -> MutexGuard<'_, SelectorSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a picker window. Refused while a load runs or another window is open.
    pub fn open_selection(&self, kind: SelectionKind) -> bool {
        let mut session = self.session_mut();
        if session.loader_busy || session.window_open {
            debug!(?kind, "selector refused: window open or loader busy");
            return false;
        }
        session.window_open = true;
        session.current_selection_kind = Some(kind);
        true
    }

    /// Claim the gate for `project_id` and move its loader to `LOADING`.
    ///
    /// A second call while a load is running fails before any loader is touched.
    pub fn begin_load(&self, project_id: ProjectId) -> Result<Arc<ProjectLoader>> {
        let mut session = self.session_mut();
        if session.loader_busy {
            return Err(LoaderError::UserDefined(format!(
                "Another project (id {}) is still loading. Wait for it to finish before starting a new load",
                session
                    .active_project_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            )));
        }

        let loader = self.registry.loader(project_id)?;
        loader.set_status(LoaderStatus::Loading)?;

        session.loader_busy = true;
        session.window_open = false;
        session.active_project_id = Some(project_id);
        info!(
            project = %loader.identity().project_name,
            project_id,
            "load started"
        );
        Ok(loader)
    }

    /// Release the gate and settle the active loader's status.
    pub fn end_load(&self) -> Result<LoaderStatus> {
        let mut session = self.session_mut();
        if !session.loader_busy {
            return Err(LoaderError::UserDefined(
                "No project load is in progress".to_string(),
            ));
        }
        session.loader_busy = false;
        let project_id = session.active_project_id.take();

        let Some(project_id) = project_id else {
            warn!("load ended without an active project");
            return Ok(LoaderStatus::Empty);
        };

        // The project may have been unregistered mid-load; the gate is released regardless.
        let loader = self.registry.loader(project_id)?;
        let status = loader.finalize();
        info!(
            project = %loader.identity().project_name,
            project_id,
            %status,
            "load finished"
        );
        Ok(status)
    }

    /// Close a picker that returned without a choice. Never touches `loader_busy`.
    pub fn cancel(&self) {
        let mut session = self.session_mut();
        if session.window_open {
            debug!("selector window cancelled");
        }
        session.window_open = false;
        session.current_selection_kind = None;
    }

    pub fn session(&self) -> SelectorSession {
        self.session_mut().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.session_mut().loader_busy
    }

    pub fn active_project_id(&self) -> Option<ProjectId> {
        self.session_mut().active_project_id
    }
}
