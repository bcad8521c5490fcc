//! Typed failures of the loading and reconciliation core.
//!
//! Every [`Workspace`](crate::workspace::Workspace) operation resolves to a
//! value or a [`LoaderError`]; [`Reply`](crate::reply::Reply) turns either one
//! into the envelope surfaced to users.

use serde::Serialize;
use thiserror::Error;

use crate::models::{AnnotationType, LoaderStatus};

#[derive(Error, Debug)]
pub enum LoaderError {
    /// Annotation type outside the supported kinds
    #[error("Annotation type not supported: {0}")]
    InvalidAnnotationType(String),

    /// `(name, annotation type)` pair already registered
    #[error("Project '{name}' with annotation type {annotation_type} already exists")]
    DuplicateProject {
        name: String,
        annotation_type: AnnotationType,
    },

    /// Unknown project or UUID
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage collaborator failure, cause kept verbatim
    #[error("Database query error: {0:#}")]
    DatabaseQuery(anyhow::Error),

    /// In-memory and persisted UUID sets disagree
    #[error("Consistency fault: {0}")]
    ConsistencyFault(String),

    /// Domain rejection with a caller-facing message
    #[error("{0}")]
    UserDefined(String),

    /// Loader status change outside the state machine
    #[error("Invalid loader transition from {from} to {to}")]
    InvalidTransition {
        from: LoaderStatus,
        to: LoaderStatus,
    },
}

/// Stable error discriminant carried in reply envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidAnnotationType,
    DuplicateProject,
    NotFound,
    DatabaseQueryError,
    ConsistencyFault,
    UserDefinedError,
    InvalidTransition,
}

impl LoaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoaderError::InvalidAnnotationType(_) => ErrorKind::InvalidAnnotationType,
            LoaderError::DuplicateProject { .. } => ErrorKind::DuplicateProject,
            LoaderError::NotFound(_) => ErrorKind::NotFound,
            LoaderError::DatabaseQuery(_) => ErrorKind::DatabaseQueryError,
            LoaderError::ConsistencyFault(_) => ErrorKind::ConsistencyFault,
            LoaderError::UserDefined(_) => ErrorKind::UserDefinedError,
            LoaderError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
        }
    }
}

/// Convenience Result type using [`LoaderError`]
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Wrap a storage failure, for use with `map_err`.
pub fn db_error(e: anyhow::Error) -> LoaderError {
    LoaderError::DatabaseQuery(e)
}
