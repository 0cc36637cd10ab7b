//! Structured error types for plan operations.
//!
//! Every failure carries an [`ErrorKind`] so callers (and the CLI exit code
//! mapping) can branch on the category without inspecting message text.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Error categories for programmatic handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Referenced epic, feature, task or dependency does not exist.
    NotFound,
    /// Malformed input.
    Validation,
    /// Resource already claimed or key space exhausted.
    Conflict,
    /// Unknown status, disallowed transition, or missing reason.
    Transition,
    /// Unsafe custom path.
    PathSafety,
    /// Database, filesystem or template failures.
    Storage,
    /// A cancellation checkpoint fired before commit.
    Cancelled,
}

impl ErrorKind {
    /// Stable process exit code for this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::NotFound => 3,
            ErrorKind::Validation => 4,
            ErrorKind::Conflict => 5,
            ErrorKind::Transition => 6,
            ErrorKind::PathSafety => 7,
            ErrorKind::Storage => 8,
            ErrorKind::Cancelled => 9,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transition => "transition",
            ErrorKind::PathSafety => "path_safety",
            ErrorKind::Storage => "storage",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Entity type named in not-found errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Epic,
    Feature,
    Task,
    Dependency,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Epic => "epic",
            Entity::Feature => "feature",
            Entity::Task => "task",
            Entity::Dependency => "dependency task",
        };
        f.write_str(name)
    }
}

/// Why a custom path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathViolation {
    Empty,
    Absolute,
    Traversal,
    OutsideProject,
    Extension,
}

impl fmt::Display for PathViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            PathViolation::Empty => "path is empty or has no file name",
            PathViolation::Absolute => "path must be relative to the project root",
            PathViolation::Traversal => "path contains '..' (path traversal not allowed)",
            PathViolation::OutsideProject => "path resolves outside the project root",
            PathViolation::Extension => "file must have a .md extension",
        };
        f.write_str(reason)
    }
}

/// Stage of task creation a cancellation checkpoint fired at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStage {
    /// Validation passed, nothing written yet.
    BeforeWrite,
    /// Task and history rows inserted, transaction still open.
    AfterInsert,
    /// Markdown file written, transaction still open.
    AfterFileWrite,
}

impl fmt::Display for CreateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CreateStage::BeforeWrite => "before write",
            CreateStage::AfterInsert => "after database insert",
            CreateStage::AfterFileWrite => "after file write",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("{entity} {key} does not exist")]
    NotFound { entity: Entity, key: String },

    #[error("feature {feature} does not belong to epic {epic}")]
    FeatureEpicMismatch { feature: String, epic: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("file '{path}' is already claimed by task {claimant} ('{title}'); use --force to reassign")]
    FileClaimed {
        path: String,
        claimant: String,
        title: String,
    },

    #[error("{entity} with key {key} already exists")]
    KeyInUse { entity: Entity, key: String },

    #[error("feature {0} has reached maximum task count (999)")]
    KeySpaceExhausted(String),

    #[error("unknown status '{0}'")]
    UnknownStatus(String),

    #[error("invalid status transition from {from} to {to} (allowed: {})", allowed.join(", "))]
    InvalidTransition {
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    /// Backward transition attempted without a reason.
    #[error("reason is required for backward status transitions")]
    ReasonRequired,

    #[error("invalid path '{path}': {violation}")]
    UnsafePath {
        path: String,
        violation: PathViolation,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database migration failed: {0}")]
    Migration(#[from] refinery::Error),

    #[error("filesystem error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render template '{template}': {reason}")]
    Template { template: String, reason: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("operation cancelled {0}")]
    Cancelled(CreateStage),
}

impl PlanError {
    pub fn not_found(entity: Entity, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub fn unsafe_path(path: impl Into<String>, violation: PathViolation) -> Self {
        Self::UnsafePath {
            path: path.into(),
            violation,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::NotFound { .. } => ErrorKind::NotFound,
            PlanError::FeatureEpicMismatch { .. } | PlanError::Invalid { .. } => {
                ErrorKind::Validation
            }
            PlanError::FileClaimed { .. }
            | PlanError::KeyInUse { .. }
            | PlanError::KeySpaceExhausted(_) => ErrorKind::Conflict,
            PlanError::UnknownStatus(_)
            | PlanError::InvalidTransition { .. }
            | PlanError::ReasonRequired => ErrorKind::Transition,
            PlanError::UnsafePath { .. } => ErrorKind::PathSafety,
            PlanError::Database(_)
            | PlanError::Migration(_)
            | PlanError::Io { .. }
            | PlanError::Template { .. }
            | PlanError::Serde(_) => ErrorKind::Storage,
            PlanError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// True when the database rejected a write on a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            PlanError::Database(rusqlite::Error::SqliteFailure(err, _)) => {
                err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            }
            _ => false,
        }
    }
}

/// Result type for plan operations.
pub type PlanResult<T> = std::result::Result<T, PlanError>;
