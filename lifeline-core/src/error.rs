//! Error types for Lifeline operations

use crate::{ConnectionAction, ConnectionState, EntityType, EventId, EventType, SourceKind};
use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors. All of these are retryable from the caller's view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Malformed input. Nothing is written when one of these is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{entity_type:?} {id} does not belong to the acting user")]
    OwnershipMismatch { entity_type: EntityType, id: Uuid },

    #[error("{field} exceeds limit of {limit} (got {actual})")]
    TooLong {
        field: String,
        limit: usize,
        actual: usize,
    },
}

/// Unique-constraint race on a get-or-create path.
///
/// Always recovered locally by re-fetching the winning row.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Conflict on {entity_type:?} natural key {natural_key}")]
pub struct ConflictError {
    pub entity_type: EntityType,
    pub natural_key: String,
}

/// Domain rule violations. User-actionable, not retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid transition: cannot {action} while {from}")]
    InvalidTransition {
        from: ConnectionState,
        action: ConnectionAction,
    },

    #[error("Event {event_id} of type {event_type} cannot be amended")]
    InvalidAmendmentTarget {
        event_id: EventId,
        event_type: EventType,
    },

    #[error("Event {event_id} has more than {limit} amendments")]
    TooManyAmendments { event_id: EventId, limit: usize },

    #[error("Data source of kind {kind} has no external connection")]
    NotExternalSource { kind: SourceKind },
}

/// Blob store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlobError {
    #[error("Blob not found at {path}")]
    NotFound { path: String },

    #[error("Blob put failed for {path}: {reason}")]
    PutFailed { path: String, reason: String },

    #[error("Blob delete failed for {path}: {reason}")]
    DeleteFailed { path: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all Lifeline errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifelineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Absent, or owned by someone else. The two cases are indistinguishable.
    #[error("{entity_type:?} not found: {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unauthenticated")]
    Unauthenticated,
}

impl LifelineError {
    /// Build a not-found error for any typed id.
    pub fn not_found(entity_type: EntityType, id: impl Into<Uuid>) -> Self {
        LifelineError::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifelineError::Storage(_)
                | LifelineError::Blob(BlobError::PutFailed { .. })
                | LifelineError::Blob(BlobError::DeleteFailed { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LifelineError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LifelineError::Conflict(_))
    }
}

/// Result type alias for Lifeline operations.
pub type LifelineResult<T> = Result<T, LifelineError>;
