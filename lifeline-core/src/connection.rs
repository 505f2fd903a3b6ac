//! Connection state machine for externally-connected data sources.
//!
//! # State Transition Diagram
//!
//! ```text
//! Disconnected ── connect() ──→ Connected ── sync() ──┬── ok ────→ Connected
//!                                    ↑                └── failed → Error
//!                                    │                               │
//!                                    └──────── retry() ok ───────────┤
//!                                                                    └ retry() failed → Error
//! ```
//!
//! Any other request is an `InvalidTransition` and leaves the source untouched.

use crate::{ConnectionAction, ConnectionState, DataSource, DomainError, SourceKind};

/// Result of an import attempt performed by `sync` or `retry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Succeeded { imported: usize },
    Failed { error_code: String },
}

impl SyncOutcome {
    /// State the source settles in once the attempt has finished.
    pub fn next_state(&self) -> ConnectionState {
        match self {
            SyncOutcome::Succeeded { .. } => ConnectionState::Connected,
            SyncOutcome::Failed { .. } => ConnectionState::Error,
        }
    }
}

impl ConnectionState {
    /// Check whether `action` may be requested from this state.
    ///
    /// Returns the state the source is in while the action runs. For `sync`
    /// and `retry` the final state depends on the [`SyncOutcome`].
    pub fn transition(self, action: ConnectionAction) -> Result<ConnectionState, DomainError> {
        match (self, action) {
            (ConnectionState::Disconnected, ConnectionAction::Connect) => {
                Ok(ConnectionState::Connected)
            }
            (ConnectionState::Connected, ConnectionAction::Sync) => Ok(ConnectionState::Connected),
            (ConnectionState::Error, ConnectionAction::Retry) => Ok(ConnectionState::Error),
            (from, action) => Err(DomainError::InvalidTransition { from, action }),
        }
    }

    pub fn allowed_actions(self) -> &'static [ConnectionAction] {
        match self {
            ConnectionState::Disconnected => &[ConnectionAction::Connect],
            ConnectionState::Connected => &[ConnectionAction::Sync],
            ConnectionState::Error => &[ConnectionAction::Retry],
        }
    }
}

/// Validate that `action` may run against `source`.
///
/// Internal kinds have no connection and reject every action.
pub fn check_action(source: &DataSource, action: ConnectionAction) -> Result<ConnectionState, DomainError> {
    ensure_external(source.kind)?;
    source.connection_state.transition(action)
}

fn ensure_external(kind: SourceKind) -> Result<(), DomainError> {
    if kind.is_external() {
        Ok(())
    } else {
        Err(DomainError::NotExternalSource { kind })
    }
}
