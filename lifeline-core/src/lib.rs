//! Lifeline Core - Entity Types
//!
//! Data structures, error types and pure domain rules for the personal
//! health-record timeline. All other crates depend on this. Nothing here
//! performs I/O.

mod amendment;
mod config;
mod connection;
mod details;
mod entities;
mod enums;
mod error;
mod filter;
mod identity;

pub use amendment::{latest_first, CurrentView};
pub use config::*;
pub use connection::{check_action, SyncOutcome};
pub use details::{
    AmendmentDetails, AmendmentPatch, DocumentDetails, EventDetails, ExternalDetails,
    JournalDetails, VisitSummaryDetails,
};
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use filter::{timeline_order, EventCursor, EventFilter, EventPage, EventQuery};
pub use identity::*;

use sha2::{Digest, Sha256};

/// Derive a job idempotency key from its type and payload.
///
/// Hex SHA-256 of `job_type ":" payload_json`. `serde_json::Value` objects
/// serialize with sorted keys, so equal payloads yield equal keys.
pub fn derive_idempotency_key(job_type: JobType, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job_type.as_db_str().as_bytes());
    hasher.update(b":");
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_idempotency_key_is_stable() {
        let a = derive_idempotency_key(JobType::SourceSync, &json!({"b": 1, "a": 2}));
        let b = derive_idempotency_key(JobType::SourceSync, &json!({"a": 2, "b": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_idempotency_key_depends_on_payload() {
        let a = derive_idempotency_key(JobType::SourceSync, &json!({"data_source_id": "x"}));
        let b = derive_idempotency_key(JobType::SourceSync, &json!({"data_source_id": "y"}));
        assert_ne!(a, b);
    }
}
