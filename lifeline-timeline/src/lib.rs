//! Lifeline Timeline - Domain Services
//!
//! Event-sourced personal health record timeline built on
//! [`lifeline_storage::StorageTrait`]:
//!
//! - append-only event log anchored to provenance and consent
//! - non-destructive amendments with a current-view resolver
//! - data source registry and connection state machine
//! - document upload and download proxy over a [`lifeline_storage::BlobStore`]
//! - audit trail and sync job queue
//!
//! [`Timeline`] composes the services; every operation takes the acting
//! [`lifeline_core::UserId`] explicitly.

pub mod amendment;
pub mod audit;
pub mod consent;
pub mod documents;
pub mod event_log;
pub mod identity;
pub mod import;
pub mod jobs;
pub mod provenance;
pub mod sources;
pub mod sync;
pub mod telemetry;
pub mod timeline;

pub use amendment::{AmendmentResolver, CurrentViewPage};
pub use audit::{AuditOutbox, AuditTrail};
pub use consent::ConsentStore;
pub use documents::{DocumentDownload, DocumentUpload};
pub use event_log::{EventIter, EventLog};
pub use identity::{Credential, IdentityProvider, StaticIdentityProvider};
pub use import::{DemoImportSource, ImportFailure, ImportRecord, ImportSource};
pub use jobs::{error_code, JobQueue};
pub use provenance::ProvenanceLedger;
pub use sources::DataSourceRegistry;
pub use telemetry::{init_tracing, TelemetryConfig};
pub use timeline::{AmendmentInput, JournalEntryInput, Timeline, VisitSummaryInput};
