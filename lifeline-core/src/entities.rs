//! Core entity structures

use crate::{
    AuditEventId, CaptureMethod, ConnectionState, ConsentAgreementId, ConsentSnapshotId,
    DataSourceId, DocumentId, EntityIdType, EntityType, EventDetails, EventId, EventType, JobId,
    JobStatus, ProvenanceId, SourceKind, SourceStatus, SyncStatus, Timestamp, UserId,
    ValidationError,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// DATA SOURCE
// ============================================================================

/// Logical origin of a user's health data.
///
/// The connection fields are the only overwritable state in the system and
/// only change through the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DataSource {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub data_source_id: DataSourceId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: UserId,
    pub kind: SourceKind,
    pub display_name: String,
    pub provider: Option<String>,
    pub status: SourceStatus,
    pub connection_state: ConnectionState,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub last_sync_at: Option<Timestamp>,
    pub last_sync_status: SyncStatus,
    pub last_error_code: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub last_error_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl DataSource {
    /// Create a new data source in its initial state for `kind`.
    ///
    /// Internal kinds start `active`; external kinds start `pending` and
    /// `disconnected`.
    pub fn new(user_id: UserId, kind: SourceKind, display_name: impl Into<String>) -> Self {
        let status = if kind.is_external() {
            SourceStatus::Pending
        } else {
            SourceStatus::Active
        };
        Self {
            data_source_id: DataSourceId::now_v7(),
            user_id,
            kind,
            display_name: display_name.into(),
            provider: None,
            status,
            connection_state: ConnectionState::Disconnected,
            last_sync_at: None,
            last_sync_status: SyncStatus::Never,
            last_error_code: None,
            last_error_at: None,
            created_at: Utc::now(),
        }
    }

    /// Set provider name.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Natural key used for get-or-create.
    pub fn natural_key(&self) -> SourceKey {
        SourceKey::new(self.user_id, self.kind, &self.display_name)
    }
}

/// Natural key of a data source: `(user_id, kind, display_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub user_id: UserId,
    pub kind: SourceKind,
    pub display_name: String,
}

impl SourceKey {
    pub fn new(user_id: UserId, kind: SourceKind, display_name: &str) -> Self {
        Self {
            user_id,
            kind,
            display_name: display_name.to_string(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.kind, self.display_name)
    }
}

// ============================================================================
// PROVENANCE
// ============================================================================

/// Keys accepted in provenance metadata. Provenance describes *how* data
/// arrived; it never carries health content.
pub const PROVENANCE_METADATA_KEYS: &[&str] = &[
    "source",
    "content_type",
    "file_size",
    "record_count",
    "client",
    "amends_event_id",
    "reason_present",
    "referenced_count",
];

/// Longest string value accepted in provenance metadata.
pub const PROVENANCE_METADATA_MAX_VALUE_CHARS: usize = 128;

/// Non-identifying key-value metadata attached to a provenance record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema), schema(value_type = Object))]
#[serde(transparent)]
pub struct ProvenanceMetadata(BTreeMap<String, serde_json::Value>);

impl ProvenanceMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, rejecting unknown keys and non-scalar or long values.
    pub fn with(
        mut self,
        key: &str,
        value: impl Into<serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn insert(
        &mut self,
        key: &str,
        value: impl Into<serde_json::Value>,
    ) -> Result<(), ValidationError> {
        if !PROVENANCE_METADATA_KEYS.contains(&key) {
            return Err(ValidationError::InvalidValue {
                field: format!("metadata.{}", key),
                reason: "key is not an allowed provenance metadata key".to_string(),
            });
        }
        let value = value.into();
        match &value {
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {}
            serde_json::Value::String(s) => {
                let len = s.chars().count();
                if len > PROVENANCE_METADATA_MAX_VALUE_CHARS {
                    return Err(ValidationError::TooLong {
                        field: format!("metadata.{}", key),
                        limit: PROVENANCE_METADATA_MAX_VALUE_CHARS,
                        actual: len,
                    });
                }
            }
            _ => {
                return Err(ValidationError::InvalidValue {
                    field: format!("metadata.{}", key),
                    reason: "only scalar values are allowed".to_string(),
                })
            }
        }
        self.0.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Who/how/when a piece of data entered the system. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Provenance {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub provenance_id: ProvenanceId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub data_source_id: DataSourceId,
    pub method: CaptureMethod,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub captured_at: Timestamp,
    pub metadata: ProvenanceMetadata,
}

impl Provenance {
    pub fn new(
        data_source_id: DataSourceId,
        method: CaptureMethod,
        metadata: ProvenanceMetadata,
    ) -> Self {
        Self {
            provenance_id: ProvenanceId::now_v7(),
            data_source_id,
            method,
            captured_at: Utc::now(),
            metadata,
        }
    }
}

// ============================================================================
// CONSENT
// ============================================================================

/// Long-lived consent agreement, one per `(user, scope)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConsentAgreement {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub consent_agreement_id: ConsentAgreementId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: UserId,
    pub scope: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl ConsentAgreement {
    pub fn new(user_id: UserId, scope: impl Into<String>) -> Self {
        Self {
            consent_agreement_id: ConsentAgreementId::now_v7(),
            user_id,
            scope: scope.into(),
            created_at: Utc::now(),
        }
    }
}

/// Capabilities granted by the default consent snapshot.
pub fn default_consent_permissions() -> BTreeMap<String, bool> {
    BTreeMap::from([
        ("store_records".to_string(), true),
        ("share_with_providers".to_string(), false),
        ("research_use".to_string(), false),
    ])
}

/// Immutable grant of permissions at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConsentSnapshot {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub consent_snapshot_id: ConsentSnapshotId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub consent_agreement_id: ConsentAgreementId,
    pub permissions: BTreeMap<String, bool>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl ConsentSnapshot {
    pub fn new(
        consent_agreement_id: ConsentAgreementId,
        permissions: BTreeMap<String, bool>,
    ) -> Self {
        Self {
            consent_snapshot_id: ConsentSnapshotId::now_v7(),
            consent_agreement_id,
            permissions,
            created_at: Utc::now(),
        }
    }

    pub fn allows(&self, capability: &str) -> bool {
        self.permissions.get(capability).copied().unwrap_or(false)
    }
}

// ============================================================================
// TIMELINE EVENT
// ============================================================================

/// Immutable, provenance-tagged, consent-scoped health event.
///
/// Never updated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TimelineEvent {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub event_id: EventId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: UserId,
    /// When it happened, as reported by the user or source.
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub event_time: Timestamp,
    pub title: Option<String>,
    pub summary: String,
    #[serde(flatten)]
    pub details: EventDetails,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub provenance_id: ProvenanceId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub consent_snapshot_id: ConsentSnapshotId,
    /// When the record was filed.
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl TimelineEvent {
    pub fn event_type(&self) -> EventType {
        self.details.event_type()
    }
}

/// An event that has not been appended yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTimelineEvent {
    pub user_id: UserId,
    pub event_time: Timestamp,
    pub title: Option<String>,
    pub summary: String,
    pub details: EventDetails,
    pub provenance_id: ProvenanceId,
    pub consent_snapshot_id: ConsentSnapshotId,
}

impl NewTimelineEvent {
    /// Stamp the event with a fresh id and filing time.
    pub fn into_event(self) -> TimelineEvent {
        TimelineEvent {
            event_id: EventId::now_v7(),
            user_id: self.user_id,
            event_time: self.event_time,
            title: self.title,
            summary: self.summary,
            details: self.details,
            provenance_id: self.provenance_id,
            consent_snapshot_id: self.consent_snapshot_id,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// DOCUMENT ARTIFACT
// ============================================================================

/// Metadata describing a blob held in external storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DocumentArtifact {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub document_id: DocumentId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: UserId,
    pub title: Option<String>,
    pub doc_type: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub occurred_at: Option<Timestamp>,
    /// Never exposed to unauthenticated callers.
    pub storage_path: String,
    pub content_type: String,
    pub file_size: Option<u64>,
    pub original_filename: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub provenance_id: ProvenanceId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

// ============================================================================
// AUDIT
// ============================================================================

/// Coarse user action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    JournalCreated,
    DocumentUploaded,
    DocumentDownloaded,
    EventAmended,
    VisitSummaryCreated,
    ExternalImported,
    SourceConnected,
    SyncRequested,
    SyncCompleted,
    SyncFailed,
}

impl AuditAction {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AuditAction::JournalCreated => "journal_created",
            AuditAction::DocumentUploaded => "document_uploaded",
            AuditAction::DocumentDownloaded => "document_downloaded",
            AuditAction::EventAmended => "event_amended",
            AuditAction::VisitSummaryCreated => "visit_summary_created",
            AuditAction::ExternalImported => "external_imported",
            AuditAction::SourceConnected => "source_connected",
            AuditAction::SyncRequested => "sync_requested",
            AuditAction::SyncCompleted => "sync_completed",
            AuditAction::SyncFailed => "sync_failed",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Metadata-only audit record. Never references event content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AuditEvent {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub audit_event_id: AuditEventId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: UserId,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl AuditEvent {
    pub fn new(
        user_id: UserId,
        action: AuditAction,
        entity_type: EntityType,
        entity_id: impl Into<Uuid>,
    ) -> Self {
        Self {
            audit_event_id: AuditEventId::now_v7(),
            user_id,
            action,
            entity_type,
            entity_id: entity_id.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// JOBS
// ============================================================================

/// Kind of asynchronous work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SourceSync,
}

impl JobType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobType::SourceSync => "source_sync",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Asynchronous work request, unique per `(user_id, idempotency_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Job {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub job_id: JobId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: UserId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub idempotency_key: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    pub error_code: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Job {
    pub fn new(
        user_id: UserId,
        job_type: JobType,
        idempotency_key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::now_v7(),
            user_id,
            job_type,
            status: JobStatus::Pending,
            idempotency_key: idempotency_key.into(),
            payload,
            error_code: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JournalCategory, JournalDetails};

    #[test]
    fn test_internal_source_starts_active() {
        let source = DataSource::new(UserId::now_v7(), SourceKind::Manual, "User Journal");
        assert_eq!(source.status, SourceStatus::Active);
        assert_eq!(source.connection_state, ConnectionState::Disconnected);
        assert_eq!(source.last_sync_status, SyncStatus::Never);
    }

    #[test]
    fn test_external_source_starts_pending() {
        let source = DataSource::new(UserId::now_v7(), SourceKind::Portal, "Portal")
            .with_provider("fasten");
        assert_eq!(source.status, SourceStatus::Pending);
        assert_eq!(source.connection_state, ConnectionState::Disconnected);
        assert_eq!(source.provider.as_deref(), Some("fasten"));
    }

    #[test]
    fn test_provenance_metadata_rejects_unknown_keys() {
        let err = ProvenanceMetadata::new()
            .with("symptom_text", "felt dizzy")
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { .. }));
    }

    #[test]
    fn test_provenance_metadata_rejects_nested_values() {
        let err = ProvenanceMetadata::new()
            .with("source", serde_json::json!({ "nested": true }))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { .. }));
    }

    #[test]
    fn test_provenance_metadata_rejects_long_strings() {
        let err = ProvenanceMetadata::new()
            .with("client", "x".repeat(PROVENANCE_METADATA_MAX_VALUE_CHARS + 1))
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { .. }));
    }

    #[test]
    fn test_provenance_metadata_accepts_scalars() {
        let metadata = ProvenanceMetadata::new()
            .with("source", "journal")
            .unwrap()
            .with("record_count", 4)
            .unwrap()
            .with("reason_present", true)
            .unwrap();
        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata.get("record_count"), Some(&serde_json::json!(4)));
    }

    #[test]
    fn test_default_consent_allows_storage_only() {
        let snapshot =
            ConsentSnapshot::new(ConsentAgreementId::now_v7(), default_consent_permissions());
        assert!(snapshot.allows("store_records"));
        assert!(!snapshot.allows("research_use"));
        assert!(!snapshot.allows("unknown_capability"));
    }

    #[test]
    fn test_timeline_event_json_shape() {
        let event = NewTimelineEvent {
            user_id: UserId::nil(),
            event_time: Utc::now(),
            title: None,
            summary: "felt dizzy".to_string(),
            details: EventDetails::JournalEntry(JournalDetails {
                text: "felt dizzy".to_string(),
                category: JournalCategory::Symptom,
            }),
            provenance_id: ProvenanceId::nil(),
            consent_snapshot_id: ConsentSnapshotId::nil(),
        }
        .into_event();

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "journal_entry");
        assert_eq!(value["details"]["category"], "symptom");

        let back: TimelineEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_audit_action_db_str() {
        assert_eq!(AuditAction::JournalCreated.to_string(), "journal_created");
    }
}
