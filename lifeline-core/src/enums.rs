//! Enum types for Lifeline entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// STRING CONVERSIONS
// ============================================================================

fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Error when parsing an enum from its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub type_name: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.type_name, self.value)
    }
}

impl std::error::Error for EnumParseError {}

/// Wires `Display` and `FromStr` to an enum's `as_db_str` / `from_db_str` pair.
macro_rules! db_str_conversions {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_db_str())
            }
        }

        impl FromStr for $ty {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_db_str(s)
            }
        }
    };
}

// ============================================================================
// ENTITY TYPE
// ============================================================================

/// Entity type discriminator for polymorphic references and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    DataSource,
    Provenance,
    ConsentAgreement,
    ConsentSnapshot,
    TimelineEvent,
    DocumentArtifact,
    AuditEvent,
    Job,
}

impl EntityType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EntityType::DataSource => "data_source",
            EntityType::Provenance => "provenance",
            EntityType::ConsentAgreement => "consent_agreement",
            EntityType::ConsentSnapshot => "consent_snapshot",
            EntityType::TimelineEvent => "timeline_event",
            EntityType::DocumentArtifact => "document_artifact",
            EntityType::AuditEvent => "audit_event",
            EntityType::Job => "job",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "datasource" => Ok(EntityType::DataSource),
            "provenance" => Ok(EntityType::Provenance),
            "consentagreement" => Ok(EntityType::ConsentAgreement),
            "consentsnapshot" => Ok(EntityType::ConsentSnapshot),
            "timelineevent" | "event" => Ok(EntityType::TimelineEvent),
            "documentartifact" | "document" => Ok(EntityType::DocumentArtifact),
            "auditevent" => Ok(EntityType::AuditEvent),
            "job" => Ok(EntityType::Job),
            _ => Err(EnumParseError {
                type_name: "EntityType",
                value: s.to_string(),
            }),
        }
    }
}

db_str_conversions!(EntityType);

// ============================================================================
// DATA SOURCES
// ============================================================================

/// Logical origin of health data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Manual,
    Upload,
    Portal,
    ExternalApi,
    Device,
}

impl SourceKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SourceKind::Manual => "manual",
            SourceKind::Upload => "upload",
            SourceKind::Portal => "portal",
            SourceKind::ExternalApi => "external_api",
            SourceKind::Device => "device",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "manual" => Ok(SourceKind::Manual),
            "upload" => Ok(SourceKind::Upload),
            "portal" => Ok(SourceKind::Portal),
            "externalapi" => Ok(SourceKind::ExternalApi),
            "device" => Ok(SourceKind::Device),
            _ => Err(EnumParseError {
                type_name: "SourceKind",
                value: s.to_string(),
            }),
        }
    }

    /// Whether sources of this kind talk to an external system and therefore
    /// carry a connection state machine.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            SourceKind::Portal | SourceKind::ExternalApi | SourceKind::Device
        )
    }
}

db_str_conversions!(SourceKind);

/// Lifecycle status of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Inactive,
    Pending,
}

impl SourceStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Inactive => "inactive",
            SourceStatus::Pending => "pending",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "active" => Ok(SourceStatus::Active),
            "inactive" => Ok(SourceStatus::Inactive),
            "pending" => Ok(SourceStatus::Pending),
            _ => Err(EnumParseError {
                type_name: "SourceStatus",
                value: s.to_string(),
            }),
        }
    }
}

db_str_conversions!(SourceStatus);

/// Connection state of an externally-connected data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "disconnected" => Ok(ConnectionState::Disconnected),
            "connected" => Ok(ConnectionState::Connected),
            "error" => Ok(ConnectionState::Error),
            _ => Err(EnumParseError {
                type_name: "ConnectionState",
                value: s.to_string(),
            }),
        }
    }
}

db_str_conversions!(ConnectionState);

/// Actions a client may request against a data source connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ConnectionAction {
    Connect,
    Sync,
    Retry,
}

impl ConnectionAction {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ConnectionAction::Connect => "connect",
            ConnectionAction::Sync => "sync",
            ConnectionAction::Retry => "retry",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "connect" => Ok(ConnectionAction::Connect),
            "sync" => Ok(ConnectionAction::Sync),
            "retry" => Ok(ConnectionAction::Retry),
            _ => Err(EnumParseError {
                type_name: "ConnectionAction",
                value: s.to_string(),
            }),
        }
    }
}

db_str_conversions!(ConnectionAction);

/// Outcome of the most recent sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Never,
    Ok,
    Error,
}

impl SyncStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SyncStatus::Never => "never",
            SyncStatus::Ok => "ok",
            SyncStatus::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "never" => Ok(SyncStatus::Never),
            "ok" | "success" => Ok(SyncStatus::Ok),
            "error" | "failed" => Ok(SyncStatus::Error),
            _ => Err(EnumParseError {
                type_name: "SyncStatus",
                value: s.to_string(),
            }),
        }
    }
}

db_str_conversions!(SyncStatus);

// ============================================================================
// PROVENANCE
// ============================================================================

/// How a piece of data entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    ManualEntry,
    Upload,
    PortalImport,
    ManualAmendment,
}

impl CaptureMethod {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CaptureMethod::ManualEntry => "manual_entry",
            CaptureMethod::Upload => "upload",
            CaptureMethod::PortalImport => "portal_import",
            CaptureMethod::ManualAmendment => "manual_amendment",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "manualentry" => Ok(CaptureMethod::ManualEntry),
            "upload" => Ok(CaptureMethod::Upload),
            "portalimport" => Ok(CaptureMethod::PortalImport),
            "manualamendment" => Ok(CaptureMethod::ManualAmendment),
            _ => Err(EnumParseError {
                type_name: "CaptureMethod",
                value: s.to_string(),
            }),
        }
    }
}

db_str_conversions!(CaptureMethod);

// ============================================================================
// TIMELINE EVENTS
// ============================================================================

/// Discriminator of a timeline event. Mirrors the variants of
/// [`EventDetails`](crate::EventDetails).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JournalEntry,
    DocumentUploaded,
    EventAmended,
    VisitSummary,
    ExternalEvent,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::JournalEntry,
        EventType::DocumentUploaded,
        EventType::EventAmended,
        EventType::VisitSummary,
        EventType::ExternalEvent,
    ];

    pub fn as_db_str(&self) -> &'static str {
        match self {
            EventType::JournalEntry => "journal_entry",
            EventType::DocumentUploaded => "document_uploaded",
            EventType::EventAmended => "event_amended",
            EventType::VisitSummary => "visit_summary",
            EventType::ExternalEvent => "external_event",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "journalentry" => Ok(EventType::JournalEntry),
            "documentuploaded" => Ok(EventType::DocumentUploaded),
            "eventamended" => Ok(EventType::EventAmended),
            "visitsummary" => Ok(EventType::VisitSummary),
            "externalevent" => Ok(EventType::ExternalEvent),
            _ => Err(EnumParseError {
                type_name: "EventType",
                value: s.to_string(),
            }),
        }
    }

    /// Only user-authored records can be corrected. Amendments, visit
    /// summaries and imported records are not amendable.
    pub fn is_amendable(&self) -> bool {
        matches!(self, EventType::JournalEntry | EventType::DocumentUploaded)
    }

    /// Timeline category this event type is listed under.
    pub fn category(&self) -> TimelineCategory {
        match self {
            EventType::JournalEntry => TimelineCategory::Journal,
            EventType::DocumentUploaded => TimelineCategory::Documents,
            EventType::EventAmended => TimelineCategory::Amendments,
            EventType::VisitSummary => TimelineCategory::Visits,
            EventType::ExternalEvent => TimelineCategory::External,
        }
    }
}

db_str_conversions!(EventType);

/// User-facing grouping of timeline events used by list filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TimelineCategory {
    Journal,
    Documents,
    Amendments,
    Visits,
    External,
}

impl TimelineCategory {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TimelineCategory::Journal => "journal",
            TimelineCategory::Documents => "documents",
            TimelineCategory::Amendments => "amendments",
            TimelineCategory::Visits => "visits",
            TimelineCategory::External => "external",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "journal" => Ok(TimelineCategory::Journal),
            "documents" | "document" => Ok(TimelineCategory::Documents),
            "amendments" | "amendment" => Ok(TimelineCategory::Amendments),
            "visits" | "visit" => Ok(TimelineCategory::Visits),
            "external" | "imports" => Ok(TimelineCategory::External),
            _ => Err(EnumParseError {
                type_name: "TimelineCategory",
                value: s.to_string(),
            }),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            TimelineCategory::Journal => EventType::JournalEntry,
            TimelineCategory::Documents => EventType::DocumentUploaded,
            TimelineCategory::Amendments => EventType::EventAmended,
            TimelineCategory::Visits => EventType::VisitSummary,
            TimelineCategory::External => EventType::ExternalEvent,
        }
    }
}

db_str_conversions!(TimelineCategory);

/// Category a user picks when writing a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum JournalCategory {
    Symptom,
    Medication,
    Appointment,
    Mood,
    #[default]
    Note,
}

impl JournalCategory {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JournalCategory::Symptom => "symptom",
            JournalCategory::Medication => "medication",
            JournalCategory::Appointment => "appointment",
            JournalCategory::Mood => "mood",
            JournalCategory::Note => "note",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "symptom" | "symptoms" => Ok(JournalCategory::Symptom),
            "medication" | "medications" => Ok(JournalCategory::Medication),
            "appointment" => Ok(JournalCategory::Appointment),
            "mood" => Ok(JournalCategory::Mood),
            "note" | "general" => Ok(JournalCategory::Note),
            _ => Err(EnumParseError {
                type_name: "JournalCategory",
                value: s.to_string(),
            }),
        }
    }
}

db_str_conversions!(JournalCategory);

/// Sort direction on `event_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

// ============================================================================
// JOBS
// ============================================================================

/// Status of an asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "complete" | "completed" => Ok(JobStatus::Complete),
            "failed" | "failure" => Ok(JobStatus::Failed),
            _ => Err(EnumParseError {
                type_name: "JobStatus",
                value: s.to_string(),
            }),
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Whether `self -> next` is a legal job transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Complete)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

db_str_conversions!(JobStatus);
