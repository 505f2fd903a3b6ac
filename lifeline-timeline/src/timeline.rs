//! Write protocol facade.
//!
//! Every user-facing write follows the same sequence: validate the input,
//! resolve the data source, record provenance, resolve the consent snapshot,
//! append the event, then flush the audit outbox. Audit failures never fail
//! the write.

use crate::amendment::{AmendmentResolver, CurrentViewPage};
use crate::audit::{AuditOutbox, AuditTrail};
use crate::consent::ConsentStore;
use crate::event_log::{EventIter, EventLog};
use crate::import::{DemoImportSource, ImportSource};
use crate::jobs::JobQueue;
use crate::provenance::ProvenanceLedger;
use crate::sources::DataSourceRegistry;
use chrono::Utc;
use lifeline_core::{
    truncate_summary, AmendmentDetails, AmendmentPatch, AuditAction, AuditEvent, CaptureMethod,
    CurrentView, DataSource, DataSourceId, EntityType, EventDetails, EventFilter, EventId,
    EventPage, EventQuery, JournalCategory, JournalDetails, LifelineResult, NewTimelineEvent,
    ProvenanceMetadata, SortOrder, SourceKind, TimelineConfig, TimelineEvent, Timestamp, UserId,
    ValidationError, VisitSummaryDetails, AMENDMENT_SOURCE_NAME, JOURNAL_SOURCE_NAME,
    VISIT_SOURCE_NAME,
};
use lifeline_storage::{BlobStore, StorageTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// INPUTS
// ============================================================================

/// A journal entry as submitted by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryInput {
    pub text: String,
    #[serde(default)]
    pub category: JournalCategory,
    pub title: Option<String>,
    /// When it happened. Defaults to now.
    pub event_time: Option<Timestamp>,
}

impl JournalEntryInput {
    pub fn new(text: impl Into<String>, category: JournalCategory) -> Self {
        Self {
            text: text.into(),
            category,
            title: None,
            event_time: None,
        }
    }

    pub fn at(mut self, event_time: Timestamp) -> Self {
        self.event_time = Some(event_time);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendmentInput {
    pub target: EventId,
    pub patch: AmendmentPatch,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitSummaryInput {
    pub title: Option<String>,
    pub provider_name: Option<String>,
    pub notes: Option<String>,
    pub event_time: Option<Timestamp>,
    #[serde(default)]
    pub referenced_event_ids: Vec<EventId>,
}

const VISIT_SUMMARY_FALLBACK_TITLE: &str = "Visit summary";

// ============================================================================
// TIMELINE
// ============================================================================

/// Entry point for every timeline operation. All operations take the acting
/// user explicitly.
pub struct Timeline<S, B> {
    pub(crate) storage: Arc<S>,
    pub(crate) blobs: Arc<B>,
    pub(crate) importer: Arc<dyn ImportSource>,
    pub(crate) config: TimelineConfig,
    pub(crate) sources: DataSourceRegistry<S>,
    pub(crate) provenance: ProvenanceLedger<S>,
    pub(crate) consent: ConsentStore<S>,
    pub(crate) log: EventLog<S>,
    pub(crate) amendments: AmendmentResolver<S>,
    pub(crate) audit: AuditTrail<S>,
    pub(crate) jobs: JobQueue<S>,
}

impl<S, B> Clone for Timeline<S, B> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            blobs: Arc::clone(&self.blobs),
            importer: Arc::clone(&self.importer),
            config: self.config.clone(),
            sources: self.sources.clone(),
            provenance: self.provenance.clone(),
            consent: self.consent.clone(),
            log: self.log.clone(),
            amendments: self.amendments.clone(),
            audit: self.audit.clone(),
            jobs: self.jobs.clone(),
        }
    }
}

impl<S: StorageTrait, B: BlobStore> Timeline<S, B> {
    /// Build a timeline over the given stores. Imports use the demo source
    /// until [`Timeline::with_import_source`] replaces it.
    pub fn new(storage: Arc<S>, blobs: Arc<B>, config: TimelineConfig) -> Self {
        let log = EventLog::new(Arc::clone(&storage), &config);
        Self {
            sources: DataSourceRegistry::new(Arc::clone(&storage)),
            provenance: ProvenanceLedger::new(Arc::clone(&storage)),
            consent: ConsentStore::new(Arc::clone(&storage), config.consent_scope.as_str()),
            amendments: AmendmentResolver::new(Arc::clone(&storage), log.clone(), &config),
            audit: AuditTrail::new(Arc::clone(&storage), &config),
            jobs: JobQueue::new(Arc::clone(&storage)),
            log,
            importer: Arc::new(DemoImportSource),
            storage,
            blobs,
            config,
        }
    }

    pub fn with_import_source(mut self, importer: Arc<dyn ImportSource>) -> Self {
        self.importer = importer;
        self
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn blobs(&self) -> &Arc<B> {
        &self.blobs
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Record a free-text journal entry. The summary is the text truncated to
    /// the configured length.
    pub fn record_journal_entry(
        &self,
        user_id: UserId,
        input: JournalEntryInput,
    ) -> LifelineResult<EventId> {
        if input.text.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "text".to_string(),
            }
            .into());
        }

        let source =
            self.sources
                .get_or_create(user_id, SourceKind::Manual, JOURNAL_SOURCE_NAME, None)?;
        let metadata = ProvenanceMetadata::new().with("source", "journal")?;
        let provenance = self.provenance.record(
            user_id,
            source.data_source_id,
            CaptureMethod::ManualEntry,
            metadata,
        )?;
        let snapshot = self.consent.current_snapshot(user_id)?;

        let event = self.log.append(NewTimelineEvent {
            user_id,
            event_time: input.event_time.unwrap_or_else(Utc::now),
            title: input.title,
            summary: truncate_summary(&input.text, self.config.summary_max_chars),
            details: EventDetails::JournalEntry(JournalDetails {
                text: input.text,
                category: input.category,
            }),
            provenance_id: provenance.provenance_id,
            consent_snapshot_id: snapshot.consent_snapshot_id,
        })?;

        self.commit_audit(user_id, AuditAction::JournalCreated, &event);
        Ok(event.event_id)
    }

    /// File a correction against a journal entry or document event.
    ///
    /// The target is never modified. The target and patch are checked before
    /// anything is written.
    pub fn amend_event(&self, user_id: UserId, input: AmendmentInput) -> LifelineResult<EventId> {
        if input.patch.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "patch".to_string(),
            }
            .into());
        }
        let target = self.amendments.amendable_target(user_id, input.target)?;
        check_patch_applies(&target, &input.patch)?;

        let source =
            self.sources
                .get_or_create(user_id, SourceKind::Manual, AMENDMENT_SOURCE_NAME, None)?;
        let metadata = ProvenanceMetadata::new()
            .with("amends_event_id", target.event_id.to_string())?
            .with("reason_present", input.reason.is_some())?;
        let provenance = self.provenance.record(
            user_id,
            source.data_source_id,
            CaptureMethod::ManualAmendment,
            metadata,
        )?;
        let snapshot = self.consent.current_snapshot(user_id)?;

        let summary = format!("Amended {}", target.event_type());
        let event = self.log.append(NewTimelineEvent {
            user_id,
            event_time: Utc::now(),
            title: None,
            summary: truncate_summary(&summary, self.config.summary_max_chars),
            details: EventDetails::EventAmended(AmendmentDetails {
                amends_event_id: target.event_id,
                patch: input.patch,
                reason: input.reason,
            }),
            provenance_id: provenance.provenance_id,
            consent_snapshot_id: snapshot.consent_snapshot_id,
        })?;

        self.commit_audit(user_id, AuditAction::EventAmended, &event);
        Ok(event.event_id)
    }

    /// Record a visit summary that may reference earlier events.
    pub fn create_visit_summary(
        &self,
        user_id: UserId,
        input: VisitSummaryInput,
    ) -> LifelineResult<EventId> {
        for referenced in &input.referenced_event_ids {
            self.log.get(user_id, *referenced)?;
        }

        let source =
            self.sources
                .get_or_create(user_id, SourceKind::Manual, VISIT_SOURCE_NAME, None)?;
        let metadata = ProvenanceMetadata::new()
            .with("source", "visit_summary")?
            .with("referenced_count", input.referenced_event_ids.len())?;
        let provenance = self.provenance.record(
            user_id,
            source.data_source_id,
            CaptureMethod::ManualEntry,
            metadata,
        )?;
        let snapshot = self.consent.current_snapshot(user_id)?;

        let headline = input
            .title
            .as_deref()
            .or(input.provider_name.as_deref())
            .unwrap_or(VISIT_SUMMARY_FALLBACK_TITLE);
        let event = self.log.append(NewTimelineEvent {
            user_id,
            event_time: input.event_time.unwrap_or_else(Utc::now),
            summary: truncate_summary(headline, self.config.summary_max_chars),
            title: input.title,
            details: EventDetails::VisitSummary(VisitSummaryDetails {
                referenced_event_ids: input.referenced_event_ids,
                provider_name: input.provider_name,
                notes: input.notes,
            }),
            provenance_id: provenance.provenance_id,
            consent_snapshot_id: snapshot.consent_snapshot_id,
        })?;

        self.commit_audit(user_id, AuditAction::VisitSummaryCreated, &event);
        Ok(event.event_id)
    }

    fn commit_audit(&self, user_id: UserId, action: AuditAction, event: &TimelineEvent) {
        let mut outbox = AuditOutbox::new();
        outbox.push(user_id, action, EntityType::TimelineEvent, event.event_id);
        self.audit.flush(outbox);
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn list_events(&self, user_id: UserId, query: &EventQuery) -> LifelineResult<EventPage> {
        self.log.list(user_id, query)
    }

    pub fn iter_events(&self, user_id: UserId, filter: EventFilter, order: SortOrder) -> EventIter<S> {
        self.log.iter(user_id, filter, order)
    }

    pub fn get_event(&self, user_id: UserId, id: EventId) -> LifelineResult<TimelineEvent> {
        self.log.get(user_id, id)
    }

    pub fn current_view(&self, user_id: UserId, id: EventId) -> LifelineResult<CurrentView> {
        self.amendments.current_view(user_id, id)
    }

    pub fn list_current_views(
        &self,
        user_id: UserId,
        query: &EventQuery,
    ) -> LifelineResult<CurrentViewPage> {
        self.amendments.list_current_views(user_id, query)
    }

    pub fn list_sources(&self, user_id: UserId) -> LifelineResult<Vec<DataSource>> {
        self.sources.list(user_id)
    }

    pub fn get_source(&self, user_id: UserId, id: DataSourceId) -> LifelineResult<DataSource> {
        self.sources.get(user_id, id)
    }

    /// Newest audit records, capped at the configured limit.
    pub fn recent_audit(&self, user_id: UserId, limit: Option<usize>) -> LifelineResult<Vec<AuditEvent>> {
        self.audit.recent(user_id, limit)
    }
}

/// Reject patch fields that have no meaning for the target's event type.
fn check_patch_applies(target: &TimelineEvent, patch: &AmendmentPatch) -> Result<(), ValidationError> {
    let not_applicable = |field: &str| ValidationError::InvalidValue {
        field: format!("patch.{field}"),
        reason: format!("not applicable to {}", target.event_type()),
    };
    match &target.details {
        EventDetails::JournalEntry(_) => {
            if patch.doc_type.is_some() {
                return Err(not_applicable("doc_type"));
            }
            if patch.notes.is_some() {
                return Err(not_applicable("notes"));
            }
        }
        EventDetails::DocumentUploaded(_) => {
            if patch.text.is_some() {
                return Err(not_applicable("text"));
            }
            if patch.category.is_some() {
                return Err(not_applicable("category"));
            }
        }
        EventDetails::EventAmended(_)
        | EventDetails::VisitSummary(_)
        | EventDetails::ExternalEvent(_) => {}
    }
    Ok(())
}
