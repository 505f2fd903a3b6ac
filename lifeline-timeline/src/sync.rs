//! Connection state machine driver, external imports and sync jobs.

use crate::audit::AuditOutbox;
use crate::import::ImportRecord;
use crate::jobs::error_code;
use crate::timeline::Timeline;
use chrono::Utc;
use lifeline_core::{
    check_action, truncate_summary, AuditAction, AuditEvent, CaptureMethod, ConnectionAction,
    ConnectionState, DataSource, DataSourceId, DomainError, EntityType, EventDetails, EventId,
    ExternalDetails, Job, JobId, JobType, LifelineResult, NewTimelineEvent, ProvenanceMetadata,
    SourceKind, SourceStatus, SyncOutcome, SyncStatus, UserId, ValidationError,
    DEMO_PORTAL_PROVIDER, DEMO_PORTAL_SOURCE_NAME,
};
use lifeline_storage::{BlobStore, ConnectionUpdate, StorageTrait};
use serde_json::json;

const INVALID_JOB_PAYLOAD: &str = "invalid_payload";

impl<S: StorageTrait, B: BlobStore> Timeline<S, B> {
    // ========================================================================
    // CONNECTION STATE MACHINE
    // ========================================================================

    /// Validate `action` against the source's current state. A rejected
    /// action changes nothing.
    fn require_action(&self, source: &DataSource, action: ConnectionAction) -> LifelineResult<()> {
        check_action(source, action).map_err(|e| {
            tracing::warn!(
                user_id = %source.user_id,
                data_source_id = %source.data_source_id,
                state = %source.connection_state,
                action = %action,
                error = %e,
                "Rejected connection action"
            );
            e
        })?;
        Ok(())
    }

    /// `disconnected -> connected`. Does not sync.
    pub fn connect_source(&self, user_id: UserId, id: DataSourceId) -> LifelineResult<DataSource> {
        let source = self.sources.get(user_id, id)?;
        self.require_action(&source, ConnectionAction::Connect)?;

        let source = self.sources.update_connection(
            user_id,
            id,
            ConnectionUpdate {
                status: Some(SourceStatus::Active),
                connection_state: Some(ConnectionState::Connected),
                ..Default::default()
            },
        )?;
        self.audit.record(&AuditEvent::new(
            user_id,
            AuditAction::SourceConnected,
            EntityType::DataSource,
            id,
        ));
        tracing::info!(user_id = %user_id, data_source_id = %id, "Connected data source");
        Ok(source)
    }

    /// Run an import from `connected`.
    ///
    /// An import failure is not an error here: it is recorded on the source,
    /// which is returned in the `error` state.
    pub async fn sync_source(&self, user_id: UserId, id: DataSourceId) -> LifelineResult<DataSource> {
        let source = self.sources.get(user_id, id)?;
        self.require_action(&source, ConnectionAction::Sync)?;
        self.run_import(user_id, source).await
    }

    /// Re-run an import from `error`.
    pub async fn retry_source(&self, user_id: UserId, id: DataSourceId) -> LifelineResult<DataSource> {
        let source = self.sources.get(user_id, id)?;
        self.require_action(&source, ConnectionAction::Retry)?;
        self.run_import(user_id, source).await
    }

    /// Get or create the demo portal source and connect it if needed.
    pub fn connect_demo_portal(&self, user_id: UserId) -> LifelineResult<DataSource> {
        let source = self.sources.get_or_create(
            user_id,
            SourceKind::Portal,
            DEMO_PORTAL_SOURCE_NAME,
            Some(DEMO_PORTAL_PROVIDER),
        )?;
        if source.connection_state == ConnectionState::Disconnected {
            return self.connect_source(user_id, source.data_source_id);
        }
        Ok(source)
    }

    async fn run_import(&self, user_id: UserId, source: DataSource) -> LifelineResult<DataSource> {
        let outcome = match self.importer.fetch(user_id, &source).await {
            Ok(records) => match self.import_records(user_id, &source, records) {
                Ok(ids) => SyncOutcome::Succeeded {
                    imported: ids.len(),
                },
                Err(e) => {
                    tracing::warn!(user_id = %user_id, data_source_id = %source.data_source_id, error = %e, "Storing imported records failed");
                    SyncOutcome::Failed {
                        error_code: error_code(&e).to_string(),
                    }
                }
            },
            Err(failure) => SyncOutcome::Failed {
                error_code: failure.error_code,
            },
        };

        let now = Utc::now();
        let next_state = outcome.next_state();
        let (update, action) = match &outcome {
            SyncOutcome::Succeeded { imported } => {
                tracing::info!(
                    user_id = %user_id,
                    data_source_id = %source.data_source_id,
                    imported,
                    "Sync completed"
                );
                (
                    ConnectionUpdate {
                        connection_state: Some(next_state),
                        last_sync_at: Some(now),
                        last_sync_status: Some(SyncStatus::Ok),
                        last_error_code: Some(None),
                        ..Default::default()
                    },
                    AuditAction::SyncCompleted,
                )
            }
            SyncOutcome::Failed { error_code } => {
                tracing::warn!(
                    user_id = %user_id,
                    data_source_id = %source.data_source_id,
                    error_code = %error_code,
                    "Sync failed"
                );
                (
                    ConnectionUpdate {
                        connection_state: Some(next_state),
                        last_sync_status: Some(SyncStatus::Error),
                        last_error_code: Some(Some(error_code.clone())),
                        last_error_at: Some(now),
                        ..Default::default()
                    },
                    AuditAction::SyncFailed,
                )
            }
        };

        let updated = self
            .sources
            .update_connection(user_id, source.data_source_id, update)?;
        self.audit.record(&AuditEvent::new(
            user_id,
            action,
            EntityType::DataSource,
            source.data_source_id,
        ));
        Ok(updated)
    }

    // ========================================================================
    // EXTERNAL IMPORT
    // ========================================================================

    /// Append one `external_event` per record under a single shared
    /// provenance. The batch is written whole or not at all.
    pub fn import_external_batch(
        &self,
        user_id: UserId,
        source_id: DataSourceId,
        records: Vec<ImportRecord>,
    ) -> LifelineResult<Vec<EventId>> {
        let source = self.sources.get(user_id, source_id)?;
        if !source.kind.is_external() {
            return Err(DomainError::NotExternalSource { kind: source.kind }.into());
        }
        self.import_records(user_id, &source, records)
    }

    fn import_records(
        &self,
        user_id: UserId,
        source: &DataSource,
        records: Vec<ImportRecord>,
    ) -> LifelineResult<Vec<EventId>> {
        for (i, record) in records.iter().enumerate() {
            if record.summary.trim().is_empty() {
                return Err(ValidationError::RequiredFieldMissing {
                    field: format!("records[{i}].summary"),
                }
                .into());
            }
            if record.category.trim().is_empty() {
                return Err(ValidationError::RequiredFieldMissing {
                    field: format!("records[{i}].category"),
                }
                .into());
            }
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let origin = source
            .provider
            .clone()
            .unwrap_or_else(|| source.kind.to_string());
        let metadata = ProvenanceMetadata::new()
            .with("source", origin.as_str())?
            .with("record_count", records.len())?;
        let provenance = self.provenance.record(
            user_id,
            source.data_source_id,
            CaptureMethod::PortalImport,
            metadata,
        )?;
        let snapshot = self.consent.current_snapshot(user_id)?;
        let is_demo = self.importer.is_demo();

        let batch = records
            .into_iter()
            .map(|record| NewTimelineEvent {
                user_id,
                event_time: record.occurred_at,
                title: Some(record.title),
                summary: truncate_summary(&record.summary, self.config.summary_max_chars),
                details: EventDetails::ExternalEvent(ExternalDetails {
                    source: origin.clone(),
                    resource_category: record.category,
                    provider_name: record.provider_name,
                    is_demo,
                }),
                provenance_id: provenance.provenance_id,
                consent_snapshot_id: snapshot.consent_snapshot_id,
            })
            .collect();
        let events = self.log.append_batch(batch)?;

        let mut outbox = AuditOutbox::new();
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            outbox.push(
                user_id,
                AuditAction::ExternalImported,
                EntityType::TimelineEvent,
                event.event_id,
            );
            ids.push(event.event_id);
        }
        self.audit.flush(outbox);

        tracing::debug!(user_id = %user_id, data_source_id = %source.data_source_id, count = ids.len(), "Imported external records");
        Ok(ids)
    }

    // ========================================================================
    // SYNC JOBS
    // ========================================================================

    /// File a sync request as a pending job and return immediately.
    ///
    /// Requests are keyed by the source and the times of its last success and
    /// last failure, so repeats coalesce into one job until an attempt
    /// finishes.
    pub fn request_sync(&self, user_id: UserId, source_id: DataSourceId) -> LifelineResult<Job> {
        let source = self.sources.get(user_id, source_id)?;
        self.require_action(&source, attempt_action(source.connection_state))?;

        let payload = json!({
            "data_source_id": source_id.to_string(),
            "last_sync_at": source.last_sync_at,
            "last_error_at": source.last_error_at,
        });
        let (job, created) = self.jobs.enqueue(user_id, JobType::SourceSync, payload)?;
        if created {
            self.audit.record(&AuditEvent::new(
                user_id,
                AuditAction::SyncRequested,
                EntityType::Job,
                job.job_id,
            ));
        }
        Ok(job)
    }

    /// Claim a pending job and run it to `complete` or `failed`.
    pub async fn run_job(&self, user_id: UserId, job_id: JobId) -> LifelineResult<Job> {
        let job = self.jobs.start(user_id, job_id)?;
        match job.job_type {
            JobType::SourceSync => {
                let Some(source_id) = job
                    .payload
                    .get("data_source_id")
                    .and_then(serde_json::Value::as_str)
                    .and_then(|s| s.parse::<DataSourceId>().ok())
                else {
                    return self.jobs.fail(user_id, job_id, INVALID_JOB_PAYLOAD);
                };

                match self.sync_for_job(user_id, source_id).await {
                    Ok(source) if source.connection_state == ConnectionState::Connected => {
                        self.jobs.complete(user_id, job_id)
                    }
                    Ok(source) => {
                        let code = source.last_error_code.as_deref().unwrap_or("import_failed");
                        self.jobs.fail(user_id, job_id, code)
                    }
                    Err(e) => self.jobs.fail(user_id, job_id, error_code(&e)),
                }
            }
        }
    }

    async fn sync_for_job(&self, user_id: UserId, source_id: DataSourceId) -> LifelineResult<DataSource> {
        let source = self.sources.get(user_id, source_id)?;
        self.require_action(&source, attempt_action(source.connection_state))?;
        self.run_import(user_id, source).await
    }

    pub fn get_job(&self, user_id: UserId, job_id: JobId) -> LifelineResult<Job> {
        self.jobs.get(user_id, job_id)
    }
}

/// The import action valid from `state`: retry after an error, sync otherwise.
fn attempt_action(state: ConnectionState) -> ConnectionAction {
    match state {
        ConnectionState::Error => ConnectionAction::Retry,
        ConnectionState::Connected | ConnectionState::Disconnected => ConnectionAction::Sync,
    }
}
