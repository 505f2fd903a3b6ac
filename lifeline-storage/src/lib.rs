//! Lifeline Storage - Storage Trait and Mock Implementation
//!
//! Defines the storage abstraction for Lifeline entities. Every read is
//! scoped by the owning user, and the ledger tables (events, provenance,
//! consent, documents, audit) expose insert and read only.

pub mod blob;

pub use blob::{
    random_blob_id, sanitize_filename, storage_path, BlobStore, InMemoryBlobStore, StoredBlob,
};

use lifeline_core::{
    latest_first, timeline_order, AuditEvent, ConflictError, ConnectionState, ConsentAgreement,
    ConsentAgreementId, ConsentSnapshot, ConsentSnapshotId, DataSource, DataSourceId,
    DocumentArtifact, DocumentId, EntityType, EventId, EventQuery, Job, JobId, JobStatus,
    LifelineError, LifelineResult, Provenance, ProvenanceId, SourceKey, SourceKind, SourceStatus,
    StorageError, SyncStatus, TimelineEvent, Timestamp, UserId,
};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Update payload for data source connection fields. `None` leaves a field
/// unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionUpdate {
    pub status: Option<SourceStatus>,
    pub connection_state: Option<ConnectionState>,
    pub last_sync_at: Option<Timestamp>,
    pub last_sync_status: Option<SyncStatus>,
    /// `Some(None)` clears the recorded error code.
    pub last_error_code: Option<Option<String>>,
    pub last_error_at: Option<Timestamp>,
}

impl ConnectionUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(self, source: &mut DataSource) {
        if let Some(status) = self.status {
            source.status = status;
        }
        if let Some(state) = self.connection_state {
            source.connection_state = state;
        }
        if let Some(at) = self.last_sync_at {
            source.last_sync_at = Some(at);
        }
        if let Some(sync_status) = self.last_sync_status {
            source.last_sync_status = sync_status;
        }
        if let Some(code) = self.last_error_code {
            source.last_error_code = code;
        }
        if let Some(at) = self.last_error_at {
            source.last_error_at = Some(at);
        }
    }
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage trait for Lifeline entities.
///
/// Implementations must enforce the natural-key uniqueness constraints
/// atomically and report violations as [`LifelineError::Conflict`].
/// Records owned by another user are reported exactly like absent ones.
pub trait StorageTrait: Send + Sync {
    // === Data Source Operations ===

    /// Insert a data source. Conflicts on `(user_id, kind, display_name)`.
    fn data_source_insert(&self, source: &DataSource) -> LifelineResult<()>;

    fn data_source_get(&self, user_id: UserId, id: DataSourceId)
        -> LifelineResult<Option<DataSource>>;

    /// Look up a data source by its natural key.
    fn data_source_find(
        &self,
        user_id: UserId,
        kind: SourceKind,
        display_name: &str,
    ) -> LifelineResult<Option<DataSource>>;

    /// All sources of a user, oldest first.
    fn data_source_list(&self, user_id: UserId) -> LifelineResult<Vec<DataSource>>;

    /// Overwrite connection fields. The only mutable state in the store.
    fn data_source_update_connection(
        &self,
        user_id: UserId,
        id: DataSourceId,
        update: ConnectionUpdate,
    ) -> LifelineResult<DataSource>;

    // === Provenance Operations ===

    fn provenance_insert(&self, provenance: &Provenance) -> LifelineResult<()>;

    /// Scoped through the owning data source.
    fn provenance_get(&self, user_id: UserId, id: ProvenanceId)
        -> LifelineResult<Option<Provenance>>;

    // === Consent Operations ===

    /// Insert a consent agreement. Conflicts on `(user_id, scope)`.
    fn consent_agreement_insert(&self, agreement: &ConsentAgreement) -> LifelineResult<()>;

    fn consent_agreement_find(
        &self,
        user_id: UserId,
        scope: &str,
    ) -> LifelineResult<Option<ConsentAgreement>>;

    fn consent_snapshot_insert(&self, snapshot: &ConsentSnapshot) -> LifelineResult<()>;

    /// Scoped through the owning agreement.
    fn consent_snapshot_get(
        &self,
        user_id: UserId,
        id: ConsentSnapshotId,
    ) -> LifelineResult<Option<ConsentSnapshot>>;

    /// Most recently created snapshot of an agreement.
    fn consent_snapshot_latest(
        &self,
        user_id: UserId,
        agreement_id: ConsentAgreementId,
    ) -> LifelineResult<Option<ConsentSnapshot>>;

    // === Timeline Event Operations ===

    fn event_insert(&self, event: &TimelineEvent) -> LifelineResult<()>;

    /// Insert every event or none of them.
    fn event_insert_batch(&self, events: &[TimelineEvent]) -> LifelineResult<()>;

    fn event_get(&self, user_id: UserId, id: EventId) -> LifelineResult<Option<TimelineEvent>>;

    /// Filtered, ordered, keyset-paged listing. `query.limit` is applied as is.
    fn event_query(&self, user_id: UserId, query: &EventQuery)
        -> LifelineResult<Vec<TimelineEvent>>;

    /// Amendments targeting `target`, latest filed first, at most `limit`.
    fn event_list_amendments(
        &self,
        user_id: UserId,
        target: EventId,
        limit: usize,
    ) -> LifelineResult<Vec<TimelineEvent>>;

    // === Document Operations ===

    fn document_insert(&self, document: &DocumentArtifact) -> LifelineResult<()>;

    /// Insert an artifact and the event that announces it as one write.
    fn document_insert_with_event(
        &self,
        document: &DocumentArtifact,
        event: &TimelineEvent,
    ) -> LifelineResult<()>;

    fn document_get(&self, user_id: UserId, id: DocumentId)
        -> LifelineResult<Option<DocumentArtifact>>;

    // === Audit Operations ===

    fn audit_insert(&self, audit: &AuditEvent) -> LifelineResult<()>;

    /// Newest first.
    fn audit_list_recent(&self, user_id: UserId, limit: usize) -> LifelineResult<Vec<AuditEvent>>;

    // === Job Operations ===

    /// Insert a job. Conflicts on `(user_id, idempotency_key)`.
    fn job_insert(&self, job: &Job) -> LifelineResult<()>;

    fn job_get(&self, user_id: UserId, id: JobId) -> LifelineResult<Option<Job>>;

    fn job_find_by_key(&self, user_id: UserId, idempotency_key: &str)
        -> LifelineResult<Option<Job>>;

    /// Compare-and-set the job status. Fails if the stored status is not
    /// `expected` or the move is not a legal job transition.
    fn job_update_status(
        &self,
        user_id: UserId,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        error_code: Option<String>,
    ) -> LifelineResult<Job>;
}

// ============================================================================
// MOCK STORAGE
// ============================================================================

/// Rows plus a unique secondary index, guarded by a single lock so the
/// uniqueness check and the insert are atomic.
#[derive(Debug)]
struct KeyedTable<I, K, V> {
    rows: HashMap<I, V>,
    keys: HashMap<K, I>,
}

impl<I, K, V> Default for KeyedTable<I, K, V> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            keys: HashMap::new(),
        }
    }
}

impl<I, K, V> KeyedTable<I, K, V>
where
    I: Copy + Eq + Hash,
    K: Eq + Hash + std::fmt::Display,
    V: Clone,
{
    fn insert(&mut self, id: I, key: K, value: &V, entity_type: EntityType) -> LifelineResult<()> {
        if self.rows.contains_key(&id) {
            return Err(already_exists(entity_type));
        }
        if self.keys.contains_key(&key) {
            return Err(LifelineError::Conflict(ConflictError {
                entity_type,
                natural_key: key.to_string(),
            }));
        }
        self.keys.insert(key, id);
        self.rows.insert(id, value.clone());
        Ok(())
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.keys.get(key).and_then(|id| self.rows.get(id))
    }
}

/// Natural key of a per-user string-keyed row (consent scope, job key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UserKey(UserId, String);

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

/// In-memory mock storage for testing.
///
/// Clones share the same tables.
#[derive(Debug, Default, Clone)]
pub struct MockStorage {
    data_sources: Arc<RwLock<KeyedTable<DataSourceId, SourceKey, DataSource>>>,
    provenance: Arc<RwLock<HashMap<ProvenanceId, Provenance>>>,
    agreements: Arc<RwLock<KeyedTable<ConsentAgreementId, UserKey, ConsentAgreement>>>,
    snapshots: Arc<RwLock<HashMap<ConsentSnapshotId, ConsentSnapshot>>>,
    events: Arc<RwLock<HashMap<EventId, TimelineEvent>>>,
    documents: Arc<RwLock<HashMap<DocumentId, DocumentArtifact>>>,
    audit: Arc<RwLock<Vec<AuditEvent>>>,
    jobs: Arc<RwLock<KeyedTable<JobId, UserKey, Job>>>,
    failures: Arc<RwLock<HashSet<EntityType>>>,
    row_budgets: Arc<RwLock<HashMap<EntityType, usize>>>,
}

fn read_lock<T>(lock: &RwLock<T>) -> LifelineResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| LifelineError::Storage(StorageError::LockPoisoned))
}

fn write_lock<T>(lock: &RwLock<T>) -> LifelineResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| LifelineError::Storage(StorageError::LockPoisoned))
}

fn already_exists(entity_type: EntityType) -> LifelineError {
    LifelineError::Storage(StorageError::InsertFailed {
        entity_type,
        reason: "already exists".to_string(),
    })
}

fn injected(entity_type: EntityType) -> LifelineError {
    LifelineError::Storage(StorageError::Unavailable {
        reason: format!("injected failure for {}", entity_type),
    })
}

fn count<T>(lock: &RwLock<T>, len: impl Fn(&T) -> usize) -> usize {
    lock.read().map(|t| len(&*t)).unwrap_or(0)
}

impl MockStorage {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert or update of `entity_type` fail with
    /// `StorageError::Unavailable` until cleared.
    pub fn inject_failure(&self, entity_type: EntityType) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert(entity_type);
        }
    }

    /// Accept `rows` more inserted rows of `entity_type`, then fail with
    /// `StorageError::Unavailable`. A write that would cross the budget
    /// fails whole.
    pub fn inject_failure_after(&self, entity_type: EntityType, rows: usize) {
        if let Ok(mut budgets) = self.row_budgets.write() {
            budgets.insert(entity_type, rows);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.write() {
            failures.clear();
        }
        if let Ok(mut budgets) = self.row_budgets.write() {
            budgets.clear();
        }
    }

    fn check_failure(&self, entity_type: EntityType) -> LifelineResult<()> {
        if read_lock(&self.failures)?.contains(&entity_type) {
            return Err(injected(entity_type));
        }
        Ok(())
    }

    /// Check injected failures for every `(entity_type, rows)` pair, then
    /// charge the rows against their budgets. Nothing is charged on failure.
    fn check_rows(&self, writes: &[(EntityType, usize)]) -> LifelineResult<()> {
        for (entity_type, _) in writes {
            self.check_failure(*entity_type)?;
        }
        let mut budgets = write_lock(&self.row_budgets)?;
        for (entity_type, rows) in writes {
            if budgets.get(entity_type).is_some_and(|remaining| remaining < rows) {
                return Err(injected(*entity_type));
            }
        }
        for (entity_type, rows) in writes {
            if let Some(remaining) = budgets.get_mut(entity_type) {
                *remaining -= *rows;
            }
        }
        Ok(())
    }

    pub fn data_source_count(&self) -> usize {
        count(&self.data_sources, |t| t.rows.len())
    }

    pub fn provenance_count(&self) -> usize {
        count(&self.provenance, HashMap::len)
    }

    pub fn consent_agreement_count(&self) -> usize {
        count(&self.agreements, |t| t.rows.len())
    }

    pub fn consent_snapshot_count(&self) -> usize {
        count(&self.snapshots, HashMap::len)
    }

    pub fn event_count(&self) -> usize {
        count(&self.events, HashMap::len)
    }

    pub fn document_count(&self) -> usize {
        count(&self.documents, HashMap::len)
    }

    pub fn audit_count(&self) -> usize {
        count(&self.audit, Vec::len)
    }

    pub fn job_count(&self) -> usize {
        count(&self.jobs, |t| t.rows.len())
    }

    fn source_owner(&self, id: DataSourceId) -> LifelineResult<Option<UserId>> {
        Ok(read_lock(&self.data_sources)?
            .rows
            .get(&id)
            .map(|s| s.user_id))
    }

    fn agreement_owner(&self, id: ConsentAgreementId) -> LifelineResult<Option<UserId>> {
        Ok(read_lock(&self.agreements)?.rows.get(&id).map(|a| a.user_id))
    }
}

impl StorageTrait for MockStorage {
    // === Data Source Operations ===

    fn data_source_insert(&self, source: &DataSource) -> LifelineResult<()> {
        self.check_failure(EntityType::DataSource)?;
        let mut table = write_lock(&self.data_sources)?;
        table.insert(
            source.data_source_id,
            source.natural_key(),
            source,
            EntityType::DataSource,
        )
    }

    fn data_source_get(
        &self,
        user_id: UserId,
        id: DataSourceId,
    ) -> LifelineResult<Option<DataSource>> {
        let table = read_lock(&self.data_sources)?;
        Ok(table
            .rows
            .get(&id)
            .filter(|s| s.user_id == user_id)
            .cloned())
    }

    fn data_source_find(
        &self,
        user_id: UserId,
        kind: SourceKind,
        display_name: &str,
    ) -> LifelineResult<Option<DataSource>> {
        let table = read_lock(&self.data_sources)?;
        Ok(table
            .find(&SourceKey::new(user_id, kind, display_name))
            .cloned())
    }

    fn data_source_list(&self, user_id: UserId) -> LifelineResult<Vec<DataSource>> {
        let table = read_lock(&self.data_sources)?;
        let mut sources: Vec<DataSource> = table
            .rows
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sources.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.data_source_id.cmp(&b.data_source_id))
        });
        Ok(sources)
    }

    fn data_source_update_connection(
        &self,
        user_id: UserId,
        id: DataSourceId,
        update: ConnectionUpdate,
    ) -> LifelineResult<DataSource> {
        self.check_failure(EntityType::DataSource)?;
        let mut table = write_lock(&self.data_sources)?;
        let source = table
            .rows
            .get_mut(&id)
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| LifelineError::not_found(EntityType::DataSource, id))?;
        update.apply(source);
        Ok(source.clone())
    }

    // === Provenance Operations ===

    fn provenance_insert(&self, provenance: &Provenance) -> LifelineResult<()> {
        self.check_failure(EntityType::Provenance)?;
        let mut table = write_lock(&self.provenance)?;
        if table.contains_key(&provenance.provenance_id) {
            return Err(already_exists(EntityType::Provenance));
        }
        table.insert(provenance.provenance_id, provenance.clone());
        Ok(())
    }

    fn provenance_get(
        &self,
        user_id: UserId,
        id: ProvenanceId,
    ) -> LifelineResult<Option<Provenance>> {
        let provenance = match read_lock(&self.provenance)?.get(&id) {
            Some(p) => p.clone(),
            None => return Ok(None),
        };
        let owner = self.source_owner(provenance.data_source_id)?;
        Ok((owner == Some(user_id)).then_some(provenance))
    }

    // === Consent Operations ===

    fn consent_agreement_insert(&self, agreement: &ConsentAgreement) -> LifelineResult<()> {
        self.check_failure(EntityType::ConsentAgreement)?;
        let mut table = write_lock(&self.agreements)?;
        table.insert(
            agreement.consent_agreement_id,
            UserKey(agreement.user_id, agreement.scope.clone()),
            agreement,
            EntityType::ConsentAgreement,
        )
    }

    fn consent_agreement_find(
        &self,
        user_id: UserId,
        scope: &str,
    ) -> LifelineResult<Option<ConsentAgreement>> {
        let table = read_lock(&self.agreements)?;
        Ok(table.find(&UserKey(user_id, scope.to_string())).cloned())
    }

    fn consent_snapshot_insert(&self, snapshot: &ConsentSnapshot) -> LifelineResult<()> {
        self.check_failure(EntityType::ConsentSnapshot)?;
        let mut table = write_lock(&self.snapshots)?;
        if table.contains_key(&snapshot.consent_snapshot_id) {
            return Err(already_exists(EntityType::ConsentSnapshot));
        }
        table.insert(snapshot.consent_snapshot_id, snapshot.clone());
        Ok(())
    }

    fn consent_snapshot_get(
        &self,
        user_id: UserId,
        id: ConsentSnapshotId,
    ) -> LifelineResult<Option<ConsentSnapshot>> {
        let snapshot = match read_lock(&self.snapshots)?.get(&id) {
            Some(s) => s.clone(),
            None => return Ok(None),
        };
        let owner = self.agreement_owner(snapshot.consent_agreement_id)?;
        Ok((owner == Some(user_id)).then_some(snapshot))
    }

    fn consent_snapshot_latest(
        &self,
        user_id: UserId,
        agreement_id: ConsentAgreementId,
    ) -> LifelineResult<Option<ConsentSnapshot>> {
        if self.agreement_owner(agreement_id)? != Some(user_id) {
            return Ok(None);
        }
        let table = read_lock(&self.snapshots)?;
        Ok(table
            .values()
            .filter(|s| s.consent_agreement_id == agreement_id)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.consent_snapshot_id.cmp(&b.consent_snapshot_id))
            })
            .cloned())
    }

    // === Timeline Event Operations ===

    fn event_insert(&self, event: &TimelineEvent) -> LifelineResult<()> {
        self.event_insert_batch(std::slice::from_ref(event))
    }

    fn event_insert_batch(&self, events: &[TimelineEvent]) -> LifelineResult<()> {
        let mut table = write_lock(&self.events)?;
        let mut seen = HashSet::with_capacity(events.len());
        if events
            .iter()
            .any(|e| table.contains_key(&e.event_id) || !seen.insert(e.event_id))
        {
            return Err(already_exists(EntityType::TimelineEvent));
        }
        self.check_rows(&[(EntityType::TimelineEvent, events.len())])?;
        for event in events {
            table.insert(event.event_id, event.clone());
        }
        Ok(())
    }

    fn event_get(&self, user_id: UserId, id: EventId) -> LifelineResult<Option<TimelineEvent>> {
        let table = read_lock(&self.events)?;
        Ok(table.get(&id).filter(|e| e.user_id == user_id).cloned())
    }

    fn event_query(
        &self,
        user_id: UserId,
        query: &EventQuery,
    ) -> LifelineResult<Vec<TimelineEvent>> {
        let table = read_lock(&self.events)?;
        let mut events: Vec<TimelineEvent> = table
            .values()
            .filter(|e| e.user_id == user_id)
            .filter(|e| query.filter.matches(e))
            .filter(|e| {
                query
                    .cursor
                    .map_or(true, |cursor| cursor.precedes(e, query.order))
            })
            .cloned()
            .collect();
        events.sort_by(|a, b| timeline_order(a, b, query.order));
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    fn event_list_amendments(
        &self,
        user_id: UserId,
        target: EventId,
        limit: usize,
    ) -> LifelineResult<Vec<TimelineEvent>> {
        let table = read_lock(&self.events)?;
        let mut amendments: Vec<TimelineEvent> = table
            .values()
            .filter(|e| e.user_id == user_id && e.details.amends_event_id() == Some(target))
            .cloned()
            .collect();
        amendments.sort_by(latest_first);
        amendments.truncate(limit);
        Ok(amendments)
    }

    // === Document Operations ===

    fn document_insert(&self, document: &DocumentArtifact) -> LifelineResult<()> {
        let mut table = write_lock(&self.documents)?;
        if table.contains_key(&document.document_id) {
            return Err(already_exists(EntityType::DocumentArtifact));
        }
        self.check_rows(&[(EntityType::DocumentArtifact, 1)])?;
        table.insert(document.document_id, document.clone());
        Ok(())
    }

    fn document_insert_with_event(
        &self,
        document: &DocumentArtifact,
        event: &TimelineEvent,
    ) -> LifelineResult<()> {
        // lock order: documents, then events
        let mut documents = write_lock(&self.documents)?;
        let mut events = write_lock(&self.events)?;
        if documents.contains_key(&document.document_id) {
            return Err(already_exists(EntityType::DocumentArtifact));
        }
        if events.contains_key(&event.event_id) {
            return Err(already_exists(EntityType::TimelineEvent));
        }
        self.check_rows(&[
            (EntityType::DocumentArtifact, 1),
            (EntityType::TimelineEvent, 1),
        ])?;
        documents.insert(document.document_id, document.clone());
        events.insert(event.event_id, event.clone());
        Ok(())
    }

    fn document_get(
        &self,
        user_id: UserId,
        id: DocumentId,
    ) -> LifelineResult<Option<DocumentArtifact>> {
        let table = read_lock(&self.documents)?;
        Ok(table.get(&id).filter(|d| d.user_id == user_id).cloned())
    }

    // === Audit Operations ===

    fn audit_insert(&self, audit: &AuditEvent) -> LifelineResult<()> {
        self.check_failure(EntityType::AuditEvent)?;
        let mut log = write_lock(&self.audit)?;
        if log.iter().any(|a| a.audit_event_id == audit.audit_event_id) {
            return Err(already_exists(EntityType::AuditEvent));
        }
        log.push(audit.clone());
        Ok(())
    }

    fn audit_list_recent(&self, user_id: UserId, limit: usize) -> LifelineResult<Vec<AuditEvent>> {
        let log = read_lock(&self.audit)?;
        let mut entries: Vec<AuditEvent> = log
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.audit_event_id.cmp(&a.audit_event_id))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    // === Job Operations ===

    fn job_insert(&self, job: &Job) -> LifelineResult<()> {
        self.check_failure(EntityType::Job)?;
        let mut table = write_lock(&self.jobs)?;
        table.insert(
            job.job_id,
            UserKey(job.user_id, job.idempotency_key.clone()),
            job,
            EntityType::Job,
        )
    }

    fn job_get(&self, user_id: UserId, id: JobId) -> LifelineResult<Option<Job>> {
        let table = read_lock(&self.jobs)?;
        Ok(table.rows.get(&id).filter(|j| j.user_id == user_id).cloned())
    }

    fn job_find_by_key(
        &self,
        user_id: UserId,
        idempotency_key: &str,
    ) -> LifelineResult<Option<Job>> {
        let table = read_lock(&self.jobs)?;
        Ok(table
            .find(&UserKey(user_id, idempotency_key.to_string()))
            .cloned())
    }

    fn job_update_status(
        &self,
        user_id: UserId,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        error_code: Option<String>,
    ) -> LifelineResult<Job> {
        self.check_failure(EntityType::Job)?;
        let mut table = write_lock(&self.jobs)?;
        let job = table
            .rows
            .get_mut(&id)
            .filter(|j| j.user_id == user_id)
            .ok_or_else(|| LifelineError::not_found(EntityType::Job, id))?;

        if job.status != expected || !expected.can_transition_to(next) {
            return Err(LifelineError::Storage(StorageError::UpdateFailed {
                entity_type: EntityType::Job,
                id: id.into(),
                reason: format!(
                    "cannot move job from {} to {} (expected {})",
                    job.status, next, expected
                ),
            }));
        }

        job.status = next;
        job.error_code = error_code;
        job.updated_at = chrono::Utc::now();
        Ok(job.clone())
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lifeline_core::{
        EntityIdType, EventCursor, EventDetails, JournalCategory, JournalDetails, SortOrder,
    };
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Walking pages by cursor visits every event exactly once, in order.
        #[test]
        fn prop_cursor_pages_cover_listing(
            offsets in proptest::collection::vec(0i64..48, 1..30),
            page_size in 1usize..7,
            ascending in any::<bool>(),
        ) {
            let storage = MockStorage::new();
            let user = UserId::now_v7();
            let base = Utc::now();
            for offset in &offsets {
                let event = TimelineEvent {
                    event_id: EventId::now_v7(),
                    user_id: user,
                    // duplicates on purpose to exercise the id tie-break
                    event_time: base - Duration::hours(*offset),
                    title: None,
                    summary: "s".to_string(),
                    details: EventDetails::JournalEntry(JournalDetails {
                        text: "s".to_string(),
                        category: JournalCategory::Note,
                    }),
                    provenance_id: ProvenanceId::nil(),
                    consent_snapshot_id: ConsentSnapshotId::nil(),
                    created_at: base,
                };
                storage.event_insert(&event).unwrap();
            }

            let order = if ascending { SortOrder::Asc } else { SortOrder::Desc };
            let full = storage
                .event_query(user, &EventQuery::default().with_order(order))
                .unwrap();

            let mut walked = Vec::new();
            let mut query = EventQuery::default().with_order(order).with_limit(page_size);
            loop {
                let page = storage.event_query(user, &query).unwrap();
                if page.is_empty() {
                    break;
                }
                query = query.after(EventCursor::of(&page[page.len() - 1]));
                walked.extend(page);
            }

            prop_assert_eq!(walked, full);
        }

        /// Racing inserts of the same natural key leave exactly one row.
        #[test]
        fn prop_natural_key_unique(attempts in 1usize..10) {
            let storage = MockStorage::new();
            let user = UserId::now_v7();
            let mut successes = 0;
            for _ in 0..attempts {
                let source = DataSource::new(user, SourceKind::Manual, "User Journal");
                match storage.data_source_insert(&source) {
                    Ok(()) => successes += 1,
                    Err(e) => prop_assert!(e.is_conflict()),
                }
            }
            prop_assert_eq!(successes, 1);
            prop_assert_eq!(storage.data_source_count(), 1);
        }
    }
}
