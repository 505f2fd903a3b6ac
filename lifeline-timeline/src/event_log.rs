//! Append-only event log.
//!
//! Every event is anchored to exactly one provenance record and one consent
//! snapshot owned by the same user. The log never updates or deletes; it
//! only validates and inserts.

use lifeline_core::{
    DocumentArtifact, EntityType, EventCursor, EventDetails, EventFilter, EventId, EventPage,
    EventQuery, LifelineError, LifelineResult, NewTimelineEvent, SortOrder, TimelineConfig,
    TimelineEvent, UserId, ValidationError,
};
use lifeline_storage::StorageTrait;
use std::collections::VecDeque;
use std::sync::Arc;

/// Append and read access to the per-user event log.
#[derive(Debug)]
pub struct EventLog<S> {
    storage: Arc<S>,
    config: TimelineConfig,
}

impl<S> Clone for EventLog<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: self.config.clone(),
        }
    }
}

impl<S: StorageTrait> EventLog<S> {
    pub fn new(storage: Arc<S>, config: &TimelineConfig) -> Self {
        Self {
            storage,
            config: config.clone(),
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Check every append precondition without writing.
    pub fn validate(&self, event: &NewTimelineEvent) -> LifelineResult<()> {
        let user_id = event.user_id;

        let summary_len = event.summary.trim().chars().count();
        if summary_len == 0 {
            return Err(ValidationError::RequiredFieldMissing {
                field: "summary".to_string(),
            }
            .into());
        }
        let max_chars = self.config.summary_max_chars;
        if summary_len > max_chars {
            return Err(ValidationError::TooLong {
                field: "summary".to_string(),
                limit: max_chars,
                actual: summary_len,
            }
            .into());
        }

        if self
            .storage
            .provenance_get(user_id, event.provenance_id)?
            .is_none()
        {
            return Err(ValidationError::OwnershipMismatch {
                entity_type: EntityType::Provenance,
                id: event.provenance_id.into(),
            }
            .into());
        }
        if self
            .storage
            .consent_snapshot_get(user_id, event.consent_snapshot_id)?
            .is_none()
        {
            return Err(ValidationError::OwnershipMismatch {
                entity_type: EntityType::ConsentSnapshot,
                id: event.consent_snapshot_id.into(),
            }
            .into());
        }

        self.validate_details(user_id, &event.details)
    }

    fn validate_details(&self, user_id: UserId, details: &EventDetails) -> LifelineResult<()> {
        match details {
            EventDetails::JournalEntry(journal) => {
                require_text("details.text", &journal.text)?;
            }
            EventDetails::DocumentUploaded(doc) => {
                require_text("details.content_type", &doc.content_type)?;
            }
            EventDetails::EventAmended(amendment) => {
                if amendment.patch.is_empty() {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: "details.patch".to_string(),
                    }
                    .into());
                }
                let target = self.get(user_id, amendment.amends_event_id)?;
                ensure_amendable(&target)?;
            }
            EventDetails::VisitSummary(visit) => {
                for referenced in &visit.referenced_event_ids {
                    self.get(user_id, *referenced)?;
                }
            }
            EventDetails::ExternalEvent(external) => {
                require_text("details.source", &external.source)?;
                require_text("details.resource_category", &external.resource_category)?;
            }
        }
        Ok(())
    }

    /// Validate and insert a new event.
    ///
    /// No content uniqueness is enforced: submitting the same input twice
    /// yields two events.
    pub fn append(&self, event: NewTimelineEvent) -> LifelineResult<TimelineEvent> {
        let event = self.prepare(event)?;
        self.storage.event_insert(&event)?;
        tracing::debug!(
            user_id = %event.user_id,
            event_id = %event.event_id,
            event_type = %event.event_type(),
            "Appended timeline event"
        );
        Ok(event)
    }

    /// Validate every event, then insert all of them or none.
    pub fn append_batch(
        &self,
        events: Vec<NewTimelineEvent>,
    ) -> LifelineResult<Vec<TimelineEvent>> {
        let events = events
            .into_iter()
            .map(|event| self.prepare(event))
            .collect::<LifelineResult<Vec<_>>>()?;
        if events.is_empty() {
            return Ok(events);
        }
        self.storage.event_insert_batch(&events)?;
        tracing::debug!(
            user_id = %events[0].user_id,
            count = events.len(),
            "Appended timeline event batch"
        );
        Ok(events)
    }

    /// Validate `event`, then insert it together with the artifact it
    /// describes. Neither row is written unless both are.
    pub fn append_with_document(
        &self,
        artifact: &DocumentArtifact,
        event: NewTimelineEvent,
    ) -> LifelineResult<TimelineEvent> {
        let event = self.prepare(event)?;
        self.storage.document_insert_with_event(artifact, &event)?;
        tracing::debug!(
            user_id = %event.user_id,
            event_id = %event.event_id,
            document_id = %artifact.document_id,
            "Appended document event"
        );
        Ok(event)
    }

    fn prepare(&self, event: NewTimelineEvent) -> LifelineResult<TimelineEvent> {
        self.validate(&event)?;
        Ok(event.into_event())
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Fetch one event. Another user's event is reported as not found.
    pub fn get(&self, user_id: UserId, id: EventId) -> LifelineResult<TimelineEvent> {
        self.storage
            .event_get(user_id, id)?
            .ok_or_else(|| LifelineError::not_found(EntityType::TimelineEvent, id))
    }

    /// One page of events. The page size is clamped to the configured bounds.
    pub fn list(&self, user_id: UserId, query: &EventQuery) -> LifelineResult<EventPage> {
        let limit = self.config.page_size(query.limit);

        // one extra row tells us whether another page exists
        let lookahead = EventQuery {
            limit: Some(limit.saturating_add(1)),
            ..query.clone()
        };
        let mut events = self.storage.event_query(user_id, &lookahead)?;

        let next_cursor = if events.len() > limit {
            events.truncate(limit);
            events.last().map(EventCursor::of)
        } else {
            None
        };
        Ok(EventPage {
            events,
            next_cursor,
        })
    }

    /// Lazy iterator over every matching event, fetching one page at a time.
    pub fn iter(&self, user_id: UserId, filter: EventFilter, order: SortOrder) -> EventIter<S> {
        EventIter {
            log: self.clone(),
            user_id,
            query: EventQuery::new(filter).with_order(order),
            buffer: VecDeque::new(),
            done: false,
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Reject targets whose type cannot be amended.
pub(crate) fn ensure_amendable(target: &TimelineEvent) -> LifelineResult<()> {
    let event_type = target.event_type();
    if !event_type.is_amendable() {
        return Err(lifeline_core::DomainError::InvalidAmendmentTarget {
            event_id: target.event_id,
            event_type,
        }
        .into());
    }
    Ok(())
}

/// Restartable, page-at-a-time iterator over a user's events.
///
/// Storage errors are yielded once and end the iteration.
#[derive(Debug)]
pub struct EventIter<S> {
    log: EventLog<S>,
    user_id: UserId,
    query: EventQuery,
    buffer: VecDeque<TimelineEvent>,
    done: bool,
}

impl<S: StorageTrait> EventIter<S> {
    /// Start again from the first event.
    pub fn restart(&mut self) {
        self.query.cursor = None;
        self.buffer.clear();
        self.done = false;
    }

    fn fill(&mut self) -> LifelineResult<()> {
        let page = self.log.list(self.user_id, &self.query)?;
        match page.next_cursor {
            Some(cursor) => self.query.cursor = Some(cursor),
            None => self.done = true,
        }
        self.buffer.extend(page.events);
        Ok(())
    }
}

impl<S: StorageTrait> Iterator for EventIter<S> {
    type Item = LifelineResult<TimelineEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lifeline_core::{
        default_consent_permissions, AmendmentDetails, AmendmentPatch, CaptureMethod,
        ConsentAgreement, ConsentSnapshot, DataSource, DomainError, EntityIdType,
        ExternalDetails, JournalCategory, JournalDetails, Provenance, ProvenanceMetadata,
        SourceKind, TimelineCategory, VisitSummaryDetails,
    };
    use lifeline_storage::MockStorage;

    struct Fixture {
        storage: Arc<MockStorage>,
        log: EventLog<MockStorage>,
        user: UserId,
        provenance: Provenance,
        snapshot: ConsentSnapshot,
    }

    fn fixture_with(config: TimelineConfig) -> Fixture {
        let storage = Arc::new(MockStorage::new());
        let user = UserId::now_v7();
        let source = DataSource::new(user, SourceKind::Manual, "User Journal");
        storage.data_source_insert(&source).unwrap();
        let provenance = Provenance::new(
            source.data_source_id,
            CaptureMethod::ManualEntry,
            ProvenanceMetadata::new(),
        );
        storage.provenance_insert(&provenance).unwrap();
        let agreement = ConsentAgreement::new(user, "health_records");
        storage.consent_agreement_insert(&agreement).unwrap();
        let snapshot =
            ConsentSnapshot::new(agreement.consent_agreement_id, default_consent_permissions());
        storage.consent_snapshot_insert(&snapshot).unwrap();

        Fixture {
            log: EventLog::new(Arc::clone(&storage), &config),
            storage,
            user,
            provenance,
            snapshot,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(TimelineConfig::default())
    }

    fn new_event(f: &Fixture, details: EventDetails) -> NewTimelineEvent {
        NewTimelineEvent {
            user_id: f.user,
            event_time: Utc::now(),
            title: None,
            summary: "summary".to_string(),
            details,
            provenance_id: f.provenance.provenance_id,
            consent_snapshot_id: f.snapshot.consent_snapshot_id,
        }
    }

    fn journal(text: &str) -> EventDetails {
        EventDetails::JournalEntry(JournalDetails {
            text: text.to_string(),
            category: JournalCategory::Note,
        })
    }

    #[test]
    fn test_append_and_get() {
        let f = fixture();
        let event = f.log.append(new_event(&f, journal("x"))).unwrap();
        assert_eq!(f.log.get(f.user, event.event_id).unwrap(), event);
    }

    #[test]
    fn test_empty_summary_rejected() {
        let f = fixture();
        let mut new = new_event(&f, journal("x"));
        new.summary = "   ".to_string();
        let err = f.log.append(new).unwrap_err();
        assert!(matches!(
            err,
            LifelineError::Validation(ValidationError::RequiredFieldMissing { .. })
        ));
        assert_eq!(f.storage.event_count(), 0);
    }

    #[test]
    fn test_overlong_summary_rejected() {
        let f = fixture_with(TimelineConfig {
            summary_max_chars: 5,
            ..Default::default()
        });
        let mut new = new_event(&f, journal("x"));
        new.summary = "too long".to_string();
        assert!(matches!(
            f.log.append(new).unwrap_err(),
            LifelineError::Validation(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_batch_with_invalid_event_writes_nothing() {
        let f = fixture();
        let mut bad = new_event(&f, journal("c"));
        bad.summary = String::new();
        let batch = vec![
            new_event(&f, journal("a")),
            new_event(&f, journal("b")),
            bad,
        ];
        assert!(f.log.append_batch(batch).is_err());
        assert_eq!(f.storage.event_count(), 0);

        let events = f
            .log
            .append_batch(vec![new_event(&f, journal("a")), new_event(&f, journal("b"))])
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(f.storage.event_count(), 2);
        assert!(f.log.append_batch(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_unbounded_page_size_does_not_overflow() {
        let f = fixture_with(TimelineConfig {
            max_page_size: usize::MAX,
            ..Default::default()
        });
        f.log.append(new_event(&f, journal("x"))).unwrap();
        let page = f
            .log
            .list(f.user, &EventQuery::default().with_limit(usize::MAX))
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_cross_user_provenance_rejected() {
        let f = fixture();
        let mut new = new_event(&f, journal("x"));
        new.user_id = UserId::now_v7();
        let err = f.log.append(new).unwrap_err();
        assert!(matches!(
            err,
            LifelineError::Validation(ValidationError::OwnershipMismatch {
                entity_type: EntityType::Provenance,
                ..
            })
        ));
        assert_eq!(f.storage.event_count(), 0);
    }

    #[test]
    fn test_unknown_consent_snapshot_rejected() {
        let f = fixture();
        let mut new = new_event(&f, journal("x"));
        new.consent_snapshot_id = lifeline_core::ConsentSnapshotId::now_v7();
        assert!(matches!(
            f.log.append(new).unwrap_err(),
            LifelineError::Validation(ValidationError::OwnershipMismatch {
                entity_type: EntityType::ConsentSnapshot,
                ..
            })
        ));
    }

    #[test]
    fn test_amendment_target_rules() {
        let f = fixture();
        let visit = f
            .log
            .append(new_event(
                &f,
                EventDetails::VisitSummary(VisitSummaryDetails {
                    referenced_event_ids: vec![],
                    provider_name: None,
                    notes: None,
                }),
            ))
            .unwrap();

        let amend = |target: EventId| {
            EventDetails::EventAmended(AmendmentDetails {
                amends_event_id: target,
                patch: AmendmentPatch::default().with_title("B"),
                reason: None,
            })
        };

        let err = f.log.append(new_event(&f, amend(visit.event_id))).unwrap_err();
        assert!(matches!(
            err,
            LifelineError::Domain(DomainError::InvalidAmendmentTarget { .. })
        ));

        let err = f.log.append(new_event(&f, amend(EventId::now_v7()))).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(f.storage.event_count(), 1);
    }

    #[test]
    fn test_visit_summary_references_must_exist() {
        let f = fixture();
        let details = EventDetails::VisitSummary(VisitSummaryDetails {
            referenced_event_ids: vec![EventId::now_v7()],
            provider_name: None,
            notes: None,
        });
        assert!(f.log.append(new_event(&f, details)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_external_requires_source() {
        let f = fixture();
        let details = EventDetails::ExternalEvent(ExternalDetails {
            source: "".to_string(),
            resource_category: "lab".to_string(),
            provider_name: None,
            is_demo: true,
        });
        assert!(f.log.append(new_event(&f, details)).is_err());
    }

    #[test]
    fn test_list_pages_and_filter() {
        let f = fixture();
        let now = Utc::now();
        for i in 0..5 {
            let mut new = new_event(&f, journal("x"));
            new.event_time = now - Duration::minutes(i);
            f.log.append(new).unwrap();
        }

        let first = f
            .log
            .list(f.user, &EventQuery::default().with_limit(3))
            .unwrap();
        assert_eq!(first.events.len(), 3);
        let cursor = first.next_cursor.unwrap();

        let second = f
            .log
            .list(f.user, &EventQuery::default().with_limit(3).after(cursor))
            .unwrap();
        assert_eq!(second.events.len(), 2);
        assert!(second.is_last());

        let none = f
            .log
            .list(
                f.user,
                &EventQuery::new(EventFilter::new().with_category(TimelineCategory::Visits)),
            )
            .unwrap();
        assert!(none.events.is_empty());
    }

    #[test]
    fn test_iter_is_lazy_and_restartable() {
        let f = fixture_with(TimelineConfig {
            default_page_size: 2,
            ..Default::default()
        });
        for _ in 0..5 {
            f.log.append(new_event(&f, journal("x"))).unwrap();
        }

        let mut iter = f.log.iter(f.user, EventFilter::new(), SortOrder::Desc);
        let first_two: Vec<_> = iter.by_ref().take(2).map(Result::unwrap).collect();
        assert_eq!(first_two.len(), 2);

        iter.restart();
        let all: Vec<_> = iter.map(Result::unwrap).collect();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].event_id, first_two[0].event_id);
    }

    #[test]
    fn test_get_other_user_is_not_found() {
        let f = fixture();
        let event = f.log.append(new_event(&f, journal("x"))).unwrap();
        assert!(f
            .log
            .get(UserId::now_v7(), event.event_id)
            .unwrap_err()
            .is_not_found());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lifeline_core::{
        default_consent_permissions, CaptureMethod, ConsentAgreement, ConsentSnapshot, DataSource,
        EntityIdType, EventDetails, JournalCategory, JournalDetails, Provenance,
        ProvenanceMetadata, SourceKind,
    };
    use lifeline_storage::MockStorage;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Paged iteration yields every event once, in timeline order,
        /// whatever the page size.
        #[test]
        fn prop_iter_visits_each_event_once(
            offsets in prop::collection::vec(0i64..10_000, 0..40),
            page_size in 1usize..7,
            ascending in any::<bool>(),
        ) {
            let storage = Arc::new(MockStorage::new());
            let user = UserId::now_v7();
            let source = DataSource::new(user, SourceKind::Manual, "User Journal");
            storage.data_source_insert(&source).unwrap();
            let provenance = Provenance::new(
                source.data_source_id,
                CaptureMethod::ManualEntry,
                ProvenanceMetadata::new(),
            );
            storage.provenance_insert(&provenance).unwrap();
            let agreement = ConsentAgreement::new(user, "health_records");
            storage.consent_agreement_insert(&agreement).unwrap();
            let snapshot =
                ConsentSnapshot::new(agreement.consent_agreement_id, default_consent_permissions());
            storage.consent_snapshot_insert(&snapshot).unwrap();

            let config = TimelineConfig {
                default_page_size: page_size,
                ..Default::default()
            };
            let log = EventLog::new(Arc::clone(&storage), &config);
            let base = Utc::now();
            for offset in &offsets {
                log.append(NewTimelineEvent {
                    user_id: user,
                    // duplicate times exercise the id tie-break
                    event_time: base - Duration::seconds(*offset),
                    title: None,
                    summary: "s".to_string(),
                    details: EventDetails::JournalEntry(JournalDetails {
                        text: "t".to_string(),
                        category: JournalCategory::Note,
                    }),
                    provenance_id: provenance.provenance_id,
                    consent_snapshot_id: snapshot.consent_snapshot_id,
                })
                .unwrap();
            }

            let order = if ascending { SortOrder::Asc } else { SortOrder::Desc };
            let seen: Vec<TimelineEvent> = log
                .iter(user, EventFilter::new(), order)
                .collect::<LifelineResult<_>>()
                .unwrap();

            prop_assert_eq!(seen.len(), offsets.len());
            prop_assert!(seen
                .windows(2)
                .all(|w| lifeline_core::timeline_order(&w[0], &w[1], order).is_lt()));
        }
    }
}
