//! Current-view folding of amendments onto their target event.
//!
//! The fold is pure: it takes the original event plus the single latest
//! amendment and produces the effective field values. Intermediate amendments
//! never contribute, so a field the latest amendment omits falls back to the
//! original.

use crate::{
    truncate_summary, AmendmentDetails, EventDetails, EventId, TimelineEvent, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Effective view of an event after folding in its most recent amendment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CurrentView {
    /// The untouched original record.
    pub original: TimelineEvent,
    pub title: Option<String>,
    pub summary: String,
    pub details: EventDetails,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub amended_by: Option<EventId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub amended_at: Option<Timestamp>,
    pub amendment_count: usize,
}

impl CurrentView {
    /// View of an event with no amendments.
    pub fn unamended(original: TimelineEvent) -> Self {
        Self {
            title: original.title.clone(),
            summary: original.summary.clone(),
            details: original.details.clone(),
            amended_by: None,
            amended_at: None,
            amendment_count: 0,
            original,
        }
    }

    /// Fold the latest amendment onto `original`.
    ///
    /// `latest` must be an `event_amended` event targeting `original`;
    /// anything else leaves the view unamended.
    pub fn fold(
        original: TimelineEvent,
        latest: Option<&TimelineEvent>,
        amendment_count: usize,
        summary_max_chars: usize,
    ) -> Self {
        let Some(amendment_event) = latest else {
            return Self::unamended(original);
        };
        let amendment = match &amendment_event.details {
            EventDetails::EventAmended(a) if a.amends_event_id == original.event_id => a,
            _ => return Self::unamended(original),
        };

        let mut view = Self::unamended(original);
        apply_patch(&mut view, amendment, summary_max_chars);
        view.amended_by = Some(amendment_event.event_id);
        view.amended_at = Some(amendment_event.created_at);
        view.amendment_count = amendment_count;
        view
    }

    pub fn is_amended(&self) -> bool {
        self.amended_by.is_some()
    }
}

fn apply_patch(view: &mut CurrentView, amendment: &AmendmentDetails, summary_max_chars: usize) {
    let patch = &amendment.patch;

    if let Some(title) = &patch.title {
        view.title = Some(title.clone());
    }

    match &mut view.details {
        EventDetails::JournalEntry(journal) => {
            if let Some(text) = &patch.text {
                journal.text = text.clone();
                view.summary = truncate_summary(text, summary_max_chars);
            }
            if let Some(category) = patch.category {
                journal.category = category;
            }
        }
        EventDetails::DocumentUploaded(doc) => {
            if let Some(title) = &patch.title {
                doc.title = Some(title.clone());
            }
            if let Some(doc_type) = &patch.doc_type {
                doc.doc_type = Some(doc_type.clone());
            }
            if let Some(notes) = &patch.notes {
                doc.notes = Some(notes.clone());
            }
        }
        // not amendable; appends reject these as targets
        EventDetails::EventAmended(_)
        | EventDetails::VisitSummary(_)
        | EventDetails::ExternalEvent(_) => {}
    }
}

/// Ordering used to pick the latest amendment: filing time first, then id.
///
/// `event_time` is deliberately not consulted; it is user-editable and may
/// describe an earlier occurrence.
pub fn latest_first(a: &TimelineEvent, b: &TimelineEvent) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.event_id.cmp(&a.event_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AmendmentPatch, ConsentSnapshotId, DocumentDetails, DocumentId, EntityIdType,
        JournalCategory, JournalDetails, ProvenanceId, UserId, VisitSummaryDetails,
    };
    use chrono::{Duration, Utc};

    fn journal(title: &str, text: &str) -> TimelineEvent {
        TimelineEvent {
            event_id: EventId::now_v7(),
            user_id: UserId::nil(),
            event_time: Utc::now(),
            title: Some(title.to_string()),
            summary: text.to_string(),
            details: EventDetails::JournalEntry(JournalDetails {
                text: text.to_string(),
                category: JournalCategory::Symptom,
            }),
            provenance_id: ProvenanceId::nil(),
            consent_snapshot_id: ConsentSnapshotId::nil(),
            created_at: Utc::now(),
        }
    }

    fn amendment(target: &TimelineEvent, patch: AmendmentPatch, filed_at: Timestamp) -> TimelineEvent {
        TimelineEvent {
            event_id: EventId::now_v7(),
            user_id: target.user_id,
            event_time: target.event_time,
            title: None,
            summary: "Amendment".to_string(),
            details: EventDetails::EventAmended(AmendmentDetails {
                amends_event_id: target.event_id,
                patch,
                reason: None,
            }),
            provenance_id: ProvenanceId::nil(),
            consent_snapshot_id: ConsentSnapshotId::nil(),
            created_at: filed_at,
        }
    }

    #[test]
    fn test_no_amendment_is_identity() {
        let original = journal("A", "x");
        let view = CurrentView::fold(original.clone(), None, 0, 140);
        assert_eq!(view.title.as_deref(), Some("A"));
        assert_eq!(view.details, original.details);
        assert!(!view.is_amended());
    }

    #[test]
    fn test_latest_amendment_overrides_and_omitted_fields_fall_back_to_original() {
        let original = journal("A", "x");
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(5);
        let first = amendment(&original, AmendmentPatch::default().with_text("y"), t1);
        let second = amendment(&original, AmendmentPatch::default().with_title("B"), t2);

        let mut candidates = vec![first, second.clone()];
        candidates.sort_by(latest_first);
        assert_eq!(candidates[0].event_id, second.event_id);

        let view = CurrentView::fold(original, Some(&candidates[0]), candidates.len(), 140);
        assert_eq!(view.title.as_deref(), Some("B"));
        match &view.details {
            EventDetails::JournalEntry(j) => assert_eq!(j.text, "x"),
            other => panic!("unexpected details {:?}", other),
        }
        assert_eq!(view.amendment_count, 2);
        assert_eq!(view.amended_by, Some(second.event_id));
    }

    #[test]
    fn test_text_override_recomputes_summary() {
        let original = journal("A", "x");
        let amended = amendment(
            &original,
            AmendmentPatch::default()
                .with_text("a much longer corrected description")
                .with_category(JournalCategory::Medication),
            Utc::now(),
        );
        let view = CurrentView::fold(original, Some(&amended), 1, 10);
        assert_eq!(view.summary.chars().count(), 10);
        assert_eq!(view.details.journal_category(), Some(JournalCategory::Medication));
    }

    #[test]
    fn test_document_fields_fold() {
        let mut original = journal("Scan", "ignored");
        original.details = EventDetails::DocumentUploaded(DocumentDetails {
            document_id: DocumentId::now_v7(),
            title: Some("Scan".to_string()),
            doc_type: Some("imaging".to_string()),
            original_filename: Some("scan.pdf".to_string()),
            content_type: "application/pdf".to_string(),
            notes: None,
        });
        let amended = amendment(
            &original,
            AmendmentPatch::default()
                .with_doc_type("lab_report")
                .with_notes("wrong type at upload")
                .with_text("ignored for documents"),
            Utc::now(),
        );
        let view = CurrentView::fold(original.clone(), Some(&amended), 1, 140);
        match &view.details {
            EventDetails::DocumentUploaded(d) => {
                assert_eq!(d.doc_type.as_deref(), Some("lab_report"));
                assert_eq!(d.notes.as_deref(), Some("wrong type at upload"));
                assert_eq!(d.title.as_deref(), Some("Scan"));
            }
            other => panic!("unexpected details {:?}", other),
        }
        assert_eq!(view.summary, original.summary);
    }

    #[test]
    fn test_amendment_for_other_target_is_ignored() {
        let original = journal("A", "x");
        let other = journal("C", "z");
        let stray = amendment(&other, AmendmentPatch::default().with_title("B"), Utc::now());
        let view = CurrentView::fold(original, Some(&stray), 1, 140);
        assert!(!view.is_amended());
        assert_eq!(view.title.as_deref(), Some("A"));
    }

    #[test]
    fn test_non_amendable_variant_unchanged() {
        let mut original = journal("Visit", "x");
        original.details = EventDetails::VisitSummary(VisitSummaryDetails {
            referenced_event_ids: vec![],
            provider_name: None,
            notes: None,
        });
        let amended = amendment(&original, AmendmentPatch::default().with_notes("n"), Utc::now());
        let view = CurrentView::fold(original.clone(), Some(&amended), 1, 140);
        assert_eq!(view.details, original.details);
    }

    #[test]
    fn test_latest_first_breaks_ties_by_id() {
        let original = journal("A", "x");
        let at = Utc::now();
        let a = amendment(&original, AmendmentPatch::default().with_title("1"), at);
        let b = amendment(&original, AmendmentPatch::default().with_title("2"), at);
        let mut list = vec![a.clone(), b.clone()];
        list.sort_by(latest_first);
        // b was generated after a, so its UUIDv7 sorts higher
        assert_eq!(list[0].event_id, b.event_id);
    }
}
