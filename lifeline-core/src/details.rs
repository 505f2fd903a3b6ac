//! Typed event payloads.
//!
//! Each timeline event carries exactly one [`EventDetails`] variant, and the
//! variant *is* the event type. Read sites match exhaustively; there is no
//! string-keyed accessor layer.

use crate::{DocumentId, EventId, EventType, JournalCategory};
use serde::{Deserialize, Serialize};

/// Payload of a timeline event, discriminated by `event_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "event_type", content = "details", rename_all = "snake_case")]
pub enum EventDetails {
    JournalEntry(JournalDetails),
    DocumentUploaded(DocumentDetails),
    EventAmended(AmendmentDetails),
    VisitSummary(VisitSummaryDetails),
    ExternalEvent(ExternalDetails),
}

impl EventDetails {
    pub fn event_type(&self) -> EventType {
        match self {
            EventDetails::JournalEntry(_) => EventType::JournalEntry,
            EventDetails::DocumentUploaded(_) => EventType::DocumentUploaded,
            EventDetails::EventAmended(_) => EventType::EventAmended,
            EventDetails::VisitSummary(_) => EventType::VisitSummary,
            EventDetails::ExternalEvent(_) => EventType::ExternalEvent,
        }
    }

    /// Target of an amendment, if this payload is one.
    pub fn amends_event_id(&self) -> Option<EventId> {
        match self {
            EventDetails::EventAmended(a) => Some(a.amends_event_id),
            _ => None,
        }
    }

    /// Journal category, if this payload is a journal entry.
    pub fn journal_category(&self) -> Option<JournalCategory> {
        match self {
            EventDetails::JournalEntry(j) => Some(j.category),
            _ => None,
        }
    }
}

/// Free-text journal entry written by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct JournalDetails {
    pub text: String,
    #[serde(default)]
    pub category: JournalCategory,
}

/// Reference to an uploaded document. The blob itself lives in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DocumentDetails {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub document_id: DocumentId,
    pub title: Option<String>,
    pub doc_type: Option<String>,
    pub original_filename: Option<String>,
    pub content_type: String,
    pub notes: Option<String>,
}

/// Non-destructive correction of an earlier event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AmendmentDetails {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub amends_event_id: EventId,
    pub patch: AmendmentPatch,
    pub reason: Option<String>,
}

/// Field overrides carried by an amendment. `None` means "keep the original".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AmendmentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<JournalCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AmendmentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.text.is_none()
            && self.category.is_none()
            && self.doc_type.is_none()
            && self.notes.is_none()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_category(mut self, category: JournalCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Summary of a clinical visit linking earlier events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct VisitSummaryDetails {
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub referenced_event_ids: Vec<EventId>,
    pub provider_name: Option<String>,
    pub notes: Option<String>,
}

/// Record imported from an external system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExternalDetails {
    pub source: String,
    pub resource_category: String,
    pub provider_name: Option<String>,
    pub is_demo: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;

    #[test]
    fn test_details_serialize_with_event_type_tag() {
        let details = EventDetails::JournalEntry(JournalDetails {
            text: "felt dizzy".to_string(),
            category: JournalCategory::Symptom,
        });
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["event_type"], "journal_entry");
        assert_eq!(value["details"]["text"], "felt dizzy");
        assert_eq!(value["details"]["category"], "symptom");
    }

    #[test]
    fn test_details_decode_is_checked() {
        // an amendment payload without its target must not decode
        let raw = serde_json::json!({
            "event_type": "event_amended",
            "details": { "patch": {} }
        });
        assert!(serde_json::from_value::<EventDetails>(raw).is_err());
    }

    #[test]
    fn test_amends_event_id_only_for_amendments() {
        let target = EventId::now_v7();
        let amendment = EventDetails::EventAmended(AmendmentDetails {
            amends_event_id: target,
            patch: AmendmentPatch::default().with_text("y"),
            reason: None,
        });
        assert_eq!(amendment.amends_event_id(), Some(target));

        let external = EventDetails::ExternalEvent(ExternalDetails {
            source: "fasten".to_string(),
            resource_category: "lab".to_string(),
            provider_name: None,
            is_demo: true,
        });
        assert_eq!(external.amends_event_id(), None);
        assert_eq!(external.event_type(), EventType::ExternalEvent);
    }

    #[test]
    fn test_patch_skips_absent_fields() {
        let patch = AmendmentPatch::default().with_title("B");
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, serde_json::json!({ "title": "B" }));
        assert!(!patch.is_empty());
        assert!(AmendmentPatch::default().is_empty());
    }
}
