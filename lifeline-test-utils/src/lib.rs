//! Lifeline Test Utilities
//!
//! Shared test infrastructure for the Lifeline workspace:
//! - Proptest generators for timeline inputs
//! - Fixtures for building a timeline over in-memory stores
//! - Import sources with scripted behaviour
//! - Assertions for Lifeline error variants

// Re-export in-memory stores from their source crate
pub use lifeline_storage::{InMemoryBlobStore, MockStorage};

pub use lifeline_core::{
    AmendmentPatch, DomainError, EntityIdType, EntityType, EventId, JournalCategory,
    LifelineError, LifelineResult, TimelineConfig, Timestamp, UserId, ValidationError,
};
pub use lifeline_timeline::{
    AmendmentInput, ImportFailure, ImportRecord, ImportSource, JournalEntryInput, Timeline,
};

use async_trait::async_trait;
use chrono::Utc;

/// Timeline over in-memory stores.
pub type TestTimeline = Timeline<MockStorage, InMemoryBlobStore>;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Lifeline inputs.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_journal_category() -> impl Strategy<Value = JournalCategory> {
        prop_oneof![
            Just(JournalCategory::Symptom),
            Just(JournalCategory::Medication),
            Just(JournalCategory::Appointment),
            Just(JournalCategory::Mood),
            Just(JournalCategory::Note),
        ]
    }

    /// Non-blank journal text, sometimes longer than a summary.
    pub fn arb_journal_text() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9 ,.]{0,300}"
    }

    /// Timestamps between 2020 and 2030.
    pub fn arb_event_time() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_journal_input() -> impl Strategy<Value = JournalEntryInput> {
        (
            arb_journal_text(),
            arb_journal_category(),
            proptest::option::of(arb_event_time()),
            proptest::option::of("[A-Z][a-z]{2,20}"),
        )
            .prop_map(|(text, category, event_time, title)| JournalEntryInput {
                text,
                category,
                title,
                event_time,
            })
    }

    /// Non-empty patch using only fields that apply to journal entries.
    pub fn arb_journal_patch() -> impl Strategy<Value = AmendmentPatch> {
        (
            proptest::option::of("[A-Z][a-z]{2,20}"),
            proptest::option::of(arb_journal_text()),
            proptest::option::of(arb_journal_category()),
        )
            .prop_filter("patch must not be empty", |(title, text, category)| {
                title.is_some() || text.is_some() || category.is_some()
            })
            .prop_map(|(title, text, category)| AmendmentPatch {
                title,
                text,
                category,
                ..Default::default()
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built timelines and import sources.

    use super::*;
    use std::sync::Arc;

    pub fn test_timeline() -> TestTimeline {
        test_timeline_with(TimelineConfig::default())
    }

    pub fn test_timeline_with(config: TimelineConfig) -> TestTimeline {
        Timeline::new(
            Arc::new(MockStorage::new()),
            Arc::new(InMemoryBlobStore::new()),
            config,
        )
    }

    pub fn journal(text: &str, category: JournalCategory) -> JournalEntryInput {
        JournalEntryInput::new(text, category)
    }

    pub fn amendment(target: EventId, patch: AmendmentPatch) -> AmendmentInput {
        AmendmentInput {
            target,
            patch,
            reason: None,
        }
    }

    pub fn import_record(category: &str, summary: &str) -> ImportRecord {
        ImportRecord {
            category: category.to_string(),
            title: summary.to_string(),
            summary: summary.to_string(),
            provider_name: Some("Test Clinic".to_string()),
            occurred_at: Utc::now(),
        }
    }

    /// Import source that always fails with `code`.
    #[derive(Debug, Clone)]
    pub struct FailingImportSource {
        pub code: String,
    }

    impl FailingImportSource {
        pub fn new(code: impl Into<String>) -> Self {
            Self { code: code.into() }
        }
    }

    #[async_trait]
    impl ImportSource for FailingImportSource {
        async fn fetch(
            &self,
            _user_id: UserId,
            _source: &lifeline_core::DataSource,
        ) -> Result<Vec<ImportRecord>, ImportFailure> {
            Err(ImportFailure::new(self.code.clone(), "scripted failure"))
        }
    }

    /// Import source that returns a fixed batch.
    #[derive(Debug, Clone, Default)]
    pub struct StaticImportSource {
        pub records: Vec<ImportRecord>,
    }

    #[async_trait]
    impl ImportSource for StaticImportSource {
        async fn fetch(
            &self,
            _user_id: UserId,
            _source: &lifeline_core::DataSource,
        ) -> Result<Vec<ImportRecord>, ImportFailure> {
            Ok(self.records.clone())
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Lifeline error variants.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &LifelineResult<T>, entity_type: EntityType) {
        match result {
            Err(LifelineError::NotFound { entity_type: et, .. }) => {
                assert_eq!(*et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", entity_type, other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &LifelineResult<T>) {
        match result {
            Err(LifelineError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_transition<T: std::fmt::Debug>(result: &LifelineResult<T>) {
        match result {
            Err(LifelineError::Domain(DomainError::InvalidTransition { .. })) => {}
            other => panic!("Expected InvalidTransition, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_amendment_target<T: std::fmt::Debug>(result: &LifelineResult<T>) {
        match result {
            Err(LifelineError::Domain(DomainError::InvalidAmendmentTarget { .. })) => {}
            other => panic!("Expected InvalidAmendmentTarget, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_journal_text_is_never_blank(text in arb_journal_text()) {
            prop_assert!(!text.trim().is_empty());
        }

        #[test]
        fn prop_journal_patch_is_never_empty(patch in arb_journal_patch()) {
            prop_assert!(!patch.is_empty());
            prop_assert!(patch.doc_type.is_none());
        }
    }
}
