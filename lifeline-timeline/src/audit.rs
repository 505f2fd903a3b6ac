//! Audit trail.
//!
//! Write paths collect audit entries in an [`AuditOutbox`] and hand it to
//! [`AuditTrail::flush`] after the primary write commits. A failed audit write
//! is logged and dropped; it never reaches the caller.

use lifeline_core::{
    AuditAction, AuditEvent, EntityType, LifelineResult, TimelineConfig, UserId,
};
use lifeline_storage::StorageTrait;
use std::sync::Arc;
use uuid::Uuid;

/// Audit entries waiting for the primary write to commit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[must_use = "an outbox does nothing until flushed"]
pub struct AuditOutbox {
    entries: Vec<AuditEvent>,
}

impl AuditOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        user_id: UserId,
        action: AuditAction,
        entity_type: EntityType,
        entity_id: impl Into<Uuid>,
    ) {
        self.entries
            .push(AuditEvent::new(user_id, action, entity_type, entity_id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct AuditTrail<S> {
    storage: Arc<S>,
    recent_limit: usize,
}

impl<S> Clone for AuditTrail<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            recent_limit: self.recent_limit,
        }
    }
}

impl<S: StorageTrait> AuditTrail<S> {
    pub fn new(storage: Arc<S>, config: &TimelineConfig) -> Self {
        Self {
            storage,
            recent_limit: config.audit_recent_limit,
        }
    }

    /// Best-effort append of a single audit record.
    pub fn record(&self, audit: &AuditEvent) {
        self.try_record(audit);
    }

    /// Write every pending entry. Returns how many were stored.
    pub fn flush(&self, outbox: AuditOutbox) -> usize {
        let total = outbox.entries.len();
        let written = outbox
            .entries
            .iter()
            .filter(|audit| self.try_record(audit))
            .count();
        if written < total {
            tracing::warn!(written, total, "Audit outbox partially flushed");
        }
        written
    }

    fn try_record(&self, audit: &AuditEvent) -> bool {
        match self.storage.audit_insert(audit) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    user_id = %audit.user_id,
                    action = %audit.action,
                    entity_type = %audit.entity_type,
                    error = %e,
                    "Failed to write audit event"
                );
                false
            }
        }
    }

    /// Newest audit records for the user, at most the configured limit.
    pub fn recent(&self, user_id: UserId, limit: Option<usize>) -> LifelineResult<Vec<AuditEvent>> {
        let limit = limit
            .unwrap_or(self.recent_limit)
            .min(self.recent_limit);
        self.storage.audit_list_recent(user_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_core::{EntityIdType, EventId};
    use lifeline_storage::MockStorage;

    fn trail(storage: &Arc<MockStorage>, recent_limit: usize) -> AuditTrail<MockStorage> {
        AuditTrail::new(
            Arc::clone(storage),
            &TimelineConfig {
                audit_recent_limit: recent_limit,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_flush_writes_all_entries() {
        let storage = Arc::new(MockStorage::new());
        let trail = trail(&storage, 100);
        let user = UserId::now_v7();

        let mut outbox = AuditOutbox::new();
        outbox.push(user, AuditAction::JournalCreated, EntityType::TimelineEvent, EventId::now_v7());
        outbox.push(user, AuditAction::EventAmended, EntityType::TimelineEvent, EventId::now_v7());
        assert_eq!(outbox.len(), 2);

        assert_eq!(trail.flush(outbox), 2);
        let recent = trail.recent(user, None).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, AuditAction::EventAmended);
    }

    #[test]
    fn test_audit_failure_is_swallowed() {
        let storage = Arc::new(MockStorage::new());
        storage.inject_failure(EntityType::AuditEvent);
        let trail = trail(&storage, 100);
        let user = UserId::now_v7();

        let mut outbox = AuditOutbox::new();
        outbox.push(user, AuditAction::JournalCreated, EntityType::TimelineEvent, EventId::now_v7());
        assert_eq!(trail.flush(outbox), 0);
        trail.record(&AuditEvent::new(
            user,
            AuditAction::SyncFailed,
            EntityType::DataSource,
            Uuid::now_v7(),
        ));
        assert_eq!(storage.audit_count(), 0);
    }

    #[test]
    fn test_recent_is_clamped_and_scoped() {
        let storage = Arc::new(MockStorage::new());
        let trail = trail(&storage, 3);
        let user = UserId::now_v7();
        for _ in 0..5 {
            trail.record(&AuditEvent::new(
                user,
                AuditAction::JournalCreated,
                EntityType::TimelineEvent,
                EventId::now_v7(),
            ));
        }
        assert_eq!(trail.recent(user, Some(50)).unwrap().len(), 3);
        assert_eq!(trail.recent(user, Some(1)).unwrap().len(), 1);
        assert!(trail.recent(UserId::now_v7(), None).unwrap().is_empty());
    }
}
