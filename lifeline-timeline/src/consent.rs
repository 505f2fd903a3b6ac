//! Consent agreements and snapshots.

use lifeline_core::{
    default_consent_permissions, ConsentAgreement, ConsentSnapshot, ConsentSnapshotId, EntityType,
    LifelineError, LifelineResult, UserId,
};
use lifeline_storage::StorageTrait;
use std::sync::Arc;

/// Resolves the consent snapshot that new writes are filed under.
#[derive(Debug)]
pub struct ConsentStore<S> {
    storage: Arc<S>,
    scope: String,
}

impl<S> Clone for ConsentStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            scope: self.scope.clone(),
        }
    }
}

impl<S: StorageTrait> ConsentStore<S> {
    pub fn new(storage: Arc<S>, scope: impl Into<String>) -> Self {
        Self {
            storage,
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Agreement for the configured scope, created on first use.
    pub fn get_or_create_agreement(&self, user_id: UserId) -> LifelineResult<ConsentAgreement> {
        if let Some(agreement) = self.storage.consent_agreement_find(user_id, &self.scope)? {
            return Ok(agreement);
        }

        let agreement = ConsentAgreement::new(user_id, self.scope.as_str());
        match self.storage.consent_agreement_insert(&agreement) {
            Ok(()) => {
                tracing::debug!(user_id = %user_id, scope = %self.scope, "Created consent agreement");
                Ok(agreement)
            }
            Err(e) if e.is_conflict() => self
                .storage
                .consent_agreement_find(user_id, &self.scope)?
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    /// Latest snapshot of the user's agreement, creating one with the default
    /// permissions if none exists.
    ///
    /// Two concurrent first calls may both create a snapshot. Either one is a
    /// valid "current consent at write time".
    pub fn current_snapshot(&self, user_id: UserId) -> LifelineResult<ConsentSnapshot> {
        let agreement = self.get_or_create_agreement(user_id)?;
        if let Some(snapshot) = self
            .storage
            .consent_snapshot_latest(user_id, agreement.consent_agreement_id)?
        {
            return Ok(snapshot);
        }

        let snapshot =
            ConsentSnapshot::new(agreement.consent_agreement_id, default_consent_permissions());
        self.storage.consent_snapshot_insert(&snapshot)?;
        tracing::debug!(
            user_id = %user_id,
            consent_snapshot_id = %snapshot.consent_snapshot_id,
            "Created default consent snapshot"
        );
        Ok(snapshot)
    }

    pub fn get_snapshot(
        &self,
        user_id: UserId,
        id: ConsentSnapshotId,
    ) -> LifelineResult<ConsentSnapshot> {
        self.storage
            .consent_snapshot_get(user_id, id)?
            .ok_or_else(|| LifelineError::not_found(EntityType::ConsentSnapshot, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_core::EntityIdType;
    use lifeline_storage::MockStorage;

    #[test]
    fn test_current_snapshot_is_reused() {
        let storage = Arc::new(MockStorage::new());
        let store = ConsentStore::new(Arc::clone(&storage), "health_records");
        let user = UserId::now_v7();

        let first = store.current_snapshot(user).unwrap();
        let second = store.current_snapshot(user).unwrap();
        assert_eq!(first.consent_snapshot_id, second.consent_snapshot_id);
        assert!(first.allows("store_records"));
        assert_eq!(storage.consent_agreement_count(), 1);
        assert_eq!(storage.consent_snapshot_count(), 1);
    }

    #[test]
    fn test_users_get_separate_agreements() {
        let storage = Arc::new(MockStorage::new());
        let store = ConsentStore::new(Arc::clone(&storage), "health_records");
        let a = store.current_snapshot(UserId::now_v7()).unwrap();
        let b = store.current_snapshot(UserId::now_v7()).unwrap();
        assert_ne!(a.consent_agreement_id, b.consent_agreement_id);
    }

    #[test]
    fn test_snapshot_not_visible_to_other_user() {
        let storage = Arc::new(MockStorage::new());
        let store = ConsentStore::new(storage, "health_records");
        let snapshot = store.current_snapshot(UserId::now_v7()).unwrap();
        assert!(store
            .get_snapshot(UserId::now_v7(), snapshot.consent_snapshot_id)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_snapshot_failure_propagates() {
        let storage = Arc::new(MockStorage::new());
        storage.inject_failure(EntityType::ConsentSnapshot);
        let store = ConsentStore::new(Arc::clone(&storage), "health_records");
        assert!(store.current_snapshot(UserId::now_v7()).is_err());
        // the agreement commits independently
        assert_eq!(storage.consent_agreement_count(), 1);
    }
}
