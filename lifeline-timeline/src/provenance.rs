//! Provenance ledger.

use lifeline_core::{
    CaptureMethod, DataSourceId, EntityType, LifelineError, LifelineResult, Provenance,
    ProvenanceId, ProvenanceMetadata, UserId,
};
use lifeline_storage::StorageTrait;
use std::sync::Arc;

/// Append-only record of how data entered the system.
#[derive(Debug)]
pub struct ProvenanceLedger<S> {
    storage: Arc<S>,
}

impl<S> Clone for ProvenanceLedger<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: StorageTrait> ProvenanceLedger<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Record one capture action against a source owned by `user_id`.
    ///
    /// `metadata` has already passed the allow-list in
    /// [`ProvenanceMetadata::insert`], so no health content reaches the ledger.
    pub fn record(
        &self,
        user_id: UserId,
        data_source_id: DataSourceId,
        method: CaptureMethod,
        metadata: ProvenanceMetadata,
    ) -> LifelineResult<Provenance> {
        if self
            .storage
            .data_source_get(user_id, data_source_id)?
            .is_none()
        {
            return Err(LifelineError::not_found(
                EntityType::DataSource,
                data_source_id,
            ));
        }

        let provenance = Provenance::new(data_source_id, method, metadata);
        self.storage.provenance_insert(&provenance)?;
        tracing::debug!(
            user_id = %user_id,
            provenance_id = %provenance.provenance_id,
            method = %method,
            "Recorded provenance"
        );
        Ok(provenance)
    }

    pub fn get(&self, user_id: UserId, id: ProvenanceId) -> LifelineResult<Provenance> {
        self.storage
            .provenance_get(user_id, id)?
            .ok_or_else(|| LifelineError::not_found(EntityType::Provenance, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_core::{DataSource, EntityIdType, SourceKind};
    use lifeline_storage::MockStorage;

    #[test]
    fn test_record_and_read_back() {
        let storage = Arc::new(MockStorage::new());
        let user = UserId::now_v7();
        let source = DataSource::new(user, SourceKind::Manual, "User Journal");
        storage.data_source_insert(&source).unwrap();

        let ledger = ProvenanceLedger::new(Arc::clone(&storage));
        let metadata = ProvenanceMetadata::new().with("source", "journal").unwrap();
        let provenance = ledger
            .record(user, source.data_source_id, CaptureMethod::ManualEntry, metadata)
            .unwrap();

        let fetched = ledger.get(user, provenance.provenance_id).unwrap();
        assert_eq!(fetched, provenance);
        assert!(ledger
            .get(UserId::now_v7(), provenance.provenance_id)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_cannot_record_against_foreign_source() {
        let storage = Arc::new(MockStorage::new());
        let owner = UserId::now_v7();
        let source = DataSource::new(owner, SourceKind::Manual, "User Journal");
        storage.data_source_insert(&source).unwrap();

        let ledger = ProvenanceLedger::new(Arc::clone(&storage));
        let err = ledger
            .record(
                UserId::now_v7(),
                source.data_source_id,
                CaptureMethod::ManualEntry,
                ProvenanceMetadata::new(),
            )
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(storage.provenance_count(), 0);
    }
}
