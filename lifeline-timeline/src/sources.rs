//! Data source registry.

use lifeline_core::{
    DataSource, DataSourceId, EntityType, LifelineError, LifelineResult, SourceKind, UserId,
};
use lifeline_storage::{ConnectionUpdate, StorageTrait};
use std::sync::Arc;

/// Get-or-create access to a user's data sources.
#[derive(Debug)]
pub struct DataSourceRegistry<S> {
    storage: Arc<S>,
}

impl<S> Clone for DataSourceRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: StorageTrait> DataSourceRegistry<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Return the source with natural key `(user_id, kind, display_name)`,
    /// creating it on first use.
    ///
    /// A concurrent creator winning the unique-key race is not an error: the
    /// winning row is re-fetched and returned.
    pub fn get_or_create(
        &self,
        user_id: UserId,
        kind: SourceKind,
        display_name: &str,
        provider: Option<&str>,
    ) -> LifelineResult<DataSource> {
        if let Some(existing) = self.storage.data_source_find(user_id, kind, display_name)? {
            return Ok(existing);
        }

        let mut source = DataSource::new(user_id, kind, display_name);
        if let Some(provider) = provider {
            source = source.with_provider(provider);
        }

        match self.storage.data_source_insert(&source) {
            Ok(()) => {
                tracing::debug!(
                    user_id = %user_id,
                    data_source_id = %source.data_source_id,
                    kind = %kind,
                    "Created data source"
                );
                Ok(source)
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!(user_id = %user_id, kind = %kind, "Data source created concurrently, re-fetching");
                self.storage
                    .data_source_find(user_id, kind, display_name)?
                    .ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, user_id: UserId, id: DataSourceId) -> LifelineResult<DataSource> {
        self.storage
            .data_source_get(user_id, id)?
            .ok_or_else(|| LifelineError::not_found(EntityType::DataSource, id))
    }

    pub fn list(&self, user_id: UserId) -> LifelineResult<Vec<DataSource>> {
        self.storage.data_source_list(user_id)
    }

    pub(crate) fn update_connection(
        &self,
        user_id: UserId,
        id: DataSourceId,
        update: ConnectionUpdate,
    ) -> LifelineResult<DataSource> {
        self.storage.data_source_update_connection(user_id, id, update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_core::{EntityIdType, SourceStatus};
    use lifeline_storage::MockStorage;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let storage = Arc::new(MockStorage::new());
        let registry = DataSourceRegistry::new(Arc::clone(&storage));
        let user = UserId::now_v7();

        let first = registry
            .get_or_create(user, SourceKind::Manual, "User Journal", None)
            .unwrap();
        let second = registry
            .get_or_create(user, SourceKind::Manual, "User Journal", None)
            .unwrap();
        assert_eq!(first.data_source_id, second.data_source_id);
        assert_eq!(first.status, SourceStatus::Active);
        assert_eq!(storage.data_source_count(), 1);
    }

    #[test]
    fn test_external_source_keeps_provider() {
        let registry = DataSourceRegistry::new(Arc::new(MockStorage::new()));
        let source = registry
            .get_or_create(UserId::now_v7(), SourceKind::Portal, "Portal", Some("fasten"))
            .unwrap();
        assert_eq!(source.provider.as_deref(), Some("fasten"));
        assert_eq!(source.status, SourceStatus::Pending);
    }

    #[test]
    fn test_get_other_users_source_is_not_found() {
        let registry = DataSourceRegistry::new(Arc::new(MockStorage::new()));
        let source = registry
            .get_or_create(UserId::now_v7(), SourceKind::Device, "Watch", None)
            .unwrap();
        let err = registry
            .get(UserId::now_v7(), source.data_source_id)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_storage_failure_propagates() {
        let storage = Arc::new(MockStorage::new());
        storage.inject_failure(EntityType::DataSource);
        let registry = DataSourceRegistry::new(storage);
        let err = registry
            .get_or_create(UserId::now_v7(), SourceKind::Manual, "User Journal", None)
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
