//! Job queue.
//!
//! Jobs are rows keyed by `(user_id, idempotency_key)`. Enqueueing the same
//! payload twice returns the existing job. Status moves
//! `pending -> running -> complete | failed` through compare-and-set updates.

use lifeline_core::{
    derive_idempotency_key, DomainError, EntityType, Job, JobId, JobStatus, JobType,
    LifelineError, LifelineResult, StorageError, UserId,
};
use lifeline_storage::StorageTrait;
use std::sync::Arc;

#[derive(Debug)]
pub struct JobQueue<S> {
    storage: Arc<S>,
}

impl<S> Clone for JobQueue<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: StorageTrait> JobQueue<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Create a pending job, or return the job already filed under the same
    /// idempotency key. The boolean is true when a new job was created.
    pub fn enqueue(
        &self,
        user_id: UserId,
        job_type: JobType,
        payload: serde_json::Value,
    ) -> LifelineResult<(Job, bool)> {
        let key = derive_idempotency_key(job_type, &payload);
        if let Some(existing) = self.storage.job_find_by_key(user_id, &key)? {
            return Ok((existing, false));
        }

        let job = Job::new(user_id, job_type, key, payload);
        match self.storage.job_insert(&job) {
            Ok(()) => {
                tracing::debug!(user_id = %user_id, job_id = %job.job_id, job_type = %job_type, "Enqueued job");
                Ok((job, true))
            }
            Err(e) if e.is_conflict() => self
                .storage
                .job_find_by_key(user_id, &job.idempotency_key)?
                .map(|existing| (existing, false))
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, user_id: UserId, id: JobId) -> LifelineResult<Job> {
        self.storage
            .job_get(user_id, id)?
            .ok_or_else(|| LifelineError::not_found(EntityType::Job, id))
    }

    /// Claim a pending job. Fails if another runner already claimed it.
    pub fn start(&self, user_id: UserId, id: JobId) -> LifelineResult<Job> {
        self.storage
            .job_update_status(user_id, id, JobStatus::Pending, JobStatus::Running, None)
    }

    pub fn complete(&self, user_id: UserId, id: JobId) -> LifelineResult<Job> {
        let job = self.storage.job_update_status(
            user_id,
            id,
            JobStatus::Running,
            JobStatus::Complete,
            None,
        )?;
        tracing::debug!(user_id = %user_id, job_id = %id, "Job complete");
        Ok(job)
    }

    pub fn fail(&self, user_id: UserId, id: JobId, code: &str) -> LifelineResult<Job> {
        let job = self.storage.job_update_status(
            user_id,
            id,
            JobStatus::Running,
            JobStatus::Failed,
            Some(code.to_string()),
        )?;
        tracing::warn!(user_id = %user_id, job_id = %id, error_code = code, "Job failed");
        Ok(job)
    }
}

/// Stable machine-readable code for an error, stored on failed jobs and
/// sources. Never includes the error message.
pub fn error_code(error: &LifelineError) -> &'static str {
    match error {
        LifelineError::Validation(_) => "validation_failed",
        LifelineError::NotFound { .. } => "not_found",
        LifelineError::Conflict(_) => "conflict",
        LifelineError::Storage(StorageError::LockPoisoned) => "storage_poisoned",
        LifelineError::Storage(_) => "storage_unavailable",
        LifelineError::Domain(DomainError::InvalidTransition { .. }) => "invalid_transition",
        LifelineError::Domain(DomainError::NotExternalSource { .. }) => "not_external_source",
        LifelineError::Domain(_) => "domain_rule",
        LifelineError::Blob(_) => "blob_store",
        LifelineError::Config(_) => "config",
        LifelineError::Unauthenticated => "unauthenticated",
    }
}
