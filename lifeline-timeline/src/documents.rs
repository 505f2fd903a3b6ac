//! Document upload and download proxy.
//!
//! Uploads put the blob first and write metadata second. If any metadata
//! write fails the blob is deleted again, best effort. Downloads resolve the
//! artifact through the user-scoped store before the blob store is touched,
//! so storage paths never leave this module.

use crate::identity::{Credential, IdentityProvider};
use crate::timeline::Timeline;
use chrono::Utc;
use lifeline_core::{
    truncate_summary, AuditAction, CaptureMethod, DocumentArtifact, DocumentDetails, DocumentId,
    EntityIdType, EntityType, EventDetails, LifelineError, LifelineResult, NewTimelineEvent,
    ProvenanceMetadata, SourceKind, Timestamp, UserId, ValidationError, UPLOAD_SOURCE_NAME,
};
use lifeline_storage::{random_blob_id, sanitize_filename, storage_path, BlobStore, StorageTrait};

use crate::audit::AuditOutbox;

const FALLBACK_DOWNLOAD_NAME: &str = "document";
const UPLOAD_SUMMARY: &str = "Document uploaded";

/// A file as received from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    pub bytes: Vec<u8>,
    pub original_filename: String,
    pub content_type: String,
    pub title: Option<String>,
    pub doc_type: Option<String>,
    pub occurred_at: Option<Timestamp>,
    pub notes: Option<String>,
}

impl DocumentUpload {
    pub fn new(
        bytes: Vec<u8>,
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            original_filename: original_filename.into(),
            content_type: content_type.into(),
            title: None,
            doc_type: None,
            occurred_at: None,
            notes: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }
}

/// Response body and headers for a proxied download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDownload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
    /// `attachment; filename="<sanitized name>"`
    pub content_disposition: String,
}

impl<S: StorageTrait, B: BlobStore> Timeline<S, B> {
    /// Store an uploaded file and append its `document_uploaded` event.
    pub async fn upload_document(
        &self,
        user_id: UserId,
        upload: DocumentUpload,
    ) -> LifelineResult<DocumentArtifact> {
        self.check_upload(&upload)?;

        let source =
            self.sources
                .get_or_create(user_id, SourceKind::Upload, UPLOAD_SOURCE_NAME, None)?;
        let snapshot = self.consent.current_snapshot(user_id)?;

        let now = Utc::now();
        let path = storage_path(user_id, now, &random_blob_id(), &upload.original_filename);
        let file_size = upload.bytes.len() as u64;
        let DocumentUpload {
            bytes,
            original_filename,
            content_type,
            title,
            doc_type,
            occurred_at,
            notes,
        } = upload;

        self.blobs.put(&path, bytes, &content_type).await?;

        let committed = (|| {
            let metadata = ProvenanceMetadata::new()
                .with("content_type", content_type.as_str())?
                .with("file_size", file_size)?;
            let provenance = self.provenance.record(
                user_id,
                source.data_source_id,
                CaptureMethod::Upload,
                metadata,
            )?;

            let artifact = DocumentArtifact {
                document_id: DocumentId::now_v7(),
                user_id,
                title: title.clone(),
                doc_type: doc_type.clone(),
                occurred_at,
                storage_path: path.clone(),
                content_type: content_type.clone(),
                file_size: Some(file_size),
                original_filename: Some(original_filename.clone()),
                provenance_id: provenance.provenance_id,
                created_at: now,
            };
            let headline = title.as_deref().unwrap_or(UPLOAD_SUMMARY);
            let event = NewTimelineEvent {
                user_id,
                event_time: occurred_at.unwrap_or(now),
                title: title.clone(),
                summary: truncate_summary(headline, self.config.summary_max_chars),
                details: EventDetails::DocumentUploaded(DocumentDetails {
                    document_id: artifact.document_id,
                    title,
                    doc_type,
                    original_filename: Some(original_filename),
                    content_type,
                    notes,
                }),
                provenance_id: provenance.provenance_id,
                consent_snapshot_id: snapshot.consent_snapshot_id,
            };
            self.log.append_with_document(&artifact, event)?;
            Ok::<_, LifelineError>(artifact)
        })();

        let artifact = match committed {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Document metadata write failed, removing blob");
                if let Err(cleanup) = self.blobs.delete(&path).await {
                    tracing::warn!(user_id = %user_id, error = %cleanup, "Blob cleanup failed");
                }
                return Err(e);
            }
        };

        let mut outbox = AuditOutbox::new();
        outbox.push(
            user_id,
            AuditAction::DocumentUploaded,
            EntityType::DocumentArtifact,
            artifact.document_id,
        );
        self.audit.flush(outbox);

        tracing::debug!(user_id = %user_id, document_id = %artifact.document_id, file_size, "Uploaded document");
        Ok(artifact)
    }

    fn check_upload(&self, upload: &DocumentUpload) -> Result<(), ValidationError> {
        if upload.bytes.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "file".to_string(),
            });
        }
        let limit = usize::try_from(self.config.max_upload_bytes).unwrap_or(usize::MAX);
        if upload.bytes.len() > limit {
            return Err(ValidationError::TooLong {
                field: "file".to_string(),
                limit,
                actual: upload.bytes.len(),
            });
        }
        if upload.content_type.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "content_type".to_string(),
            });
        }
        Ok(())
    }

    pub fn get_document(&self, user_id: UserId, id: DocumentId) -> LifelineResult<DocumentArtifact> {
        self.storage
            .document_get(user_id, id)?
            .ok_or_else(|| LifelineError::not_found(EntityType::DocumentArtifact, id))
    }

    /// Serve a document owned by `user_id` as an attachment.
    pub async fn download_document(
        &self,
        user_id: UserId,
        id: DocumentId,
    ) -> LifelineResult<DocumentDownload> {
        let artifact = self.get_document(user_id, id)?;
        let blob = self.blobs.get(&artifact.storage_path).await?;

        let filename = sanitize_filename(
            artifact
                .original_filename
                .as_deref()
                .unwrap_or(FALLBACK_DOWNLOAD_NAME),
        );

        let mut outbox = AuditOutbox::new();
        outbox.push(
            user_id,
            AuditAction::DocumentDownloaded,
            EntityType::DocumentArtifact,
            artifact.document_id,
        );
        self.audit.flush(outbox);

        Ok(DocumentDownload {
            bytes: blob.bytes,
            content_type: artifact.content_type,
            content_disposition: format!("attachment; filename=\"{filename}\""),
            filename,
        })
    }

    /// Resolve the caller, then serve the document. Unauthenticated callers
    /// never reach storage.
    pub async fn download_for_credential(
        &self,
        identity: &dyn IdentityProvider,
        credential: &Credential,
        id: DocumentId,
    ) -> LifelineResult<DocumentDownload> {
        let user_id = identity.current_user_id(credential).await?;
        self.download_document(user_id, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentityProvider;
    use lifeline_core::{BlobError, TimelineConfig};
    use lifeline_storage::{InMemoryBlobStore, MockStorage};
    use std::sync::Arc;

    fn timeline_with(config: TimelineConfig) -> Timeline<MockStorage, InMemoryBlobStore> {
        Timeline::new(
            Arc::new(MockStorage::new()),
            Arc::new(InMemoryBlobStore::new()),
            config,
        )
    }

    fn pdf() -> DocumentUpload {
        DocumentUpload::new(b"%PDF-1.7".to_vec(), "lab results (march).pdf", "application/pdf")
            .with_title("Lab results")
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let timeline = timeline_with(TimelineConfig::default());
        let user = UserId::now_v7();
        let artifact = timeline.upload_document(user, pdf()).await.unwrap();

        assert!(artifact.storage_path.starts_with(&format!("{user}/")));
        assert!(artifact.storage_path.ends_with("-labresultsmarch.pdf"));
        assert_eq!(artifact.file_size, Some(8));
        assert!(timeline.blobs().contains(&artifact.storage_path).await);

        let download = timeline
            .download_document(user, artifact.document_id)
            .await
            .unwrap();
        assert_eq!(download.bytes, b"%PDF-1.7");
        assert_eq!(download.content_type, "application/pdf");
        assert_eq!(
            download.content_disposition,
            "attachment; filename=\"labresultsmarch.pdf\""
        );

        let actions: Vec<_> = timeline
            .recent_audit(user, None)
            .unwrap()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(
            actions,
            [AuditAction::DocumentDownloaded, AuditAction::DocumentUploaded]
        );
    }

    #[tokio::test]
    async fn test_empty_and_oversize_uploads_rejected() {
        let timeline = timeline_with(TimelineConfig {
            max_upload_bytes: 4,
            ..Default::default()
        });
        let user = UserId::now_v7();

        let empty = DocumentUpload::new(Vec::new(), "a.txt", "text/plain");
        assert!(matches!(
            timeline.upload_document(user, empty).await,
            Err(LifelineError::Validation(ValidationError::RequiredFieldMissing { .. }))
        ));
        assert!(matches!(
            timeline.upload_document(user, pdf()).await,
            Err(LifelineError::Validation(ValidationError::TooLong { limit: 4, .. }))
        ));
        assert!(timeline.blobs().is_empty().await);
        assert_eq!(timeline.storage().data_source_count(), 0);
    }

    #[tokio::test]
    async fn test_metadata_failure_removes_blob() {
        let timeline = timeline_with(TimelineConfig::default());
        timeline.storage().inject_failure(EntityType::DocumentArtifact);

        let err = timeline
            .upload_document(UserId::now_v7(), pdf())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(timeline.blobs().is_empty().await);
        assert_eq!(timeline.storage().event_count(), 0);
        assert_eq!(timeline.storage().document_count(), 0);
    }

    #[tokio::test]
    async fn test_event_failure_leaves_no_artifact() {
        let timeline = timeline_with(TimelineConfig::default());
        timeline.storage().inject_failure(EntityType::TimelineEvent);
        let user = UserId::now_v7();

        let err = timeline.upload_document(user, pdf()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(timeline.blobs().is_empty().await);
        assert_eq!(timeline.storage().document_count(), 0);
        assert_eq!(timeline.storage().event_count(), 0);
        assert!(timeline.recent_audit(user, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_returns_original_error() {
        let timeline = timeline_with(TimelineConfig::default());
        timeline.storage().inject_failure(EntityType::TimelineEvent);
        timeline.blobs().set_fail_deletes(true);

        let err = timeline
            .upload_document(UserId::now_v7(), pdf())
            .await
            .unwrap_err();
        assert!(matches!(err, LifelineError::Storage(_)));
        assert_eq!(timeline.blobs().len().await, 1);
        assert_eq!(timeline.storage().document_count(), 0);
    }

    #[tokio::test]
    async fn test_blob_put_failure_writes_no_metadata() {
        let timeline = timeline_with(TimelineConfig::default());
        timeline.blobs().set_fail_puts(true);
        let err = timeline
            .upload_document(UserId::now_v7(), pdf())
            .await
            .unwrap_err();
        assert!(matches!(err, LifelineError::Blob(BlobError::PutFailed { .. })));
        assert_eq!(timeline.storage().provenance_count(), 0);
        assert_eq!(timeline.storage().document_count(), 0);
    }

    #[tokio::test]
    async fn test_download_of_foreign_document_is_not_found() {
        let timeline = timeline_with(TimelineConfig::default());
        let artifact = timeline
            .upload_document(UserId::now_v7(), pdf())
            .await
            .unwrap();
        let err = timeline
            .download_document(UserId::now_v7(), artifact.document_id)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_download_for_credential() {
        let timeline = timeline_with(TimelineConfig::default());
        let user = UserId::now_v7();
        let artifact = timeline.upload_document(user, pdf()).await.unwrap();
        let identity = StaticIdentityProvider::new().with_user(Credential::new("t"), user);

        let download = timeline
            .download_for_credential(&identity, &Credential::new("t"), artifact.document_id)
            .await
            .unwrap();
        assert_eq!(download.filename, "labresultsmarch.pdf");

        assert_eq!(
            timeline
                .download_for_credential(&identity, &Credential::new("nope"), artifact.document_id)
                .await,
            Err(LifelineError::Unauthenticated)
        );
    }
}
