//! Blob storage for uploaded documents.
//!
//! Documents are stored under
//! `{user_id}/{YYYY}/{MM}/{random_id}-{sanitized_filename}`. Paths are an
//! internal detail and never leave the service boundary.

use async_trait::async_trait;
use chrono::Datelike;
use lifeline_core::{BlobError, Timestamp, UserId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Characters not allowed in a stored filename.
static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("Invalid filename regex"));

const FALLBACK_FILENAME: &str = "file";

/// Strip every character outside `[A-Za-z0-9._-]`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(name, "");
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned.into_owned()
    }
}

/// 16 lowercase hex characters.
pub fn random_blob_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Build the storage path for a user's upload.
pub fn storage_path(user_id: UserId, at: Timestamp, random_id: &str, filename: &str) -> String {
    format!(
        "{}/{:04}/{:02}/{}-{}",
        user_id,
        at.year(),
        at.month(),
        random_id,
        sanitize_filename(filename)
    )
}

/// A stored object and its declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// External binary storage keyed by path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError>;

    async fn get(&self, path: &str) -> Result<StoredBlob, BlobError>;

    /// Deleting a missing path is not an error.
    async fn delete(&self, path: &str) -> Result<(), BlobError>;
}

/// In-memory blob store with failure injection.
///
/// Clones share the same contents.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, StoredBlob>>>,
    fail_puts: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.blobs.read().await.contains_key(path)
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BlobError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BlobError::PutFailed {
                path: path.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let blob = StoredBlob {
            bytes,
            content_type: content_type.to_string(),
        };
        self.blobs.write().await.insert(path.to_string(), blob);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<StoredBlob, BlobError> {
        self.blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                path: path.to_string(),
            })
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BlobError::DeleteFailed {
                path: path.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.blobs.write().await.remove(path);
        Ok(())
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_sanitized_names_are_safe(name in ".{0,40}") {
            let clean = sanitize_filename(&name);
            prop_assert!(!clean.is_empty());
            prop_assert!(clean
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'));
            prop_assert!(!clean.contains('/'));
        }
    }
}
