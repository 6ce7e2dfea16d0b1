//! C8 — save worker.
//!
//! Drains a bounded FIFO of completed sessions, uploading each as a single
//! blob and then recording its metadata. Grounded on `storage/traits.rs`'s
//! `#[async_trait]` backend-trait pattern for the two external interfaces
//! (§6), and on `storage/recording.rs`'s "log and move on" handling of a
//! non-fatal metadata failure (§7) after a successful upload.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use uuid::Uuid;

use crate::batch::Batch;

/// One session queued for persistence (§3 SaveItem).
#[derive(Debug, Clone, PartialEq)]
pub struct SaveItem {
    pub session_id: Uuid,
    pub blob: Vec<u8>,
    pub filename: String,
    pub first_detected_at: DateTime<Utc>,
    pub batch_count: usize,
    pub total_duration_ms: u64,
    pub retry_count: u32,
}

/// Combine a session's batches into one encoded blob (§4.7). A single-batch
/// session shortcuts to that batch's own bytes; the init segment is only
/// needed to stitch multiple batches back into one continuous stream.
pub fn build_blob(init_segment: &[u8], batches: &[Batch]) -> Vec<u8> {
    if batches.len() == 1 {
        return batches[0].concatenated();
    }
    let mut out = Vec::from(init_segment);
    for batch in batches {
        out.extend_from_slice(&batch.concatenated());
    }
    out
}

/// Blob storage — external interface (§6).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobStoreError {
    #[error("upload failed: {0}")]
    UploadFailed(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        blob: Vec<u8>,
        filename: String,
        session_id: Uuid,
    ) -> Result<(), BlobStoreError>;
}

/// What gets recorded about a saved session (§4.7 `record_session`).
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSessionMetadata {
    pub session_id: Uuid,
    pub filename: String,
    pub first_detected_at: DateTime<Utc>,
    pub batch_count: usize,
    pub total_duration_ms: u64,
}

/// Session metadata storage — external interface (§6).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataStoreError {
    #[error("record_session failed: {0}")]
    RecordFailed(String),
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn record_session(
        &self,
        metadata: &SavedSessionMetadata,
    ) -> Result<(), MetadataStoreError>;
}

/// Bounded FIFO with drop-oldest overflow (§4.7).
struct SaveQueue {
    items: VecDeque<SaveItem>,
    max_len: usize,
}

impl SaveQueue {
    fn new(max_len: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_len,
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Enqueue, dropping the oldest item first if already at capacity.
    fn enqueue(&mut self, item: SaveItem) -> Option<SaveItem> {
        let dropped = if self.items.len() >= self.max_len {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        dropped
    }

    fn pop_front(&mut self) -> Option<SaveItem> {
        self.items.pop_front()
    }

    fn push_back(&mut self, item: SaveItem) {
        self.items.push_back(item);
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// Outcome of one `run_once` pass, driving the caller's retry-backoff sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    QueueEmpty,
    Uploaded { session_id: Uuid },
    /// Failed and re-queued at the back; the caller should sleep the
    /// configured retry backoff before calling `run_once` again (§4.7).
    Failed { session_id: Uuid, retry_count: u32 },
}

/// Drains the save queue one item at a time (§4.7).
pub struct SaveWorker {
    queue: SaveQueue,
    blob_store: Arc<dyn BlobStore>,
    metadata_store: Arc<dyn MetadataStore>,
}

impl SaveWorker {
    pub fn new(
        max_len: usize,
        blob_store: Arc<dyn BlobStore>,
        metadata_store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            queue: SaveQueue::new(max_len),
            blob_store,
            metadata_store,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// `abort()` (§5): discard any in-flight save item without uploading.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Enqueue a completed session, logging and returning any item dropped
    /// to make room (§4.7 overflow policy).
    pub fn enqueue(&mut self, item: SaveItem) -> Option<SaveItem> {
        let dropped = self.queue.enqueue(item);
        if let Some(dropped) = &dropped {
            warn!(
                "save queue overflow: dropping oldest queued session {}",
                dropped.session_id
            );
        }
        dropped
    }

    /// Process the item at the front of the queue, if any.
    pub async fn run_once(&mut self) -> SaveOutcome {
        let Some(mut item) = self.queue.pop_front() else {
            return SaveOutcome::QueueEmpty;
        };

        let upload = self
            .blob_store
            .upload(item.blob.clone(), item.filename.clone(), item.session_id)
            .await;

        match upload {
            Ok(()) => {
                let metadata = SavedSessionMetadata {
                    session_id: item.session_id,
                    filename: item.filename.clone(),
                    first_detected_at: item.first_detected_at,
                    batch_count: item.batch_count,
                    total_duration_ms: item.total_duration_ms,
                };
                if let Err(err) = self.metadata_store.record_session(&metadata).await {
                    warn!(
                        "record_session failed for session {} (upload already succeeded): {err}",
                        item.session_id
                    );
                }
                SaveOutcome::Uploaded {
                    session_id: item.session_id,
                }
            }
            Err(err) => {
                warn!("upload failed for session {}: {err}", item.session_id);
                item.retry_count += 1;
                let retry_count = item.retry_count;
                let session_id = item.session_id;
                self.queue.push_back(item);
                SaveOutcome::Failed {
                    session_id,
                    retry_count,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "save_test.rs"]
mod tests;
