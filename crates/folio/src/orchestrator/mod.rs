//! Drives documents from `uploaded` through per-page extraction to a
//! terminal status.
//!
//! The orchestrator never runs extraction itself. It validates, creates page
//! rows and publishes one [`PageJob`](crate::worker::PageJob) per page; workers report back through
//! [`DocumentProcessor::handle_page_result`], which records the outcome and
//! then tries to settle the document. Every status change is a conditional
//! update in the store, so concurrent callbacks, retries and cancellations
//! resolve to exactly one winner.

mod completion;
mod lifecycle;
mod queries;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::broadcast::{DocumentProgressEvent, ProgressBroadcaster, ProgressPhase};
use crate::cache::{CacheStats, DocumentCache};
use crate::error::{FolioError, Result};
use crate::extraction::{ExtractionError, PageExtractor};
use crate::models::{Document, DocumentStatus, Metadata, PageStatusCounts};
use crate::pipeline::CancellationRegistry;
use crate::search::{SearchIndex, SearchStats};
use crate::storage::{BlobStore, BlobUsage};
use crate::store::MetadataStore;
use crate::worker::{JobQueue, PageJobResult};

/// A file that has arrived on local disk and should become a document.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub path: PathBuf,
    /// Defaults to the file stem.
    pub title: Option<String>,
    pub created_by: Option<String>,
    pub metadata: Metadata,
}

impl UploadRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Best-known progress of one document.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    pub document_hash: String,
    pub status: DocumentStatus,
    pub page_count: Option<u32>,
    pub pages: PageStatusCounts,
    pub progress_percent: f64,
    pub is_searchable: bool,
    pub processing_error: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolioStats {
    pub documents_by_status: BTreeMap<String, u64>,
    pub active_runs: usize,
    pub queued_jobs: usize,
    pub cache: CacheStats,
    pub search: SearchStats,
    pub blobs: BlobUsage,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub database: bool,
    pub storage: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// The document state machine.
pub trait DocumentProcessor: Send + Sync {
    /// Stores the file and creates an `uploaded` document. Identical bytes
    /// return the existing document.
    fn upload(&self, request: &UploadRequest) -> Result<Document>;

    /// Validates and fans out page jobs. A no-op returning the current state
    /// unless the document is `uploaded`.
    fn process(&self, hash: &str) -> Result<Document>;

    /// Records one page outcome and settles the document if possible.
    fn handle_page_result(&self, result: PageJobResult) -> Result<()>;

    /// Resumes a `failed` or `cancelled` document; completed pages are kept.
    fn retry_processing(&self, hash: &str) -> Result<Document>;

    fn cancel_processing(&self, hash: &str) -> Result<Document>;

    fn delete_document(&self, hash: &str) -> Result<()>;

    fn get_processing_status(&self, hash: &str) -> Result<ProcessingStatus>;
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_per_page: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_per_page: 20,
        }
    }
}

/// Collaborators injected into the [`Orchestrator`].
pub struct OrchestratorDeps {
    pub store: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub extractor: Arc<dyn PageExtractor>,
    pub cache: Arc<dyn DocumentCache>,
    pub search: Arc<dyn SearchIndex>,
    pub queue: Arc<dyn JobQueue>,
    pub cancellations: Arc<CancellationRegistry>,
    pub progress: ProgressBroadcaster,
    pub settings: OrchestratorSettings,
}

pub struct Orchestrator {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn PageExtractor>,
    cache: Arc<dyn DocumentCache>,
    search: Arc<dyn SearchIndex>,
    queue: Arc<dyn JobQueue>,
    cancellations: Arc<CancellationRegistry>,
    progress: ProgressBroadcaster,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            store: deps.store,
            blobs: deps.blobs,
            extractor: deps.extractor,
            cache: deps.cache,
            search: deps.search,
            queue: deps.queue,
            cancellations: deps.cancellations,
            progress: deps.progress,
            settings: deps.settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn search_index(&self) -> &Arc<dyn SearchIndex> {
        &self.search
    }

    pub fn cache(&self) -> &Arc<dyn DocumentCache> {
        &self.cache
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    pub fn progress(&self) -> &ProgressBroadcaster {
        &self.progress
    }

    fn require_document(&self, hash: &str) -> Result<Document> {
        self.store
            .find_document(hash)?
            .ok_or_else(|| FolioError::DocumentNotFound(hash.to_string()))
    }

    /// Any index write makes every cached search result stale.
    fn index_document(&self, document: &Document) {
        self.search.index_document(document);
        self.cache.invalidate_search_results();
    }

    fn index_page(&self, hash: &str, page_number: u32, content: &str) {
        self.search.index_page(hash, page_number, content);
        self.cache.invalidate_search_results();
    }

    fn emit(&self, event: DocumentProgressEvent) {
        self.progress.send(event);
    }

    fn emit_phase(&self, hash: &str, phase: ProgressPhase, status: DocumentStatus, message: &str) {
        self.emit(DocumentProgressEvent::new(hash, phase, status, message));
    }
}

/// Structural problems with the input are validation failures; storage
/// trouble keeps its own type so callers can tell it is worth retrying.
fn into_validation(error: ExtractionError) -> FolioError {
    match error {
        ExtractionError::Storage(e) => FolioError::Storage(e),
        other => FolioError::Validation(other.to_string()),
    }
}

fn invalid_state(
    document: &Document,
    operation: &'static str,
    expected: &'static str,
) -> FolioError {
    FolioError::InvalidState {
        document_hash: document.hash.clone(),
        status: document.status.to_string(),
        operation,
        expected,
    }
}
