use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info, info_span, warn};

use crate::broadcast::{DocumentProgressEvent, ProgressPhase};
use crate::error::{FolioError, Result, StorageError};
use crate::extraction::{count_pages, inspect};
use crate::models::{Document, DocumentStatus, NewDocument, PageStatus};
use crate::sanitize::{redact_path, short_hash};
use crate::storage::paths;
use crate::worker::PageJob;

use super::{into_validation, invalid_state, Orchestrator, UploadRequest};

const PDF_MIME: &str = "application/pdf";

fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Trusts the bytes over the file name: a PDF signature wins, anything else
/// is rejected with whatever the extension suggested.
fn detect_mime(path: &Path, bytes: &[u8]) -> std::result::Result<&'static str, FolioError> {
    if inspect::has_pdf_signature(bytes) {
        return Ok(PDF_MIME);
    }
    let guessed = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream");
    Err(FolioError::Validation(format!(
        "unsupported file type '{}'; only PDF documents are accepted",
        guessed
    )))
}

impl Orchestrator {
    pub(super) fn upload_file(&self, request: &UploadRequest) -> Result<Document> {
        let filename = redact_path(&request.path);
        let _span = info_span!("upload", filename = %filename).entered();

        let bytes = std::fs::read(&request.path).map_err(|e| StorageError::ReadFile {
            path: request.path.clone(),
            source: e,
        })?;
        if bytes.is_empty() {
            return Err(FolioError::Validation("file is empty".to_string()));
        }
        let mime_type = detect_mime(&request.path, &bytes)?;
        let hash = content_hash(&bytes);

        if let Some(existing) = self.store.find_document(&hash)? {
            debug!(document = %short_hash(&hash), "Identical upload, returning existing document");
            return Ok(existing);
        }

        let file_path = paths::original(&hash);
        self.blobs.put(&file_path, &bytes)?;

        let title = request.title.clone().unwrap_or_else(|| {
            request
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Untitled")
                .to_string()
        });
        let (document, created) = self.store.insert_document(&NewDocument {
            hash: hash.clone(),
            title,
            filename: "original.pdf".to_string(),
            original_filename: filename,
            mime_type: mime_type.to_string(),
            file_path,
            file_size: bytes.len() as u64,
            metadata: request.metadata.clone(),
            created_by: request.created_by.clone(),
        })?;

        if created {
            info!(document = %short_hash(&hash), bytes = bytes.len(), "Document uploaded");
            self.emit_phase(
                &hash,
                ProgressPhase::Uploaded,
                DocumentStatus::Uploaded,
                "Document uploaded",
            );
        }
        Ok(document)
    }

    /// Reads the original blob and counts its pages.
    fn inspect_original(&self, document: &Document) -> std::result::Result<u32, FolioError> {
        let bytes = self.blobs.get(&document.file_path)?;
        count_pages(&bytes).map_err(into_validation)
    }

    pub(super) fn process_document(&self, hash: &str) -> Result<Document> {
        let document = self.require_document(hash)?;
        if document.status != DocumentStatus::Uploaded {
            debug!(
                document = %short_hash(hash),
                status = %document.status,
                "Process requested for a document that already left uploaded"
            );
            return Ok(document);
        }

        let _span = info_span!("process_document", document = %short_hash(hash)).entered();

        let page_count = match self.inspect_original(&document) {
            Ok(count) => count,
            Err(FolioError::Validation(message)) => {
                warn!(error = %message, "Document failed validation");
                let moved = self.store.transition_document(
                    hash,
                    DocumentStatus::Uploaded,
                    DocumentStatus::Failed,
                    Some(&message),
                )?;
                if moved {
                    self.emit(
                        DocumentProgressEvent::new(
                            hash,
                            ProgressPhase::Finalized,
                            DocumentStatus::Failed,
                            "Document failed validation",
                        )
                        .with_error(message.clone()),
                    );
                }
                return Err(FolioError::Validation(message));
            }
            Err(other) => return Err(other),
        };

        self.store.set_page_count(hash, page_count)?;
        self.emit_phase(
            hash,
            ProgressPhase::Validated,
            DocumentStatus::Uploaded,
            &format!("Validated {} pages", page_count),
        );

        if !self.store.transition_document(
            hash,
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            None,
        )? {
            debug!("Another caller started processing first");
            return self.require_document(hash);
        }

        self.start_run(hash, page_count)?;
        self.require_document(hash)
    }

    /// Creates any missing page rows, arms a fresh cancellation token,
    /// indexes the document fields and queues every pending page.
    fn start_run(&self, hash: &str, page_count: u32) -> Result<()> {
        let created = self.store.create_pages(hash, page_count)?;
        self.cancellations.register(hash);

        let document = self.require_document(hash)?;
        self.index_document(&document);

        let queued = self.enqueue_pending(&document)?;
        info!(
            document = %short_hash(hash),
            page_count,
            created,
            queued,
            "Processing started"
        );
        self.emit(
            DocumentProgressEvent::new(
                hash,
                ProgressPhase::PagesQueued,
                DocumentStatus::Processing,
                &format!("Queued {} of {} pages", queued, page_count),
            )
            .with_counts(self.store.page_status_counts(hash)?),
        );

        // Nothing left to run, e.g. a retry where every page already completed.
        if queued == 0 {
            self.settle(hash)?;
        }
        Ok(())
    }

    /// Publishes one job per pending page until the run is cancelled.
    /// `enqueue` may block on a full queue, so the token is checked before
    /// every job.
    fn enqueue_pending(&self, document: &Document) -> Result<usize> {
        let pending = self
            .store
            .page_numbers_with_status(&document.hash, PageStatus::Pending)?;
        let mut queued = 0;
        for &page_number in &pending {
            if self.cancellations.is_cancelled(&document.hash) {
                debug!(
                    document = %short_hash(&document.hash),
                    queued,
                    withheld = pending.len() - queued,
                    "Cancellation observed, no further jobs dispatched"
                );
                break;
            }
            self.queue.enqueue(PageJob::new(
                &document.hash,
                page_number,
                &document.file_path,
            ))?;
            queued += 1;
        }
        Ok(queued)
    }

    pub(super) fn retry_document(&self, hash: &str) -> Result<Document> {
        let document = self.require_document(hash)?;
        if !matches!(
            document.status,
            DocumentStatus::Failed | DocumentStatus::Cancelled
        ) {
            return Err(invalid_state(&document, "retry", "failed or cancelled"));
        }

        let _span = info_span!("retry_document", document = %short_hash(hash)).entered();

        let page_count = match document.page_count {
            Some(count) => count,
            None => {
                let count = self.inspect_original(&document)?;
                self.store.set_page_count(hash, count)?;
                count
            }
        };

        let reset = self.store.reset_failed_pages(hash)?;
        if !self
            .store
            .transition_document(hash, document.status, DocumentStatus::Processing, None)?
        {
            debug!("Another caller retried first");
            return self.require_document(hash);
        }
        // Cached metadata still shows the old terminal status.
        self.cache.invalidate_document_cache(hash);

        info!(reset_pages = reset, from = %document.status, "Retrying document");
        self.emit_phase(
            hash,
            ProgressPhase::Retrying,
            DocumentStatus::Processing,
            &format!("Retrying, {} failed pages reset", reset),
        );

        self.start_run(hash, page_count)?;
        self.require_document(hash)
    }

    pub(super) fn cancel_document(&self, hash: &str) -> Result<Document> {
        let document = self.require_document(hash)?;
        if document.status != DocumentStatus::Processing {
            return Err(invalid_state(&document, "cancel", "processing"));
        }

        if !self.cancellations.cancel(hash) {
            // Run survived a restart without its token.
            self.cancellations.register(hash).cancel();
        }
        info!(document = %short_hash(hash), "Cancellation requested");
        self.emit_phase(
            hash,
            ProgressPhase::CancelRequested,
            DocumentStatus::Processing,
            "Cancellation requested",
        );

        self.settle(hash)?;
        self.require_document(hash)
    }

    pub(super) fn remove_document(&self, hash: &str) -> Result<()> {
        let document = self.require_document(hash)?;
        let _span = info_span!("delete_document", document = %short_hash(hash)).entered();

        self.cancellations.cancel(hash);
        self.search.remove_from_index(hash);
        self.cache.invalidate_document_cache(hash);

        let page_files = self.extractor.cleanup_page_files(hash)?;
        let originals = self
            .blobs
            .delete_prefix(&paths::document_prefix(hash))?;
        self.store.delete_document(hash)?;
        self.cancellations.unregister(hash);

        info!(
            status = %document.status,
            removed_files = page_files + originals,
            "Document deleted"
        );
        self.emit_phase(hash, ProgressPhase::Deleted, document.status, "Document deleted");
        Ok(())
    }

    /// Startup recovery for documents left `processing` by a previous
    /// process: releases orphaned claims and re-queues pending pages.
    /// Returns the number of documents resumed.
    pub fn resume_interrupted(&self) -> Result<usize> {
        let interrupted = self.store.documents_with_status(DocumentStatus::Processing)?;
        for document in &interrupted {
            let released = self.store.release_claimed_pages(&document.hash)?;
            if self.cancellations.token(&document.hash).is_none() {
                self.cancellations.register(&document.hash);
            }
            self.index_document(document);
            let queued = self.enqueue_pending(document)?;
            info!(
                document = %short_hash(&document.hash),
                released,
                queued,
                "Resumed interrupted document"
            );
            if queued == 0 {
                self.settle(&document.hash)?;
            }
        }
        Ok(interrupted.len())
    }
}
