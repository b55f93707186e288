use serde_json::json;
use tracing::{debug, info, info_span, warn};

use crate::broadcast::{DocumentProgressEvent, ProgressPhase};
use crate::error::Result;
use crate::models::{
    DocumentStatus, Metadata, PageCompletion, PageContent, PageFilter, PageStatus,
};
use crate::sanitize::{short_hash, truncate_message};
use crate::worker::{PageArtifacts, PageJobResult, PageOutcome};

use super::Orchestrator;

const MAX_EVENT_ERROR_CHARS: usize = 300;

fn page_metadata(artifacts: &PageArtifacts, attempts: u32) -> Metadata {
    Metadata::from([
        ("width".to_string(), json!(artifacts.width)),
        ("height".to_string(), json!(artifacts.height)),
        ("thumbnailWidth".to_string(), json!(artifacts.thumbnail_width)),
        ("thumbnailHeight".to_string(), json!(artifacts.thumbnail_height)),
        ("attempts".to_string(), json!(attempts)),
    ])
}

impl Orchestrator {
    pub(super) fn record_page_result(&self, result: PageJobResult) -> Result<()> {
        let hash = result.job.document_hash.clone();
        let page_number = result.job.page_number;
        let _span = info_span!(
            "page_result",
            document = %short_hash(&hash),
            page = page_number,
        )
        .entered();

        match result.outcome {
            PageOutcome::Completed(artifacts) => {
                let completion = PageCompletion {
                    metadata: page_metadata(&artifacts, result.attempts),
                    content: artifacts.content,
                    page_file_path: artifacts.page_file_path,
                    thumbnail_path: artifacts.thumbnail_path,
                };
                if self.store.complete_page(&hash, page_number, &completion)? {
                    self.index_page(&hash, page_number, &completion.content);
                    self.cache.cache_page_content(
                        &PageContent {
                            document_hash: hash.clone(),
                            page_number,
                            content: completion.content.clone(),
                            status: PageStatus::Completed,
                            page_file_path: Some(completion.page_file_path.clone()),
                            thumbnail_path: Some(completion.thumbnail_path.clone()),
                            metadata: completion.metadata.clone(),
                        },
                        None,
                    );
                    debug!(attempts = result.attempts, "Page completed");
                    self.emit(
                        DocumentProgressEvent::new(
                            &hash,
                            ProgressPhase::PageCompleted,
                            DocumentStatus::Processing,
                            &format!("Page {} completed", page_number),
                        )
                        .with_page(page_number)
                        .with_counts(self.store.page_status_counts(&hash)?),
                    );
                } else {
                    debug!("Page completion arrived after the page left processing");
                }
            }
            PageOutcome::Failed { error: message } => {
                if self.store.fail_page(&hash, page_number, &message)? {
                    warn!(attempts = result.attempts, error = %message, "Page failed");
                    self.emit(
                        DocumentProgressEvent::new(
                            &hash,
                            ProgressPhase::PageFailed,
                            DocumentStatus::Processing,
                            &format!("Page {} failed", page_number),
                        )
                        .with_page(page_number)
                        .with_error(truncate_message(&message, MAX_EVENT_ERROR_CHARS))
                        .with_counts(self.store.page_status_counts(&hash)?),
                    );
                } else {
                    debug!("Page failure arrived after the page left processing");
                }
            }
            PageOutcome::Cancelled => {
                self.emit(
                    DocumentProgressEvent::new(
                        &hash,
                        ProgressPhase::PageCancelled,
                        DocumentStatus::Processing,
                        &format!("Page {} skipped after cancellation", page_number),
                    )
                    .with_page(page_number),
                );
            }
            PageOutcome::Skipped { reason } => {
                debug!(reason = %reason, "Page job skipped");
            }
            PageOutcome::ClaimFailed { error: message } => {
                // Nothing re-queues the page; it must turn terminal for the
                // document to settle.
                if self.cancellations.is_cancelled(&hash) {
                    debug!("Claim failed after cancellation, page stays pending");
                } else if self.store.fail_unclaimed_page(&hash, page_number, &message)? {
                    warn!(attempts = result.attempts, error = %message, "Page could not be claimed");
                    self.emit(
                        DocumentProgressEvent::new(
                            &hash,
                            ProgressPhase::PageFailed,
                            DocumentStatus::Processing,
                            &format!("Page {} failed", page_number),
                        )
                        .with_page(page_number)
                        .with_error(truncate_message(&message, MAX_EVENT_ERROR_CHARS))
                        .with_counts(self.store.page_status_counts(&hash)?),
                    );
                } else {
                    debug!("Claim failure arrived after the page left pending");
                }
            }
        }

        self.settle(&hash)?;
        Ok(())
    }

    /// Moves a `processing` document to its terminal status once its pages
    /// allow it. Safe to call at any time and from any thread: the store
    /// guards admit one winner, losers return `None`.
    pub(super) fn settle(&self, hash: &str) -> Result<Option<DocumentStatus>> {
        let Some(document) = self.store.find_document(hash)? else {
            return Ok(None);
        };
        if document.status != DocumentStatus::Processing {
            return Ok(None);
        }

        if self.cancellations.is_cancelled(hash) {
            if self.store.complete_cancellation(hash)? {
                self.cancellations.unregister(hash);
                self.cache.invalidate_document_cache(hash);
                let counts = self.store.page_status_counts(hash)?;
                info!(
                    document = %short_hash(hash),
                    completed = counts.completed,
                    "Document cancelled"
                );
                self.emit(
                    DocumentProgressEvent::new(
                        hash,
                        ProgressPhase::Finalized,
                        DocumentStatus::Cancelled,
                        "Processing cancelled",
                    )
                    .with_counts(counts),
                );
                return Ok(Some(DocumentStatus::Cancelled));
            }
            return Ok(None);
        }

        let counts = self.store.page_status_counts(hash)?;
        if counts.total() == 0 || !counts.all_terminal() {
            return Ok(None);
        }

        if counts.failed == 0 {
            self.ensure_pages_indexed(hash)?;
            if !self
                .store
                .finalize_document(hash, DocumentStatus::Completed, None)?
            {
                debug!(document = %short_hash(hash), "Finalization already handled");
                return Ok(None);
            }
            self.cancellations.unregister(hash);
            // Results cached mid-run listed the document before it was searchable.
            self.cache.invalidate_search_results();
            let warmed = self.warm_document_cache(hash)?;
            info!(
                document = %short_hash(hash),
                pages = counts.completed,
                warmed,
                "Document completed"
            );
            self.emit(
                DocumentProgressEvent::new(
                    hash,
                    ProgressPhase::Finalized,
                    DocumentStatus::Completed,
                    "Processing completed",
                )
                .with_counts(counts),
            );
            return Ok(Some(DocumentStatus::Completed));
        }

        let failed = self
            .store
            .page_numbers_with_status(hash, PageStatus::Failed)?;
        let message = format!(
            "Processing failed for pages: {}",
            failed
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if !self
            .store
            .finalize_document(hash, DocumentStatus::Failed, Some(&message))?
        {
            debug!(document = %short_hash(hash), "Finalization already handled");
            return Ok(None);
        }
        self.cancellations.unregister(hash);
        self.cache.invalidate_document_cache(hash);
        warn!(document = %short_hash(hash), failed = ?failed, "Document failed");
        self.emit(
            DocumentProgressEvent::new(
                hash,
                ProgressPhase::Finalized,
                DocumentStatus::Failed,
                "Processing failed",
            )
            .with_counts(counts)
            .with_error(message),
        );
        Ok(Some(DocumentStatus::Failed))
    }

    /// Indexes any completed page the search index lost, so a document is
    /// only marked searchable with every page in the index.
    fn ensure_pages_indexed(&self, hash: &str) -> Result<()> {
        let indexed = self.search.indexed_pages(hash);
        let (pages, _) = self.store.list_pages(
            hash,
            &PageFilter {
                status: Some(PageStatus::Completed),
                limit: Some(u64::from(u32::MAX)),
                offset: None,
            },
        )?;
        for page in pages {
            if indexed.binary_search(&page.page_number).is_err() {
                self.index_page(
                    hash,
                    page.page_number,
                    page.content.as_deref().unwrap_or_default(),
                );
            }
        }
        Ok(())
    }

    /// Loads metadata and every page once and writes them to the cache.
    pub fn warm_document_cache(&self, hash: &str) -> Result<usize> {
        let document = self.require_document(hash)?;
        let (pages, _) = self.store.list_pages(
            hash,
            &PageFilter {
                status: Some(PageStatus::Completed),
                limit: Some(u64::from(u32::MAX)),
                offset: None,
            },
        )?;
        let contents: Vec<PageContent> = pages.iter().map(PageContent::from).collect();
        Ok(self.cache.warm_document_cache(&document, &contents))
    }
}
