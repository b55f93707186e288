use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn};

use crate::broadcast::{DocumentProgressEvent, ProgressBroadcaster, ProgressPhase};
use crate::db::DatabaseError;
use crate::extraction::{ExtractionError, PageExtractor, PageSource};
use crate::models::DocumentStatus;
use crate::sanitize::{short_hash, truncate_message};
use crate::store::MetadataStore;
use crate::worker::{JobHandler, PageArtifacts, PageJob, PageJobResult};

use super::cancellation::CancellationRegistry;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Attempts per page job, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt after a transient failure; doubles
    /// on each further attempt.
    pub retry_backoff: Duration,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            thumbnail_width: 200,
            thumbnail_height: 280,
        }
    }
}

/// Executes one page job: claim, extract, validate, text, thumbnail, with a
/// bounded retry loop and cooperative cancellation between steps.
///
/// The runner never records outcomes itself; it returns them so the
/// orchestrator stays the single place that moves pages to a terminal state.
pub struct PageJobRunner {
    store: Arc<dyn MetadataStore>,
    extractor: Arc<dyn PageExtractor>,
    cancellations: Arc<CancellationRegistry>,
    config: RunnerConfig,
    progress: Option<ProgressBroadcaster>,
}

impl PageJobRunner {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        extractor: Arc<dyn PageExtractor>,
        cancellations: Arc<CancellationRegistry>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            cancellations,
            config,
            progress: None,
        }
    }

    /// Announces each claimed page on `progress`.
    pub fn with_progress(mut self, progress: ProgressBroadcaster) -> Self {
        self.progress = Some(progress);
        self
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.config
            .retry_backoff
            .saturating_mul(factor)
            .min(MAX_BACKOFF)
    }

    /// Claims the page, retrying transient store errors within the budget.
    /// The error carries the number of claim attempts made.
    fn claim(&self, job: &PageJob) -> Result<bool, (DatabaseError, u32)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.claim_page(&job.document_hash, job.page_number) {
                Ok(claimed) => return Ok(claimed),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    warn!(attempt, error = %e, "Page claim hit a busy store, retrying");
                    std::thread::sleep(self.backoff_for(attempt));
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    fn run_steps(
        &self,
        job: &PageJob,
        token: Option<&CancellationToken>,
    ) -> Result<PageArtifacts, ExtractionError> {
        let check = || {
            if token.map(|t| t.is_cancelled()).unwrap_or(false) {
                Err(ExtractionError::Cancelled)
            } else {
                Ok(())
            }
        };

        let source = PageSource {
            document_hash: job.document_hash.clone(),
            file_path: job.file_path.clone(),
        };

        let page_path = {
            let _step = info_span!("extract").entered();
            self.extractor.extract_page(&source, job.page_number)?
        };
        check()?;

        let (info, content) = {
            let _step = info_span!("text").entered();
            let info = self.extractor.validate_page_file(&page_path)?;
            (info, self.extractor.extract_text(&page_path)?)
        };
        check()?;

        let thumbnail = {
            let _step = info_span!("thumbnail").entered();
            self.extractor.generate_thumbnail(
                &page_path,
                self.config.thumbnail_width,
                self.config.thumbnail_height,
            )?
        };

        Ok(PageArtifacts {
            page_file_path: page_path,
            thumbnail_path: thumbnail.path,
            content,
            width: info.width,
            height: info.height,
            thumbnail_width: thumbnail.width,
            thumbnail_height: thumbnail.height,
        })
    }

    fn release(&self, job: &PageJob) {
        if let Err(e) = self.store.release_page(&job.document_hash, job.page_number) {
            error!(error = %e, "Failed to release page claim after cancellation");
        }
    }
}

impl JobHandler for PageJobRunner {
    fn handle(&self, job: PageJob) -> PageJobResult {
        let _span = info_span!(
            "page_job",
            document = %short_hash(&job.document_hash),
            page = job.page_number,
        )
        .entered();

        let token = self.cancellations.token(&job.document_hash);
        if token.as_ref().map(|t| t.is_cancelled()).unwrap_or(false) {
            debug!("Document cancelled before the job started");
            return PageJobResult::cancelled(job, 0);
        }

        match self.claim(&job) {
            Ok(true) => {
                if let Some(progress) = &self.progress {
                    progress.send(
                        DocumentProgressEvent::new(
                            &job.document_hash,
                            ProgressPhase::PageStarted,
                            DocumentStatus::Processing,
                            "Page claimed by worker",
                        )
                        .with_page(job.page_number),
                    );
                }
            }
            Ok(false) => {
                debug!("Page already claimed or document not processing");
                return PageJobResult::skipped(job, "page is not pending");
            }
            Err((e, attempts)) => {
                error!(attempts, error = %e, "Could not claim page");
                return PageJobResult::claim_failed(
                    job,
                    format!("Could not claim page: {}", e),
                    attempts,
                );
            }
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_steps(&job, token.as_ref()) {
                Ok(artifacts) => return PageJobResult::completed(job, artifacts, attempt),
                Err(ExtractionError::Cancelled) => {
                    debug!(attempt, "Cancellation observed mid-job, releasing claim");
                    self.release(&job);
                    return PageJobResult::cancelled(job, attempt);
                }
                Err(e) if attempt < max_attempts => {
                    let transient = e.is_transient();
                    warn!(
                        attempt,
                        max_attempts,
                        transient,
                        error = %truncate_message(&e.to_string(), 200),
                        "Page attempt failed"
                    );
                    if transient {
                        std::thread::sleep(self.backoff_for(attempt));
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Page failed, retry budget exhausted");
                    return PageJobResult::failed(job, e.to_string(), attempt);
                }
            }
        }
    }
}
