use serde::Serialize;

use crate::error::WorkerError;

/// Descriptor for one page of extraction work. Delivery is at-least-once,
/// so handlers must tolerate seeing the same descriptor twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageJob {
    pub document_hash: String,
    pub page_number: u32,
    /// Blob path of the original document.
    pub file_path: String,
}

impl PageJob {
    pub fn new(document_hash: &str, page_number: u32, file_path: &str) -> Self {
        Self {
            document_hash: document_hash.to_string(),
            page_number,
            file_path: file_path.to_string(),
        }
    }
}

/// Everything a successful page job produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageArtifacts {
    pub page_file_path: String,
    pub thumbnail_path: String,
    pub content: String,
    pub width: f64,
    pub height: f64,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Completed(PageArtifacts),
    /// Retry budget exhausted; the page still holds its claim.
    Failed { error: String },
    /// Cancellation observed; the page was never claimed or its claim was
    /// released.
    Cancelled,
    /// Another delivery owns the page, or it is no longer pending.
    Skipped { reason: String },
    /// The store kept erroring on the claim; the page is still pending.
    ClaimFailed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageJobResult {
    pub job: PageJob,
    pub outcome: PageOutcome,
    pub attempts: u32,
}

impl PageJobResult {
    pub fn completed(job: PageJob, artifacts: PageArtifacts, attempts: u32) -> Self {
        Self {
            job,
            outcome: PageOutcome::Completed(artifacts),
            attempts,
        }
    }

    pub fn failed(job: PageJob, error: String, attempts: u32) -> Self {
        Self {
            job,
            outcome: PageOutcome::Failed { error },
            attempts,
        }
    }

    pub fn cancelled(job: PageJob, attempts: u32) -> Self {
        Self {
            job,
            outcome: PageOutcome::Cancelled,
            attempts,
        }
    }

    pub fn skipped(job: PageJob, reason: impl Into<String>) -> Self {
        Self {
            job,
            outcome: PageOutcome::Skipped {
                reason: reason.into(),
            },
            attempts: 0,
        }
    }

    pub fn claim_failed(job: PageJob, error: String, attempts: u32) -> Self {
        Self {
            job,
            outcome: PageOutcome::ClaimFailed { error },
            attempts,
        }
    }
}

/// Runs one page job to an outcome. Never panics on bad input; every
/// failure becomes a `PageOutcome`.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: PageJob) -> PageJobResult;
}

/// Where the orchestrator publishes page jobs.
pub trait JobQueue: Send + Sync {
    /// Blocks while the queue is at capacity.
    fn enqueue(&self, job: PageJob) -> Result<(), WorkerError>;
    fn pending(&self) -> usize;
}
