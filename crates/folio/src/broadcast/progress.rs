//! Document progress broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{DocumentStatus, PageStatusCounts};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Uploaded,
    Validated,
    PagesQueued,
    PageStarted,
    PageCompleted,
    PageFailed,
    PageCancelled,
    Finalized,
    CancelRequested,
    Retrying,
    Deleted,
}

impl std::fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressPhase::Uploaded => write!(f, "Uploaded"),
            ProgressPhase::Validated => write!(f, "Validated"),
            ProgressPhase::PagesQueued => write!(f, "Pages queued"),
            ProgressPhase::PageStarted => write!(f, "Page started"),
            ProgressPhase::PageCompleted => write!(f, "Page completed"),
            ProgressPhase::PageFailed => write!(f, "Page failed"),
            ProgressPhase::PageCancelled => write!(f, "Page cancelled"),
            ProgressPhase::Finalized => write!(f, "Finalized"),
            ProgressPhase::CancelRequested => write!(f, "Cancel requested"),
            ProgressPhase::Retrying => write!(f, "Retrying"),
            ProgressPhase::Deleted => write!(f, "Deleted"),
        }
    }
}

/// Progress event for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentProgressEvent {
    pub document_hash: String,
    pub phase: ProgressPhase,
    /// Document status as known when the event was emitted.
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<PageStatusCounts>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DocumentProgressEvent {
    pub fn new(hash: &str, phase: ProgressPhase, status: DocumentStatus, message: &str) -> Self {
        Self {
            document_hash: hash.to_string(),
            phase,
            status,
            page_number: None,
            counts: None,
            message: message.to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_page(mut self, page_number: u32) -> Self {
        self.page_number = Some(page_number);
        self
    }

    pub fn with_counts(mut self, counts: PageStatusCounts) -> Self {
        self.counts = Some(counts);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Fan-out of progress events to any number of subscribers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<DocumentProgressEvent>>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: DocumentProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentProgressEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
