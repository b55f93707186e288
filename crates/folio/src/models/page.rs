//! Page entity, owned exclusively by one document.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::Metadata;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Pending => "pending",
            PageStatus::Processing => "processing",
            PageStatus::Completed => "completed",
            PageStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PageStatus::Completed | PageStatus::Failed)
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PageStatus::Pending),
            "processing" => Ok(PageStatus::Processing),
            "completed" => Ok(PageStatus::Completed),
            "failed" => Ok(PageStatus::Failed),
            other => Err(format!("unknown page status '{}'", other)),
        }
    }
}

/// Snapshot of a page row, joined with its parent's hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub document_id: i64,
    pub document_hash: String,
    pub page_number: u32,
    pub content: Option<String>,
    pub page_file_path: Option<String>,
    pub thumbnail_path: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub status: PageStatus,
    pub processing_error: Option<String>,
    pub is_parsed: bool,
    /// Times a worker has claimed the page since its last reset.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Artifacts recorded when a page job succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCompletion {
    pub content: String,
    pub page_file_path: String,
    pub thumbnail_path: String,
    pub metadata: Metadata,
}

/// Per-status page tallies for one document.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageStatusCounts {
    pub pending: u32,
    pub processing: u32,
    pub completed: u32,
    pub failed: u32,
}

impl PageStatusCounts {
    pub fn total(&self) -> u32 {
        self.pending + self.processing + self.completed + self.failed
    }

    /// True when no page is waiting for or holding a worker.
    pub fn all_terminal(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }
}

#[derive(Debug, Default, Clone)]
pub struct PageFilter {
    pub status: Option<PageStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Cacheable view of a page's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    pub document_hash: String,
    pub page_number: u32,
    pub content: String,
    pub status: PageStatus,
    pub page_file_path: Option<String>,
    pub thumbnail_path: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<&Page> for PageContent {
    fn from(page: &Page) -> Self {
        Self {
            document_hash: page.document_hash.clone(),
            page_number: page.page_number,
            content: page.content.clone().unwrap_or_default(),
            status: page.status,
            page_file_path: page.page_file_path.clone(),
            thumbnail_path: page.thumbnail_path.clone(),
            metadata: page.metadata.clone(),
        }
    }
}
