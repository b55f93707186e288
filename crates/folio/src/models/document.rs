//! Document entity and its lifecycle states.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form key/value metadata attached to documents and pages.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Lifecycle state of a document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 5] = [
        DocumentStatus::Uploaded,
        DocumentStatus::Processing,
        DocumentStatus::Completed,
        DocumentStatus::Failed,
        DocumentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Cancelled => "cancelled",
        }
    }

    /// Allowed edges of the document state machine.
    ///
    /// `failed` and `cancelled` only leave through an explicit retry, and
    /// `completed` never leaves.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Uploaded, Processing)
                | (Uploaded, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Failed, Processing)
                | (Cancelled, Processing)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::Failed | DocumentStatus::Cancelled
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            "cancelled" => Ok(DocumentStatus::Cancelled),
            other => Err(format!("unknown document status '{}'", other)),
        }
    }
}

/// Snapshot of a document row.
///
/// The internal row id is never serialized: the content hash is the only
/// identifier that leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(skip)]
    pub id: i64,
    pub hash: String,
    pub title: String,
    pub filename: String,
    pub original_filename: String,
    pub mime_type: String,
    pub file_path: String,
    pub file_size: u64,
    pub page_count: Option<u32>,
    pub status: DocumentStatus,
    pub is_searchable: bool,
    #[serde(default)]
    pub metadata: Metadata,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub processing_error: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for inserting a new document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub hash: String,
    pub title: String,
    pub filename: String,
    pub original_filename: String,
    pub mime_type: String,
    pub file_path: String,
    pub file_size: u64,
    pub metadata: Metadata,
    pub created_by: Option<String>,
}

/// Query filter parameters for document listing.
#[derive(Debug, Default, Clone)]
pub struct DocumentFilter {
    pub status: Option<DocumentStatus>,
    pub created_by: Option<String>,
    pub is_searchable: Option<bool>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}
