use std::path::PathBuf;
use thiserror::Error;

use crate::extraction::ExtractionError;

#[derive(Error, Debug)]
pub enum FolioError {
    /// Bad input such as a non-PDF upload. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Page {page_number} of document {document_hash} not found")]
    PageNotFound {
        document_hash: String,
        page_number: u32,
    },

    #[error("Document {document_hash} is {status}; {operation} requires {expected}")]
    InvalidState {
        document_hash: String,
        status: String,
        operation: &'static str,
        expected: &'static str,
    },

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl FolioError {
    /// True for temporary blob/metadata store unavailability.
    pub fn is_transient(&self) -> bool {
        match self {
            FolioError::Storage(e) => e.is_transient(),
            FolioError::Database(e) => e.is_transient(),
            FolioError::Extraction(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete '{path}': {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob path: {0}")]
    InvalidPath(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        let source = match self {
            StorageError::CreateDirectory { source, .. }
            | StorageError::WriteFile { source, .. }
            | StorageError::ReadFile { source, .. }
            | StorageError::Delete { source, .. }
            | StorageError::MoveFile { source, .. } => source,
            StorageError::NotFound(_) | StorageError::InvalidPath(_) => return false,
        };
        matches!(
            source.kind(),
            std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::WouldBlock
        )
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, FolioError>;
