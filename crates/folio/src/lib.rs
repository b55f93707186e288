pub mod broadcast;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod sanitize;
pub mod search;
pub mod service;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use broadcast::{DocumentProgressEvent, ProgressBroadcaster, ProgressPhase};
pub use cache::{CacheService, DocumentCache};
pub use config::{load_config, load_config_from_str, Config};
pub use error::{ConfigError, FolioError, Result, StorageError, WorkerError};
pub use models::{Document, DocumentStatus, Page, PageContent, PageStatus, Paginated};
pub use orchestrator::{DocumentProcessor, Orchestrator, ProcessingStatus, UploadRequest};
pub use search::{SearchFilters, SearchIndex, SearchService};
pub use service::Folio;
