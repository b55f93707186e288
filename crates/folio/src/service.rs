//! Wires the store, blob storage, worker pool and orchestrator together.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::broadcast::ProgressBroadcaster;
use crate::cache::{CacheService, DocumentCache};
use crate::config::Config;
use crate::db::Database;
use crate::error::{ConfigError, FolioError, Result, WorkerError};
use crate::extraction::{PageExtractor, PdfPageExtractor};
use crate::models::Document;
use crate::orchestrator::{DocumentProcessor, Orchestrator, OrchestratorDeps, OrchestratorSettings};
use crate::pipeline::{CancellationRegistry, PageJobRunner};
use crate::sanitize::short_hash;
use crate::search::{SearchIndex, SearchService};
use crate::storage::{BlobStore, FileBlobStore};
use crate::store::{MetadataStore, SqliteStore};
use crate::worker::WorkerPool;

const SETTLE_POLL: Duration = Duration::from_millis(50);

/// A running ingestion service: the orchestrator plus the worker pool and
/// the collector thread that feeds page results back into it.
pub struct Folio {
    orchestrator: Arc<Orchestrator>,
    pool: Arc<WorkerPool>,
    collector: Mutex<Option<JoinHandle<()>>>,
}

impl Folio {
    /// Opens storage, starts the workers, rebuilds the search index and
    /// resumes documents interrupted by a previous run.
    pub fn open(config: &Config) -> Result<Self> {
        let db_path = config.database_path().ok_or_else(|| ConfigError::Validation {
            message: "database path could not be resolved".to_string(),
        })?;
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteStore::new(Database::open(&db_path)?));
        let blobs: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(&config.storage_directory));
        let extractor: Arc<dyn PageExtractor> = Arc::new(PdfPageExtractor::new(blobs.clone()));
        let cancellations = Arc::new(CancellationRegistry::new());
        let progress = ProgressBroadcaster::default();

        let runner = PageJobRunner::new(
            store.clone(),
            extractor.clone(),
            cancellations.clone(),
            config.runner_config(),
        )
        .with_progress(progress.clone());
        let pool = Arc::new(WorkerPool::new(
            Arc::new(runner),
            config.worker_count,
            config.queue_capacity,
        )?);

        let search: Arc<dyn SearchIndex> =
            Arc::new(SearchService::new(config.search.snippet_length));
        let cache: Arc<dyn DocumentCache> = Arc::new(CacheService::in_memory(&config.cache));
        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            store: store.clone(),
            blobs,
            extractor,
            cache,
            search: search.clone(),
            queue: pool.clone(),
            cancellations,
            progress,
            settings: OrchestratorSettings {
                default_per_page: config.search.default_per_page,
            },
        }));

        let collector = spawn_collector(orchestrator.clone(), &pool)?;
        let folio = Self {
            orchestrator,
            pool,
            collector: Mutex::new(Some(collector)),
        };

        let stats = search.rebuild_index(store.as_ref())?;
        info!(
            documents = stats.documents,
            pages = stats.pages,
            "Search index rebuilt"
        );
        let resumed = folio.orchestrator.resume_interrupted()?;
        if resumed > 0 {
            info!(resumed, "Resumed interrupted documents");
        }
        Ok(folio)
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Polls until the document reaches a terminal status or `timeout`
    /// passes, and returns its latest state either way.
    pub fn wait_for_settled(&self, hash: &str, timeout: Duration) -> Result<Document> {
        let deadline = Instant::now() + timeout;
        loop {
            let document = self
                .orchestrator
                .store()
                .find_document(hash)?
                .ok_or_else(|| FolioError::DocumentNotFound(hash.to_string()))?;
            if document.status.is_terminal() {
                return Ok(document);
            }
            if Instant::now() >= deadline {
                warn!(
                    document = %short_hash(hash),
                    status = %document.status,
                    "Timed out waiting for document to settle"
                );
                return Ok(document);
            }
            thread::sleep(SETTLE_POLL);
        }
    }

    /// Cancels every in-flight run. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for hash in self.orchestrator.cancellations().cancel_all() {
            match self.orchestrator.cancel_processing(&hash) {
                Ok(_) => cancelled += 1,
                Err(e) => warn!(document = %short_hash(&hash), error = %e, "Cancel failed"),
            }
        }
        cancelled
    }

    /// Stops the workers after their current page and drains the remaining
    /// results. Pages still queued stay `pending` for the next start.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        self.pool.wait();
        let handle = match self.collector.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                error!("Collector handle poisoned");
                None
            }
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Result collector panicked");
            }
        }
        info!("Folio stopped");
    }
}

fn spawn_collector(
    orchestrator: Arc<Orchestrator>,
    pool: &WorkerPool,
) -> std::result::Result<JoinHandle<()>, WorkerError> {
    let results = pool.results();
    thread::Builder::new()
        .name("folio-collector".to_string())
        .spawn(move || {
            for result in results.iter() {
                let hash = result.job.document_hash.clone();
                let page = result.job.page_number;
                if let Err(e) = orchestrator.handle_page_result(result) {
                    error!(
                        document = %short_hash(&hash),
                        page,
                        error = %e,
                        "Failed to record page result"
                    );
                }
            }
            info!("Result collector shutting down");
        })
        .map_err(|e| WorkerError::SpawnFailed(e.to_string()))
}
