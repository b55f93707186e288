//! Isolated environments for integration tests.
//!
//! `TestHarness::start` runs the full service with a real worker pool.
//! `TestHarness::manual` builds the same orchestrator over a recording queue
//! so a test decides exactly which page jobs run and when.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use folio::broadcast::ProgressBroadcaster;
use folio::cache::CacheService;
use folio::config::Config;
use folio::db::Database;
use folio::error::WorkerError;
use folio::extraction::{PageExtractor, PdfPageExtractor};
use folio::models::Document;
use folio::orchestrator::{
    DocumentProcessor, Orchestrator, OrchestratorDeps, OrchestratorSettings, UploadRequest,
};
use folio::pipeline::{CancellationRegistry, PageJobRunner};
use folio::search::SearchService;
use folio::storage::{BlobStore, FileBlobStore};
use folio::store::{MetadataStore, SqliteStore};
use folio::worker::{JobHandler, JobQueue, PageJob, PageJobResult};
use folio::Folio;

use super::builders::PdfFixture;

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: Config,
}

impl TestHarness {
    /// Two workers, two attempts per page and a 1ms backoff.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::default_for(temp_dir.path());
        config.worker_count = 2;
        config.max_attempts = 2;
        config.retry_backoff_ms = 1;
        Self { temp_dir, config }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn storage_root(&self) -> PathBuf {
        PathBuf::from(&self.config.storage_directory)
    }

    pub fn write_pdf(&self, name: &str, fixture: &PdfFixture) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, fixture.bytes()).expect("Failed to write fixture");
        path
    }

    pub fn start(&self) -> Folio {
        Folio::open(&self.config).expect("Failed to start folio")
    }

    pub fn manual(&self) -> ManualPipeline {
        let db_path = self.config.database_path().expect("database path");
        let store: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(Database::open(&db_path).expect("open db")));
        let blobs: Arc<dyn BlobStore> =
            Arc::new(FileBlobStore::new(&self.config.storage_directory));
        let extractor: Arc<dyn PageExtractor> = Arc::new(PdfPageExtractor::new(blobs.clone()));
        let cancellations = Arc::new(CancellationRegistry::new());
        let queue = Arc::new(RecordingQueue::default());

        let runner = PageJobRunner::new(
            store.clone(),
            extractor.clone(),
            cancellations.clone(),
            self.config.runner_config(),
        );
        let orchestrator = Orchestrator::new(OrchestratorDeps {
            store,
            blobs,
            extractor,
            cache: Arc::new(CacheService::in_memory(&self.config.cache)),
            search: Arc::new(SearchService::new(self.config.search.snippet_length)),
            queue: queue.clone(),
            cancellations,
            progress: ProgressBroadcaster::default(),
            settings: OrchestratorSettings::default(),
        });

        ManualPipeline {
            orchestrator,
            runner,
            queue,
        }
    }
}

#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<PageJob>>,
}

impl RecordingQueue {
    pub fn take(&self) -> Vec<PageJob> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }
}

impl JobQueue for RecordingQueue {
    fn enqueue(&self, job: PageJob) -> Result<(), WorkerError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

/// An orchestrator whose page jobs are run by hand.
pub struct ManualPipeline {
    pub orchestrator: Orchestrator,
    pub runner: PageJobRunner,
    pub queue: Arc<RecordingQueue>,
}

impl ManualPipeline {
    pub fn upload(&self, path: &Path) -> Document {
        self.orchestrator
            .upload(&UploadRequest {
                title: Some("Safety Manual".to_string()),
                created_by: Some("alice".to_string()),
                ..UploadRequest::new(path)
            })
            .expect("upload")
    }

    /// Runs one job and reports its result, returning what the runner said.
    pub fn run(&self, job: PageJob) -> PageJobResult {
        let result = self.runner.handle(job);
        self.orchestrator
            .handle_page_result(result.clone())
            .expect("record page result");
        result
    }

    /// Runs every queued job.
    pub fn drain(&self) -> Vec<PageJobResult> {
        self.queue
            .take()
            .into_iter()
            .map(|job| self.run(job))
            .collect()
    }
}
