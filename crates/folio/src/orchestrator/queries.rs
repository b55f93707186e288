use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::error::{FolioError, Result, StorageError};
use crate::extraction::{self, PdfMetadata};
use crate::models::{
    Document, DocumentFilter, DocumentStatus, Page, PageContent, PageFilter, PageStatus,
    Paginated,
};
use crate::search::{DocumentHit, PageHit, SearchFilters};
use crate::worker::PageJobResult;

use super::{
    into_validation, DocumentProcessor, FolioStats, HealthReport, Orchestrator, ProcessingStatus,
    UploadRequest,
};

fn read_local(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        FolioError::Storage(StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })
    })
}

impl Orchestrator {
    fn per_page(&self, per_page: Option<u32>) -> u32 {
        per_page.unwrap_or(self.settings.default_per_page).max(1)
    }

    /// Completed documents never change again, so only they are served
    /// from the cache.
    pub fn get_document(&self, hash: &str) -> Result<Document> {
        if let Some(cached) = self.cache.get_cached_document_metadata(hash) {
            return Ok(cached);
        }
        let document = self.require_document(hash)?;
        if document.status == DocumentStatus::Completed {
            self.cache.cache_document_metadata(&document, None);
        }
        Ok(document)
    }

    pub fn get_page_count(&self, path: &Path) -> Result<u32> {
        extraction::count_pages(&read_local(path)?).map_err(into_validation)
    }

    pub fn extract_metadata(&self, path: &Path) -> Result<PdfMetadata> {
        extraction::extract_metadata(&read_local(path)?).map_err(into_validation)
    }

    /// Magic bytes first, then a structural parse.
    pub fn validate_pdf(&self, path: &Path) -> Result<()> {
        extraction::validate_pdf(&read_local(path)?)
            .map(|_| ())
            .map_err(into_validation)
    }

    pub fn list_documents(
        &self,
        filter: &DocumentFilter,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<Paginated<Document>> {
        let per_page = self.per_page(per_page);
        let query = DocumentFilter {
            limit: Some(u64::from(per_page)),
            offset: Some(Paginated::<Document>::offset(page, per_page)),
            ..filter.clone()
        };
        let (documents, total) = self.store.list_documents(&query)?;
        Ok(Paginated::new(documents, total, page, per_page))
    }

    pub fn list_pages(
        &self,
        hash: &str,
        status: Option<PageStatus>,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<Paginated<Page>> {
        self.require_document(hash)?;
        let per_page = self.per_page(per_page);
        let (pages, total) = self.store.list_pages(
            hash,
            &PageFilter {
                status,
                limit: Some(u64::from(per_page)),
                offset: Some(Paginated::<Page>::offset(page, per_page)),
            },
        )?;
        Ok(Paginated::new(pages, total, page, per_page))
    }

    fn require_page(&self, hash: &str, page_number: u32) -> Result<Page> {
        self.store
            .find_page(hash, page_number)?
            .ok_or_else(|| FolioError::PageNotFound {
                document_hash: hash.to_string(),
                page_number,
            })
    }

    /// Page content, cache first.
    pub fn get_page(&self, hash: &str, page_number: u32) -> Result<PageContent> {
        if let Some(cached) = self.cache.get_cached_page_content(hash, page_number) {
            return Ok(cached);
        }
        let page = self.require_page(hash, page_number)?;
        let content = PageContent::from(&page);
        if page.status == PageStatus::Completed {
            self.cache.cache_page_content(&content, None);
        }
        Ok(content)
    }

    fn page_blob(&self, hash: &str, page_number: u32, path: Option<String>) -> Result<Vec<u8>> {
        let path = path.ok_or_else(|| FolioError::PageNotFound {
            document_hash: hash.to_string(),
            page_number,
        })?;
        match self.blobs.get(&path) {
            Ok(bytes) => Ok(bytes),
            Err(StorageError::NotFound(_)) => Err(FolioError::PageNotFound {
                document_hash: hash.to_string(),
                page_number,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// PNG bytes of a processed page's thumbnail.
    pub fn page_thumbnail(&self, hash: &str, page_number: u32) -> Result<Vec<u8>> {
        let page = self.require_page(hash, page_number)?;
        self.page_blob(hash, page_number, page.thumbnail_path)
    }

    /// The single-page PDF extracted for a processed page.
    pub fn download_page(&self, hash: &str, page_number: u32) -> Result<Vec<u8>> {
        let page = self.require_page(hash, page_number)?;
        self.page_blob(hash, page_number, page.page_file_path)
    }

    pub fn search_pages(
        &self,
        hash: &str,
        query: &str,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<Paginated<PageHit>> {
        self.require_document(hash)?;
        let per_page = self.per_page(per_page);
        let params = [
            ("scope", Value::from("pages")),
            ("hash", Value::from(hash)),
            ("query", Value::from(query)),
            ("page", Value::from(page)),
            ("perPage", Value::from(per_page)),
        ];
        if let Some(cached) = self.cache.get_cached_search_results(&params) {
            return Ok(cached);
        }
        let results = self.search.search_pages(hash, query, page, per_page);
        self.cache.cache_search_results(&params, &results, None);
        Ok(results)
    }

    pub fn search_documents(
        &self,
        query: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<Paginated<DocumentHit>> {
        let per_page = self.per_page(per_page);
        let filters_value = serde_json::to_value(filters).unwrap_or(Value::Null);
        let params = [
            ("scope", Value::from("documents")),
            ("query", Value::from(query)),
            ("filters", filters_value),
            ("page", Value::from(page)),
            ("perPage", Value::from(per_page)),
        ];
        if let Some(cached) = self.cache.get_cached_search_results(&params) {
            return Ok(cached);
        }
        let results = self.search.search_documents(query, filters, page, per_page);
        self.cache.cache_search_results(&params, &results, None);
        Ok(results)
    }

    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        self.search.suggest(prefix, limit)
    }

    pub fn clear_cache(&self) -> bool {
        self.cache.clear()
    }

    pub fn stats(&self) -> Result<FolioStats> {
        let documents_by_status: BTreeMap<String, u64> = self
            .store
            .count_documents_by_status()?
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect();
        Ok(FolioStats {
            documents_by_status,
            active_runs: self.cancellations.active(),
            queued_jobs: self.queue.pending(),
            cache: self.cache.stats(),
            search: self.search.stats(),
            blobs: self.blobs.usage()?,
        })
    }

    pub fn health(&self) -> HealthReport {
        let mut errors = Vec::new();
        let database = match self.store.ping() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Health check: database unavailable");
                errors.push(format!("database: {}", e));
                false
            }
        };
        let storage = match self.blobs.usage() {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Health check: storage unavailable");
                errors.push(format!("storage: {}", e));
                false
            }
        };
        HealthReport {
            healthy: database && storage,
            database,
            storage,
            errors,
        }
    }
}

impl DocumentProcessor for Orchestrator {
    fn upload(&self, request: &UploadRequest) -> Result<Document> {
        self.upload_file(request)
    }

    fn process(&self, hash: &str) -> Result<Document> {
        self.process_document(hash)
    }

    fn handle_page_result(&self, result: PageJobResult) -> Result<()> {
        self.record_page_result(result)
    }

    fn retry_processing(&self, hash: &str) -> Result<Document> {
        self.retry_document(hash)
    }

    fn cancel_processing(&self, hash: &str) -> Result<Document> {
        self.cancel_document(hash)
    }

    fn delete_document(&self, hash: &str) -> Result<()> {
        self.remove_document(hash)
    }

    fn get_processing_status(&self, hash: &str) -> Result<ProcessingStatus> {
        let document = self.require_document(hash)?;
        let pages = self.store.page_status_counts(hash)?;
        let progress_percent = match (document.status, document.page_count) {
            (DocumentStatus::Completed, _) => 100.0,
            (_, Some(count)) if count > 0 => {
                let done = f64::from(pages.completed + pages.failed);
                (done / f64::from(count) * 1000.0).round() / 10.0
            }
            _ => 0.0,
        };
        Ok(ProcessingStatus {
            document_hash: document.hash,
            status: document.status,
            page_count: document.page_count,
            pages,
            progress_percent,
            is_searchable: document.is_searchable,
            processing_error: document.processing_error,
            processing_started_at: document.processing_started_at,
            processing_completed_at: document.processing_completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Fixture;
    use super::*;
    use crate::worker::JobHandler;

    fn completed(fx: &Fixture, texts: &[Option<&str>]) -> Document {
        let doc = fx.upload("m.pdf", texts);
        fx.orchestrator.process(&doc.hash).unwrap();
        fx.drain();
        doc
    }

    #[test]
    fn test_processing_status_percent() {
        let fx = Fixture::new();
        let doc = fx.upload("m.pdf", &[Some("a"), Some("b"), Some("c"), Some("d")]);
        assert_eq!(
            fx.orchestrator.get_processing_status(&doc.hash).unwrap().progress_percent,
            0.0
        );

        fx.orchestrator.process(&doc.hash).unwrap();
        let mut jobs = fx.queue.take();
        let result = fx.runner.handle(jobs.remove(0));
        fx.orchestrator.handle_page_result(result).unwrap();

        let status = fx.orchestrator.get_processing_status(&doc.hash).unwrap();
        assert_eq!(status.status, DocumentStatus::Processing);
        assert_eq!(status.progress_percent, 25.0);
        assert_eq!(status.pages.pending, 3);
    }

    #[test]
    fn test_get_page_and_artifacts() {
        let fx = Fixture::new();
        let doc = completed(&fx, &[Some("alpha"), Some("bravo")]);

        let page = fx.orchestrator.get_page(&doc.hash, 2).unwrap();
        assert!(page.content.contains("bravo"));
        assert_eq!(page.status, PageStatus::Completed);

        let png = fx.orchestrator.page_thumbnail(&doc.hash, 2).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        let pdf = fx.orchestrator.download_page(&doc.hash, 2).unwrap();
        assert!(pdf.starts_with(b"%PDF-"));

        assert!(matches!(
            fx.orchestrator.get_page(&doc.hash, 9),
            Err(FolioError::PageNotFound { page_number: 9, .. })
        ));
    }

    #[test]
    fn test_thumbnail_of_unprocessed_page() {
        let fx = Fixture::new();
        let doc = fx.upload("m.pdf", &[Some("alpha")]);
        fx.orchestrator.process(&doc.hash).unwrap();
        assert!(matches!(
            fx.orchestrator.page_thumbnail(&doc.hash, 1),
            Err(FolioError::PageNotFound { .. })
        ));
    }

    #[test]
    fn test_list_documents_and_pages_paginate() {
        let fx = Fixture::new();
        let doc = completed(&fx, &[Some("a"), Some("b"), Some("c")]);
        fx.upload("other.pdf", &[Some("z")]);

        let docs = fx
            .orchestrator
            .list_documents(&DocumentFilter::default(), 1, Some(1))
            .unwrap();
        assert_eq!(docs.total, 2);
        assert_eq!(docs.items.len(), 1);
        assert_eq!(docs.last_page, 2);

        let pages = fx.orchestrator.list_pages(&doc.hash, None, 2, Some(2)).unwrap();
        assert_eq!(pages.total, 3);
        let numbers: Vec<u32> = pages.items.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![3]);

        assert!(matches!(
            fx.orchestrator.list_pages("missing", None, 1, None),
            Err(FolioError::DocumentNotFound(_))
        ));
    }

    #[test]
    fn test_search_pages_through_orchestrator() {
        let fx = Fixture::new();
        let doc = completed(
            &fx,
            &[
                Some("safety is scattered here and workplace there"),
                Some("workplace safety rules"),
                Some("cafeteria menu"),
            ],
        );
        completed(&fx, &[Some("workplace safety elsewhere")]);

        let results = fx
            .orchestrator
            .search_pages(&doc.hash, "workplace safety", 1, None)
            .unwrap();
        let pages: Vec<u32> = results.items.iter().map(|h| h.page_number).collect();
        assert_eq!(pages, vec![2, 1]);
        assert!(results.items.iter().all(|h| h.document_hash == doc.hash));

        // Served from the cache the second time.
        let again = fx
            .orchestrator
            .search_pages(&doc.hash, "workplace safety", 1, None)
            .unwrap();
        assert_eq!(again, results);
    }

    #[test]
    fn test_get_document_caches_completed_only() {
        let fx = Fixture::new();
        let doc = fx.upload("m.pdf", &[Some("a")]);
        fx.orchestrator.get_document(&doc.hash).unwrap();
        assert!(fx
            .orchestrator
            .cache()
            .get_cached_document_metadata(&doc.hash)
            .is_none());

        fx.orchestrator.process(&doc.hash).unwrap();
        fx.drain();
        let fetched = fx.orchestrator.get_document(&doc.hash).unwrap();
        assert_eq!(fetched.status, DocumentStatus::Completed);
    }

    #[test]
    fn test_inspection_helpers() {
        let fx = Fixture::new();
        let path = fx.write_pdf("three.pdf", &[Some("a"), Some("b"), Some("c")]);
        assert_eq!(fx.orchestrator.get_page_count(&path).unwrap(), 3);
        assert!(fx.orchestrator.validate_pdf(&path).is_ok());
        let metadata = fx.orchestrator.extract_metadata(&path).unwrap();
        assert_eq!(metadata.page_count, 3);
        assert_eq!(metadata.version, "1.5");

        let text = fx.dir.path().join("x.txt");
        std::fs::write(&text, "hello").unwrap();
        assert!(matches!(
            fx.orchestrator.validate_pdf(&text),
            Err(FolioError::Validation(_))
        ));
    }

    #[test]
    fn test_stats_and_health() {
        let fx = Fixture::new();
        completed(&fx, &[Some("a"), Some("b")]);

        let stats = fx.orchestrator.stats().unwrap();
        assert_eq!(stats.documents_by_status.get("completed"), Some(&1));
        assert_eq!(stats.search.pages, 2);
        assert_eq!(stats.active_runs, 0);
        assert!(stats.blobs.files >= 5);

        let health = fx.orchestrator.health();
        assert!(health.healthy);
        assert!(health.errors.is_empty());
    }
}
