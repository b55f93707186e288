//! End-to-end behavior of the ingestion pipeline over real PDFs.

mod common;

use std::time::Duration;

use serde_json::json;

use common::{PdfFixture, TestHarness};
use folio::cache::generate_cache_key;
use folio::models::{PageFilter, PageStatus};
use folio::search::SearchFilters;
use folio::worker::PageOutcome;
use folio::{DocumentProcessor, DocumentStatus, FolioError, ProgressPhase, UploadRequest};

const SETTLE: Duration = Duration::from_secs(30);

#[test]
fn test_three_page_document_through_worker_pool() {
    let harness = TestHarness::new();
    let path = harness.write_pdf("manual.pdf", &PdfFixture::pages(&["alpha", "bravo", "charlie"]));
    let service = harness.start();
    let orchestrator = service.orchestrator();
    let mut events = orchestrator.progress().subscribe();

    let document = orchestrator.upload(&UploadRequest::new(&path)).unwrap();
    assert_eq!(document.status, DocumentStatus::Uploaded);
    orchestrator.process(&document.hash).unwrap();

    let settled = service.wait_for_settled(&document.hash, SETTLE).unwrap();
    assert_eq!(settled.status, DocumentStatus::Completed);
    assert_eq!(settled.page_count, Some(3));
    assert!(settled.is_searchable);
    assert!(settled.processing_completed_at.is_some());

    let status = orchestrator.get_processing_status(&document.hash).unwrap();
    assert_eq!(status.pages.completed, 3);
    assert_eq!(status.progress_percent, 100.0);

    let page = orchestrator.get_page(&document.hash, 2).unwrap();
    assert!(page.content.contains("bravo"));
    let png = orchestrator.page_thumbnail(&document.hash, 3).unwrap();
    assert_eq!(&png[1..4], b"PNG");

    let hits = orchestrator
        .search_pages(&document.hash, "charlie", 1, None)
        .unwrap();
    assert_eq!(hits.items.len(), 1);
    assert_eq!(hits.items[0].page_number, 3);

    let mut phases = Vec::new();
    loop {
        let event = events.blocking_recv().unwrap();
        phases.push(event.phase);
        if event.phase == ProgressPhase::Finalized {
            assert_eq!(event.status, DocumentStatus::Completed);
            break;
        }
    }
    assert_eq!(phases[0], ProgressPhase::Uploaded);
    assert!(phases.contains(&ProgressPhase::PagesQueued));
    assert_eq!(
        phases
            .iter()
            .filter(|p| **p == ProgressPhase::PageCompleted)
            .count(),
        3
    );

    service.shutdown();
}

#[test]
fn test_corrupted_page_fails_alone() {
    let harness = TestHarness::new();
    let fixture = PdfFixture::pages(&["alpha", "bravo", "charlie"]).corrupt_page(2);
    let pipeline = harness.manual();
    let document = pipeline.upload(&harness.write_pdf("broken.pdf", &fixture));

    pipeline.orchestrator.process(&document.hash).unwrap();
    let results = pipeline.drain();
    assert_eq!(results.len(), 3);

    let broken = results.iter().find(|r| r.job.page_number == 2).unwrap();
    assert!(matches!(broken.outcome, PageOutcome::Failed { .. }));
    assert_eq!(broken.attempts, harness.config.max_attempts);

    let status = pipeline
        .orchestrator
        .get_processing_status(&document.hash)
        .unwrap();
    assert_eq!(status.status, DocumentStatus::Failed);
    assert_eq!(status.pages.completed, 2);
    assert_eq!(status.pages.failed, 1);
    assert_eq!(
        status.processing_error.as_deref(),
        Some("Processing failed for pages: 2")
    );

    let page = pipeline.orchestrator.get_page(&document.hash, 2).unwrap();
    assert_eq!(page.status, PageStatus::Failed);
    let page = pipeline.orchestrator.get_page(&document.hash, 3).unwrap();
    assert!(page.content.contains("charlie"));
}

#[test]
fn test_retry_only_reruns_failed_pages() {
    let harness = TestHarness::new();
    let fixture = PdfFixture::numbered(3).corrupt_page(2);
    let pipeline = harness.manual();
    let document = pipeline.upload(&harness.write_pdf("broken.pdf", &fixture));
    pipeline.orchestrator.process(&document.hash).unwrap();
    pipeline.drain();

    let retried = pipeline
        .orchestrator
        .retry_processing(&document.hash)
        .unwrap();
    assert_eq!(retried.status, DocumentStatus::Processing);
    assert!(retried.processing_error.is_none());

    let results = pipeline.drain();
    let pages: Vec<u32> = results.iter().map(|r| r.job.page_number).collect();
    assert_eq!(pages, vec![2]);

    let status = pipeline
        .orchestrator
        .get_processing_status(&document.hash)
        .unwrap();
    assert_eq!(status.status, DocumentStatus::Failed);
    assert_eq!(status.pages.completed, 2);
}

#[test]
fn test_cancel_midway_then_resume() {
    let harness = TestHarness::new();
    let pipeline = harness.manual();
    let document = pipeline.upload(&harness.write_pdf("long.pdf", &PdfFixture::numbered(10)));
    pipeline.orchestrator.process(&document.hash).unwrap();

    let mut jobs = pipeline.queue.take();
    assert_eq!(jobs.len(), 10);
    let rest = jobs.split_off(4);
    for job in jobs {
        pipeline.run(job);
    }

    let cancelled = pipeline
        .orchestrator
        .cancel_processing(&document.hash)
        .unwrap();
    assert_eq!(cancelled.status, DocumentStatus::Cancelled);

    for job in rest {
        let result = pipeline.run(job);
        assert!(matches!(
            result.outcome,
            PageOutcome::Skipped { .. } | PageOutcome::Cancelled
        ));
    }

    let status = pipeline
        .orchestrator
        .get_processing_status(&document.hash)
        .unwrap();
    assert_eq!(status.status, DocumentStatus::Cancelled);
    assert_eq!(status.pages.completed, 4);
    assert_eq!(status.pages.pending, 6);
    assert_eq!(status.processing_error.as_deref(), Some("Processing cancelled"));

    pipeline
        .orchestrator
        .retry_processing(&document.hash)
        .unwrap();
    assert_eq!(pipeline.drain().len(), 6);
    let status = pipeline
        .orchestrator
        .get_processing_status(&document.hash)
        .unwrap();
    assert_eq!(status.status, DocumentStatus::Completed);
    assert_eq!(status.pages.completed, 10);
}

#[test]
fn test_process_is_idempotent() {
    let harness = TestHarness::new();
    let pipeline = harness.manual();
    let document = pipeline.upload(&harness.write_pdf("m.pdf", &PdfFixture::numbered(3)));

    let first = pipeline.orchestrator.process(&document.hash).unwrap();
    let second = pipeline.orchestrator.process(&document.hash).unwrap();
    assert_eq!(first.status, DocumentStatus::Processing);
    assert_eq!(second.status, DocumentStatus::Processing);
    assert_eq!(pipeline.queue.take().len(), 3);

    let (pages, total) = pipeline
        .orchestrator
        .store()
        .list_pages(&document.hash, &PageFilter::default())
        .unwrap();
    assert_eq!(total, 3);
    assert!(pages.iter().all(|p| p.status == PageStatus::Pending));
}

#[test]
fn test_identical_upload_returns_existing_document() {
    let harness = TestHarness::new();
    let pipeline = harness.manual();
    let fixture = PdfFixture::numbered(2);
    let first = pipeline.upload(&harness.write_pdf("a.pdf", &fixture));
    let second = pipeline.upload(&harness.write_pdf("b.pdf", &fixture));
    assert_eq!(first.hash, second.hash);
    assert_eq!(second.original_filename, "a.pdf");
}

#[test]
fn test_phrase_match_ranks_first() {
    let harness = TestHarness::new();
    let pipeline = harness.manual();
    let fixture = PdfFixture::pages(&[
        "safety first and then the workplace",
        "cafeteria menu",
        "workplace safety rules apply",
    ]);
    let document = pipeline.upload(&harness.write_pdf("m.pdf", &fixture));
    pipeline.orchestrator.process(&document.hash).unwrap();
    pipeline.drain();

    let hits = pipeline
        .orchestrator
        .search_pages(&document.hash, "workplace safety", 1, None)
        .unwrap();
    let pages: Vec<u32> = hits.items.iter().map(|h| h.page_number).collect();
    assert_eq!(pages, vec![3, 1]);
    assert!(hits.items[0].snippet.to_lowercase().contains("workplace"));

    let documents = pipeline
        .orchestrator
        .search_documents("safety", &SearchFilters::default(), 1, None)
        .unwrap();
    assert_eq!(documents.total, 1);
    assert_eq!(documents.items[0].document_hash, document.hash);
}

#[test]
fn test_delete_clears_cache_index_and_blobs() {
    let harness = TestHarness::new();
    let pipeline = harness.manual();
    let document = pipeline.upload(&harness.write_pdf("m.pdf", &PdfFixture::pages(&["alpha"])));
    pipeline.orchestrator.process(&document.hash).unwrap();
    pipeline.drain();

    pipeline.orchestrator.get_page(&document.hash, 1).unwrap();
    let cache = pipeline.orchestrator.cache();
    assert!(cache.get_cached_page_content(&document.hash, 1).is_some());

    pipeline.orchestrator.delete_document(&document.hash).unwrap();
    assert!(cache.get_cached_page_content(&document.hash, 1).is_none());
    assert!(!pipeline.orchestrator.search_index().is_indexed(&document.hash));
    assert!(!harness.storage_root().join(&document.file_path).exists());
    assert!(matches!(
        pipeline.orchestrator.get_page(&document.hash, 1),
        Err(FolioError::PageNotFound { .. })
    ));
}

#[test]
fn test_restart_resumes_pending_pages() {
    let harness = TestHarness::new();
    let hash = {
        let pipeline = harness.manual();
        let document = pipeline.upload(&harness.write_pdf("m.pdf", &PdfFixture::numbered(3)));
        pipeline.orchestrator.process(&document.hash).unwrap();
        let mut jobs = pipeline.queue.take();
        pipeline.run(jobs.remove(0));
        document.hash
    };

    let service = harness.start();
    let settled = service.wait_for_settled(&hash, SETTLE).unwrap();
    assert_eq!(settled.status, DocumentStatus::Completed);
    assert_eq!(
        service
            .orchestrator()
            .search_pages(&hash, "page", 1, None)
            .unwrap()
            .total,
        3
    );
    service.shutdown();
}

#[test]
fn test_cache_key_ignores_parameter_order() {
    let forward = generate_cache_key("search", &[("query", json!("safety")), ("page", json!(1))]);
    let reversed = generate_cache_key("search", &[("page", json!(1)), ("query", json!("safety"))]);
    assert_eq!(forward, reversed);
    assert!(forward.starts_with("search:"));

    let other = generate_cache_key("search", &[("query", json!("safety")), ("page", json!(2))]);
    assert_ne!(forward, other);
}
