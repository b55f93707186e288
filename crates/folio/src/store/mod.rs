//! Metadata store: the repository contract the pipeline is written against.
//!
//! Every method returns value snapshots; status changes are explicit
//! compare-and-set calls that report whether they took effect.

use std::collections::HashMap;

use chrono::Utc;

use crate::db::{document_repo, page_repo, Database, DatabaseError};
use crate::models::{
    Document, DocumentFilter, DocumentStatus, NewDocument, Page, PageCompletion, PageFilter,
    PageStatus, PageStatusCounts,
};

pub type StoreResult<T> = Result<T, DatabaseError>;

pub trait MetadataStore: Send + Sync {
    /// Inserts unless the hash exists; returns the stored row and whether it is new.
    fn insert_document(&self, doc: &NewDocument) -> StoreResult<(Document, bool)>;
    fn find_document(&self, hash: &str) -> StoreResult<Option<Document>>;
    fn list_documents(&self, filter: &DocumentFilter) -> StoreResult<(Vec<Document>, u64)>;
    fn documents_with_status(&self, status: DocumentStatus) -> StoreResult<Vec<Document>>;
    fn count_documents_by_status(&self) -> StoreResult<HashMap<DocumentStatus, u64>>;
    fn set_page_count(&self, hash: &str, page_count: u32) -> StoreResult<bool>;
    fn transition_document(
        &self,
        hash: &str,
        from: DocumentStatus,
        to: DocumentStatus,
        error: Option<&str>,
    ) -> StoreResult<bool>;
    /// `processing -> completed|failed` once every page is terminal.
    fn finalize_document(
        &self,
        hash: &str,
        to: DocumentStatus,
        error: Option<&str>,
    ) -> StoreResult<bool>;
    /// `processing -> cancelled` once no page is claimed.
    fn complete_cancellation(&self, hash: &str) -> StoreResult<bool>;
    fn delete_document(&self, hash: &str) -> StoreResult<bool>;

    fn create_pages(&self, hash: &str, page_count: u32) -> StoreResult<u32>;
    fn find_page(&self, hash: &str, page_number: u32) -> StoreResult<Option<Page>>;
    fn list_pages(&self, hash: &str, filter: &PageFilter) -> StoreResult<(Vec<Page>, u64)>;
    fn page_status_counts(&self, hash: &str) -> StoreResult<PageStatusCounts>;
    fn page_numbers_with_status(&self, hash: &str, status: PageStatus) -> StoreResult<Vec<u32>>;
    fn claim_page(&self, hash: &str, page_number: u32) -> StoreResult<bool>;
    fn complete_page(
        &self,
        hash: &str,
        page_number: u32,
        completion: &PageCompletion,
    ) -> StoreResult<bool>;
    fn fail_page(&self, hash: &str, page_number: u32, error: &str) -> StoreResult<bool>;
    /// `pending -> failed` for a page whose claim could not be taken.
    fn fail_unclaimed_page(&self, hash: &str, page_number: u32, error: &str)
        -> StoreResult<bool>;
    fn release_page(&self, hash: &str, page_number: u32) -> StoreResult<bool>;
    fn reset_failed_pages(&self, hash: &str) -> StoreResult<u32>;
    fn release_claimed_pages(&self, hash: &str) -> StoreResult<u32>;
    /// (hash, page_number, content) for every completed page.
    fn completed_page_content(&self) -> StoreResult<Vec<(String, u32, String)>>;
    fn ping(&self) -> StoreResult<()>;
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl MetadataStore for SqliteStore {
    fn insert_document(&self, doc: &NewDocument) -> StoreResult<(Document, bool)> {
        document_repo::insert(&self.db, doc, Utc::now())
    }

    fn find_document(&self, hash: &str) -> StoreResult<Option<Document>> {
        document_repo::find_by_hash(&self.db, hash)
    }

    fn list_documents(&self, filter: &DocumentFilter) -> StoreResult<(Vec<Document>, u64)> {
        document_repo::query(&self.db, filter)
    }

    fn documents_with_status(&self, status: DocumentStatus) -> StoreResult<Vec<Document>> {
        document_repo::with_status(&self.db, status)
    }

    fn count_documents_by_status(&self) -> StoreResult<HashMap<DocumentStatus, u64>> {
        document_repo::count_by_status(&self.db)
    }

    fn set_page_count(&self, hash: &str, page_count: u32) -> StoreResult<bool> {
        document_repo::set_page_count(&self.db, hash, page_count, Utc::now())
    }

    fn transition_document(
        &self,
        hash: &str,
        from: DocumentStatus,
        to: DocumentStatus,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        document_repo::transition(&self.db, hash, from, to, error, Utc::now())
    }

    fn finalize_document(
        &self,
        hash: &str,
        to: DocumentStatus,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        document_repo::finalize(&self.db, hash, to, error, Utc::now())
    }

    fn complete_cancellation(&self, hash: &str) -> StoreResult<bool> {
        document_repo::complete_cancellation(&self.db, hash, Utc::now())
    }

    fn delete_document(&self, hash: &str) -> StoreResult<bool> {
        document_repo::delete(&self.db, hash)
    }

    fn create_pages(&self, hash: &str, page_count: u32) -> StoreResult<u32> {
        page_repo::create_pages(&self.db, hash, page_count, Utc::now())
    }

    fn find_page(&self, hash: &str, page_number: u32) -> StoreResult<Option<Page>> {
        page_repo::find(&self.db, hash, page_number)
    }

    fn list_pages(&self, hash: &str, filter: &PageFilter) -> StoreResult<(Vec<Page>, u64)> {
        page_repo::query(&self.db, hash, filter)
    }

    fn page_status_counts(&self, hash: &str) -> StoreResult<PageStatusCounts> {
        page_repo::status_counts(&self.db, hash)
    }

    fn page_numbers_with_status(&self, hash: &str, status: PageStatus) -> StoreResult<Vec<u32>> {
        page_repo::numbers_with_status(&self.db, hash, status)
    }

    fn claim_page(&self, hash: &str, page_number: u32) -> StoreResult<bool> {
        page_repo::claim(&self.db, hash, page_number, Utc::now())
    }

    fn complete_page(
        &self,
        hash: &str,
        page_number: u32,
        completion: &PageCompletion,
    ) -> StoreResult<bool> {
        page_repo::complete(&self.db, hash, page_number, completion, Utc::now())
    }

    fn fail_page(&self, hash: &str, page_number: u32, error: &str) -> StoreResult<bool> {
        page_repo::fail(&self.db, hash, page_number, error, Utc::now())
    }

    fn fail_unclaimed_page(
        &self,
        hash: &str,
        page_number: u32,
        error: &str,
    ) -> StoreResult<bool> {
        page_repo::fail_unclaimed(&self.db, hash, page_number, error, Utc::now())
    }

    fn release_page(&self, hash: &str, page_number: u32) -> StoreResult<bool> {
        page_repo::release(&self.db, hash, page_number, Utc::now())
    }

    fn reset_failed_pages(&self, hash: &str) -> StoreResult<u32> {
        page_repo::reset_failed(&self.db, hash, Utc::now())
    }

    fn release_claimed_pages(&self, hash: &str) -> StoreResult<u32> {
        page_repo::release_claimed(&self.db, hash, Utc::now())
    }

    fn completed_page_content(&self) -> StoreResult<Vec<(String, u32, String)>> {
        page_repo::completed_content(&self.db)
    }

    fn ping(&self) -> StoreResult<()> {
        self.db
            .with_conn(|conn| Ok(conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?))
            .map(|_| ())
    }
}
