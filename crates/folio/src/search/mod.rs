//! In-memory inverted index over document titles, metadata and page text.
//!
//! Readers load an immutable [`IndexSnapshot`] through `ArcSwap` and never
//! block. Writers are serialized by a mutex, copy the current snapshot,
//! apply their change and publish it with a bumped version. The index is
//! derived data and can always be rebuilt from the metadata store.

pub mod text;

pub use text::{generate_snippet, highlight_content, query_terms, tokenize};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::DatabaseError;
use crate::models::{Document, DocumentStatus, Metadata, Paginated};
use crate::sanitize::short_hash;
use crate::store::MetadataStore;

const TITLE_WEIGHT: f64 = 5.0;
const METADATA_WEIGHT: f64 = 3.0;
const PHRASE_BONUS: f64 = 10.0;
const EARLY_POSITION_BONUS: f64 = 2.0;
/// Tokens past this position earn no early-position bonus.
const EARLY_WINDOW: f64 = 100.0;

#[derive(Debug, Default)]
struct PageEntry {
    /// Term -> token positions, ascending.
    positions: HashMap<String, Vec<u32>>,
    text: String,
}

impl PageEntry {
    fn new(content: &str) -> Self {
        let mut positions: HashMap<String, Vec<u32>> = HashMap::new();
        for (i, token) in tokenize(content).into_iter().enumerate() {
            positions.entry(token).or_default().push(i as u32);
        }
        Self {
            positions,
            text: content.to_string(),
        }
    }

    fn contains_all(&self, terms: &[String]) -> bool {
        terms.iter().all(|t| self.positions.contains_key(t))
    }

    fn contains_phrase(&self, terms: &[String]) -> bool {
        let Some(first) = terms.first().and_then(|t| self.positions.get(t)) else {
            return false;
        };
        first.iter().any(|&start| {
            terms.iter().enumerate().skip(1).all(|(offset, term)| {
                self.positions
                    .get(term)
                    .map(|p| p.binary_search(&(start + offset as u32)).is_ok())
                    .unwrap_or(false)
            })
        })
    }

    /// Multi-term queries only; a single term is trivially its own phrase.
    fn has_phrase(&self, terms: &[String]) -> bool {
        terms.len() > 1 && self.contains_phrase(terms)
    }

    /// Term frequency plus a bonus for early first occurrences and, for
    /// multi-term queries, for the terms appearing as a contiguous phrase.
    /// Ranking sorts on [`PageEntry::has_phrase`] before this score.
    fn score(&self, terms: &[String]) -> f64 {
        let mut score = 0.0;
        for term in terms {
            if let Some(positions) = self.positions.get(term) {
                score += positions.len() as f64;
                let first = f64::from(positions[0]).min(EARLY_WINDOW);
                score += EARLY_POSITION_BONUS * (1.0 - first / EARLY_WINDOW);
            }
        }
        if self.has_phrase(terms) {
            score += PHRASE_BONUS;
        }
        score
    }
}

#[derive(Debug, Default, Clone)]
struct DocumentEntry {
    title: String,
    title_terms: HashMap<String, u32>,
    metadata_terms: HashMap<String, u32>,
    metadata: Metadata,
    created_by: Option<String>,
    mime_type: Option<String>,
    pages: BTreeMap<u32, Arc<PageEntry>>,
}

fn term_counts(text: &str) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

fn metadata_text(metadata: &Metadata) -> String {
    metadata
        .values()
        .map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl DocumentEntry {
    fn from_document(document: &Document) -> Self {
        Self {
            title: document.title.clone(),
            title_terms: term_counts(&document.title),
            metadata_terms: term_counts(&metadata_text(&document.metadata)),
            metadata: document.metadata.clone(),
            created_by: document.created_by.clone(),
            mime_type: Some(document.mime_type.clone()),
            pages: BTreeMap::new(),
        }
    }

    fn has_term(&self, term: &str) -> bool {
        self.title_terms.contains_key(term)
            || self.metadata_terms.contains_key(term)
            || self.pages.values().any(|p| p.positions.contains_key(term))
    }

    fn terms(&self) -> HashSet<&str> {
        let mut terms: HashSet<&str> = HashSet::new();
        terms.extend(self.title_terms.keys().map(String::as_str));
        terms.extend(self.metadata_terms.keys().map(String::as_str));
        for page in self.pages.values() {
            terms.extend(page.positions.keys().map(String::as_str));
        }
        terms
    }
}

/// Immutable view of the whole index.
#[derive(Debug, Default, Clone)]
pub struct IndexSnapshot {
    version: u64,
    documents: HashMap<String, Arc<DocumentEntry>>,
}

impl IndexSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchFilters {
    pub created_by: Option<String>,
    pub mime_type: Option<String>,
    /// Every pair must match the document's metadata exactly.
    #[serde(default)]
    pub metadata: Metadata,
}

impl SearchFilters {
    fn matches(&self, entry: &DocumentEntry) -> bool {
        if let Some(created_by) = &self.created_by {
            if entry.created_by.as_ref() != Some(created_by) {
                return false;
            }
        }
        if let Some(mime_type) = &self.mime_type {
            if entry.mime_type.as_ref() != Some(mime_type) {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(key, value)| entry.metadata.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageHit {
    pub document_hash: String,
    pub page_number: u32,
    pub score: f64,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHit {
    pub document_hash: String,
    pub title: String,
    pub score: f64,
    /// Pages containing every query term, best first.
    pub matching_pages: Vec<u32>,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchStats {
    pub documents: usize,
    pub pages: usize,
    pub terms: usize,
    pub version: u64,
}

/// Full-text index over documents and their pages. Queries never block on
/// writers.
pub trait SearchIndex: Send + Sync {
    /// Upserts the title and metadata fields, keeping indexed pages.
    fn index_document(&self, document: &Document);
    /// Upserts one page's text.
    fn index_page(&self, document_hash: &str, page_number: u32, content: &str);
    fn remove_from_index(&self, document_hash: &str) -> bool;
    /// Replaces the whole index with what the store holds.
    fn rebuild_index(&self, store: &dyn MetadataStore) -> Result<SearchStats, DatabaseError>;
    /// Pages of one document containing every query term. Pages holding the
    /// terms as a contiguous phrase come first, then by score.
    fn search_pages(
        &self,
        document_hash: &str,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Paginated<PageHit>;
    /// Documents containing every query term in any field.
    fn search_documents(
        &self,
        query: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
    ) -> Paginated<DocumentHit>;
    /// Indexed terms starting with `prefix`, most widespread first.
    fn suggest(&self, prefix: &str, limit: usize) -> Vec<String>;
    fn is_indexed(&self, document_hash: &str) -> bool;
    fn indexed_pages(&self, document_hash: &str) -> Vec<u32>;
    fn stats(&self) -> SearchStats;
}

pub struct SearchService {
    snapshot: ArcSwap<IndexSnapshot>,
    writer: Mutex<()>,
    snippet_length: usize,
}

impl SearchService {
    pub fn new(snippet_length: usize) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(IndexSnapshot::default()),
            writer: Mutex::new(()),
            snippet_length,
        }
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.load_full()
    }

    /// Applies `change` to a copy of the current snapshot and publishes it.
    fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut HashMap<String, Arc<DocumentEntry>>),
    {
        let _guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Search index writer lock poisoned, continuing");
                poisoned.into_inner()
            }
        };
        let current = self.snapshot.load();
        let mut documents = current.documents.clone();
        change(&mut documents);
        self.snapshot.store(Arc::new(IndexSnapshot {
            version: current.version + 1,
            documents,
        }));
    }
}

impl SearchIndex for SearchService {
    fn index_document(&self, document: &Document) {
        self.update(|documents| {
            let mut entry = DocumentEntry::from_document(document);
            if let Some(existing) = documents.get(&document.hash) {
                entry.pages = existing.pages.clone();
            }
            documents.insert(document.hash.clone(), Arc::new(entry));
        });
        debug!(document = %short_hash(&document.hash), "Indexed document fields");
    }

    fn index_page(&self, document_hash: &str, page_number: u32, content: &str) {
        let page = Arc::new(PageEntry::new(content));
        self.update(|documents| {
            let mut entry = documents
                .get(document_hash)
                .map(|e| DocumentEntry::clone(e))
                .unwrap_or_default();
            entry.pages.insert(page_number, page);
            documents.insert(document_hash.to_string(), Arc::new(entry));
        });
    }

    fn remove_from_index(&self, document_hash: &str) -> bool {
        let mut removed = false;
        self.update(|documents| {
            removed = documents.remove(document_hash).is_some();
        });
        removed
    }

    /// Builds a fresh snapshot from the store and swaps it in. Writers wait
    /// for the rebuild, so incremental updates land on the new snapshot.
    fn rebuild_index(&self, store: &dyn MetadataStore) -> Result<SearchStats, DatabaseError> {
        let _guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut entries: HashMap<String, DocumentEntry> = HashMap::new();
        for status in DocumentStatus::ALL {
            for document in store.documents_with_status(status)? {
                entries.insert(document.hash.clone(), DocumentEntry::from_document(&document));
            }
        }

        for (hash, page_number, content) in store.completed_page_content()? {
            if let Some(entry) = entries.get_mut(&hash) {
                entry
                    .pages
                    .insert(page_number, Arc::new(PageEntry::new(&content)));
            }
        }

        let version = self.snapshot.load().version + 1;
        self.snapshot.store(Arc::new(IndexSnapshot {
            version,
            documents: entries
                .into_iter()
                .map(|(hash, entry)| (hash, Arc::new(entry)))
                .collect(),
        }));

        let stats = self.stats();
        info!(
            documents = stats.documents,
            pages = stats.pages,
            version = stats.version,
            "Search index rebuilt"
        );
        Ok(stats)
    }

    fn search_pages(
        &self,
        document_hash: &str,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Paginated<PageHit> {
        let terms = query_terms(query);
        let snapshot = self.snapshot.load();
        let Some(entry) = snapshot.documents.get(document_hash) else {
            return Paginated::new(Vec::new(), 0, page, per_page);
        };
        if terms.is_empty() {
            return Paginated::new(Vec::new(), 0, page, per_page);
        }

        let mut ranked: Vec<(bool, PageHit)> = entry
            .pages
            .iter()
            .filter(|(_, p)| p.contains_all(&terms))
            .map(|(&n, p)| {
                let hit = PageHit {
                    document_hash: document_hash.to_string(),
                    page_number: n,
                    score: p.score(&terms),
                    snippet: generate_snippet(&p.text, query, self.snippet_length),
                };
                (p.has_phrase(&terms), hit)
            })
            .collect();
        ranked.sort_by(|(a_phrase, a), (b_phrase, b)| {
            b_phrase
                .cmp(a_phrase)
                .then(b.score.total_cmp(&a.score))
                .then(a.page_number.cmp(&b.page_number))
        });
        let hits = ranked.into_iter().map(|(_, hit)| hit).collect();

        Paginated::from_ranked(hits, page, per_page)
    }

    fn search_documents(
        &self,
        query: &str,
        filters: &SearchFilters,
        page: u32,
        per_page: u32,
    ) -> Paginated<DocumentHit> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Paginated::new(Vec::new(), 0, page, per_page);
        }
        let snapshot = self.snapshot.load();

        let mut hits: Vec<DocumentHit> = snapshot
            .documents
            .iter()
            .filter(|(_, entry)| filters.matches(entry))
            .filter(|(_, entry)| terms.iter().all(|t| entry.has_term(t)))
            .map(|(hash, entry)| {
                let mut score = 0.0;
                for term in &terms {
                    score += TITLE_WEIGHT * f64::from(*entry.title_terms.get(term).unwrap_or(&0));
                    score +=
                        METADATA_WEIGHT * f64::from(*entry.metadata_terms.get(term).unwrap_or(&0));
                }

                let mut pages: Vec<(u32, f64, &PageEntry)> = entry
                    .pages
                    .iter()
                    .filter(|(_, p)| terms.iter().any(|t| p.positions.contains_key(t)))
                    .map(|(&n, p)| (n, p.score(&terms), p.as_ref()))
                    .collect();
                score += pages.iter().map(|(_, s, _)| s).sum::<f64>();
                pages.retain(|(_, _, p)| p.contains_all(&terms));
                pages.sort_by(|a, b| {
                    b.2.has_phrase(&terms)
                        .cmp(&a.2.has_phrase(&terms))
                        .then(b.1.total_cmp(&a.1))
                        .then(a.0.cmp(&b.0))
                });

                DocumentHit {
                    document_hash: hash.clone(),
                    title: entry.title.clone(),
                    score,
                    matching_pages: pages.iter().map(|(n, _, _)| *n).collect(),
                    snippet: pages
                        .first()
                        .map(|(_, _, p)| generate_snippet(&p.text, query, self.snippet_length)),
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document_hash.cmp(&b.document_hash))
        });

        Paginated::from_ranked(hits, page, per_page)
    }

    fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() || limit == 0 {
            return Vec::new();
        }
        let snapshot = self.snapshot.load();

        let mut frequency: HashMap<&str, usize> = HashMap::new();
        for entry in snapshot.documents.values() {
            for term in entry.terms() {
                if term.starts_with(&prefix) {
                    *frequency.entry(term).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(&str, usize)> = frequency.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(limit)
            .map(|(term, _)| term.to_string())
            .collect()
    }

    fn is_indexed(&self, document_hash: &str) -> bool {
        self.snapshot.load().documents.contains_key(document_hash)
    }

    fn indexed_pages(&self, document_hash: &str) -> Vec<u32> {
        self.snapshot
            .load()
            .documents
            .get(document_hash)
            .map(|e| e.pages.keys().copied().collect())
            .unwrap_or_default()
    }

    fn stats(&self) -> SearchStats {
        let snapshot = self.snapshot.load();
        let mut terms: HashSet<&str> = HashSet::new();
        let mut pages = 0;
        for entry in snapshot.documents.values() {
            pages += entry.pages.len();
            terms.extend(entry.terms());
        }
        SearchStats {
            documents: snapshot.documents.len(),
            pages,
            terms: terms.len(),
            version: snapshot.version,
        }
    }
}
