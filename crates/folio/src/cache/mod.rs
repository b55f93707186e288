//! Read-through cache for document metadata, page content and search
//! results. Never authoritative: every failure degrades to a miss.

pub mod backend;

pub use backend::{CacheBackend, CacheError, MokaBackend};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::models::{Document, PageContent};
use crate::sanitize::short_hash;

const DOCUMENT_PREFIX: &str = "document";
const PAGE_PREFIX: &str = "page";
const SEARCH_PREFIX: &str = "search";

/// Builds `"{prefix}:{sha256}"` over the params serialized in key order, so
/// equal params give equal keys regardless of how they were assembled.
pub fn generate_cache_key(prefix: &str, params: &[(&str, Value)]) -> String {
    let sorted: BTreeMap<&str, &Value> = params.iter().map(|(k, v)| (*k, v)).collect();
    let canonical = serde_json::to_string(&sorted).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{}:{:x}", prefix, digest)
}

pub fn document_key(hash: &str) -> String {
    generate_cache_key(DOCUMENT_PREFIX, &[("hash", Value::from(hash))])
}

pub fn page_key(hash: &str, page_number: u32) -> String {
    generate_cache_key(
        PAGE_PREFIX,
        &[("hash", Value::from(hash)), ("page", Value::from(page_number))],
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    /// Keys remembered for invalidation.
    pub tracked_keys: usize,
}

/// Document-aware cache the orchestrator reads through. Implementations
/// treat every backend failure as a miss.
pub trait DocumentCache: Send + Sync {
    fn cache_document_metadata(&self, document: &Document, ttl: Option<Duration>) -> bool;
    fn get_cached_document_metadata(&self, hash: &str) -> Option<Document>;
    fn cache_page_content(&self, page: &PageContent, ttl: Option<Duration>) -> bool;
    fn get_cached_page_content(&self, hash: &str, page_number: u32) -> Option<PageContent>;
    /// Stores encoded search results under a key derived from the params.
    fn cache_search_value(
        &self,
        params: &[(&str, Value)],
        results: &Value,
        ttl: Option<Duration>,
    ) -> bool;
    fn get_cached_search_value(&self, params: &[(&str, Value)]) -> Option<Value>;
    /// Drops every cached search result. Results can span documents, so any
    /// index change makes all of them stale.
    fn invalidate_search_results(&self) -> usize;
    /// Removes the metadata entry, every page entry of the document and all
    /// cached search results. Returns the number of entries removed.
    fn invalidate_document_cache(&self, hash: &str) -> usize;
    /// Populates metadata and every page entry in one pass.
    fn warm_document_cache(&self, document: &Document, pages: &[PageContent]) -> usize;
    fn clear(&self) -> bool;
    fn stats(&self) -> CacheStats;
}

impl<'a> dyn DocumentCache + 'a {
    pub fn cache_search_results<T: Serialize>(
        &self,
        params: &[(&str, Value)],
        results: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match serde_json::to_value(results) {
            Ok(value) => self.cache_search_value(params, &value, ttl),
            Err(e) => {
                warn!(error = %e, "Search results could not be encoded");
                false
            }
        }
    }

    pub fn get_cached_search_results<T: DeserializeOwned>(
        &self,
        params: &[(&str, Value)],
    ) -> Option<T> {
        let value = self.get_cached_search_value(params)?;
        match serde_json::from_value(value) {
            Ok(results) => Some(results),
            Err(e) => {
                warn!(error = %e, "Cached search results have an unexpected shape");
                None
            }
        }
    }
}

/// Writes between full sweeps of the tracked key sets.
const PRUNE_INTERVAL: u64 = 256;

pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    search_ttl: Duration,
    /// Every key written on behalf of a document, for invalidation. Keys
    /// whose entries expired are dropped on a miss or by the periodic sweep.
    document_keys: Mutex<HashMap<String, HashSet<String>>>,
    search_keys: Mutex<HashSet<String>>,
    writes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheService {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            default_ttl: config.default_ttl(),
            search_ttl: config.search_ttl(),
            document_keys: Mutex::new(HashMap::new()),
            search_keys: Mutex::new(HashSet::new()),
            writes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(Arc::new(MokaBackend::new(config.max_capacity)), config)
    }

    fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key, error = %e, "Cache value could not be encoded");
                return false;
            }
        };
        match self.backend.set(key, encoded, ttl) {
            Ok(()) => {
                let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
                if writes % PRUNE_INTERVAL == 0 {
                    self.prune_tracked_keys();
                }
                true
            }
            Err(e) => {
                warn!(key, error = %e, "Cache write failed");
                false
            }
        }
    }

    fn fetch<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed");
                None
            }
        };
        let value = raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                let _ = self.backend.delete(key);
                None
            }
        });
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    fn track(&self, document_hash: &str, key: String) {
        if let Ok(mut index) = self.document_keys.lock() {
            index
                .entry(document_hash.to_string())
                .or_default()
                .insert(key);
        }
    }

    fn untrack(&self, document_hash: &str, key: &str) {
        if let Ok(mut index) = self.document_keys.lock() {
            if let Some(keys) = index.get_mut(document_hash) {
                keys.remove(key);
                if keys.is_empty() {
                    index.remove(document_hash);
                }
            }
        }
    }

    fn is_live(&self, key: &str) -> bool {
        // An unreachable backend cannot prove the entry gone.
        !matches!(self.backend.get(key), Ok(None))
    }

    /// Forgets tracked keys whose entries the backend no longer holds.
    /// Returns the number of keys dropped.
    pub fn prune_tracked_keys(&self) -> usize {
        let mut pruned = 0;
        if let Ok(mut index) = self.document_keys.lock() {
            index.retain(|_, keys| {
                let before = keys.len();
                keys.retain(|key| self.is_live(key));
                pruned += before - keys.len();
                !keys.is_empty()
            });
        }
        if let Ok(mut keys) = self.search_keys.lock() {
            let before = keys.len();
            keys.retain(|key| self.is_live(key));
            pruned += before - keys.len();
        }
        if pruned > 0 {
            debug!(pruned, "Pruned expired cache keys");
        }
        pruned
    }

    fn tracked_keys(&self) -> usize {
        let documents: usize = self
            .document_keys
            .lock()
            .map(|index| index.values().map(HashSet::len).sum())
            .unwrap_or(0);
        let searches = self.search_keys.lock().map(|keys| keys.len()).unwrap_or(0);
        documents + searches
    }
}

impl DocumentCache for CacheService {
    fn cache_document_metadata(&self, document: &Document, ttl: Option<Duration>) -> bool {
        let key = document_key(&document.hash);
        let stored = self.put(&key, document, ttl.unwrap_or(self.default_ttl));
        if stored {
            self.track(&document.hash, key);
        }
        stored
    }

    fn get_cached_document_metadata(&self, hash: &str) -> Option<Document> {
        let key = document_key(hash);
        let document = self.fetch(&key);
        if document.is_none() {
            self.untrack(hash, &key);
        }
        document
    }

    fn cache_page_content(&self, page: &PageContent, ttl: Option<Duration>) -> bool {
        let key = page_key(&page.document_hash, page.page_number);
        let stored = self.put(&key, page, ttl.unwrap_or(self.default_ttl));
        if stored {
            self.track(&page.document_hash, key);
        }
        stored
    }

    fn get_cached_page_content(&self, hash: &str, page_number: u32) -> Option<PageContent> {
        let key = page_key(hash, page_number);
        let page = self.fetch(&key);
        if page.is_none() {
            self.untrack(hash, &key);
        }
        page
    }

    fn cache_search_value(
        &self,
        params: &[(&str, Value)],
        results: &Value,
        ttl: Option<Duration>,
    ) -> bool {
        let key = generate_cache_key(SEARCH_PREFIX, params);
        let stored = self.put(&key, results, ttl.unwrap_or(self.search_ttl));
        if stored {
            if let Ok(mut keys) = self.search_keys.lock() {
                keys.insert(key);
            }
        }
        stored
    }

    fn get_cached_search_value(&self, params: &[(&str, Value)]) -> Option<Value> {
        let key = generate_cache_key(SEARCH_PREFIX, params);
        let results = self.fetch(&key);
        if results.is_none() {
            if let Ok(mut keys) = self.search_keys.lock() {
                keys.remove(&key);
            }
        }
        results
    }

    fn invalidate_search_results(&self) -> usize {
        let keys: Vec<String> = match self.search_keys.lock() {
            Ok(mut keys) => keys.drain().collect(),
            Err(_) => return 0,
        };
        keys.iter()
            .filter(|key| self.backend.delete(key).unwrap_or(false))
            .count()
    }

    fn invalidate_document_cache(&self, hash: &str) -> usize {
        let mut keys = match self.document_keys.lock() {
            Ok(mut index) => index.remove(hash).unwrap_or_default(),
            Err(_) => HashSet::new(),
        };
        // Entries written before this process started are not in the index.
        keys.insert(document_key(hash));

        let mut removed = 0;
        for key in &keys {
            match self.backend.delete(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(key = %key, error = %e, "Cache delete failed"),
            }
        }
        removed += self.invalidate_search_results();
        debug!(document = %short_hash(hash), removed, "Invalidated document cache");
        removed
    }

    fn warm_document_cache(&self, document: &Document, pages: &[PageContent]) -> usize {
        let mut written = usize::from(self.cache_document_metadata(document, None));
        for page in pages {
            if self.cache_page_content(page, None) {
                written += 1;
            }
        }
        debug!(document = %short_hash(&document.hash), written, "Warmed document cache");
        written
    }

    fn clear(&self) -> bool {
        if let Ok(mut index) = self.document_keys.lock() {
            index.clear();
        }
        if let Ok(mut keys) = self.search_keys.lock() {
            keys.clear();
        }
        match self.backend.clear() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Cache clear failed");
                false
            }
        }
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.backend.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            tracked_keys: self.tracked_keys(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, PageStatus};
    use chrono::Utc;

    fn document(hash: &str) -> Document {
        Document {
            id: 0,
            hash: hash.to_string(),
            title: "Safety Manual".to_string(),
            filename: "original.pdf".to_string(),
            original_filename: "manual.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            file_path: format!("documents/{}/original.pdf", hash),
            file_size: 1024,
            page_count: Some(2),
            status: DocumentStatus::Completed,
            is_searchable: true,
            metadata: Default::default(),
            processing_started_at: None,
            processing_completed_at: None,
            processing_error: None,
            created_by: Some("alice".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn page(hash: &str, n: u32) -> PageContent {
        PageContent {
            document_hash: hash.to_string(),
            page_number: n,
            content: format!("page {} text", n),
            status: PageStatus::Completed,
            page_file_path: None,
            thumbnail_path: None,
            metadata: Default::default(),
        }
    }

    /// Backend that fails every call.
    struct DownBackend;

    impl CacheBackend for DownBackend {
        fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
        fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
        fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
        fn clear(&self) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
        fn entry_count(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_key_is_independent_of_param_order() {
        let a = generate_cache_key("search", &[("a", Value::from(1)), ("b", Value::from(2))]);
        let b = generate_cache_key("search", &[("b", Value::from(2)), ("a", Value::from(1))]);
        assert_eq!(a, b);
        assert!(a.starts_with("search:"));

        let c = generate_cache_key("search", &[("a", Value::from(1)), ("b", Value::from(3))]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalidate_then_get_metadata_is_none() {
        let cache = CacheService::in_memory(&CacheConfig::default());
        let doc = document("abc");
        assert!(cache.cache_document_metadata(&doc, None));
        assert!(cache.cache_page_content(&page("abc", 1), None));
        assert!(cache.cache_page_content(&page("abc", 2), None));
        assert_eq!(cache.get_cached_document_metadata("abc").unwrap().title, "Safety Manual");

        assert_eq!(cache.invalidate_document_cache("abc"), 3);
        assert!(cache.get_cached_document_metadata("abc").is_none());
        assert!(cache.get_cached_page_content("abc", 1).is_none());
        assert!(cache.get_cached_page_content("abc", 2).is_none());
    }

    #[test]
    fn test_invalidation_leaves_other_documents() {
        let cache = CacheService::in_memory(&CacheConfig::default());
        cache.cache_page_content(&page("abc", 1), None);
        cache.cache_page_content(&page("def", 1), None);

        cache.invalidate_document_cache("abc");
        assert!(cache.get_cached_page_content("def", 1).is_some());
    }

    #[test]
    fn test_invalidation_drops_search_results() {
        let service = CacheService::in_memory(&CacheConfig::default());
        let cache: &dyn DocumentCache = &service;
        let params = [("q", Value::from("safety")), ("page", Value::from(1))];
        cache.cache_search_results(&params, &vec!["abc".to_string()], None);
        assert_eq!(
            cache.get_cached_search_results::<Vec<String>>(&params),
            Some(vec!["abc".to_string()])
        );

        cache.invalidate_document_cache("abc");
        assert_eq!(cache.get_cached_search_results::<Vec<String>>(&params), None);
    }

    #[test]
    fn test_search_results_round_trip_through_trait_object() {
        let cache: Arc<dyn DocumentCache> =
            Arc::new(CacheService::in_memory(&CacheConfig::default()));
        let params = [("q", Value::from("safety"))];
        assert!(cache.cache_search_results(&params, &vec![3u32, 1], None));
        assert_eq!(cache.get_cached_search_results::<Vec<u32>>(&params), Some(vec![3, 1]));
        // Wrong shape reads as a miss.
        assert_eq!(cache.get_cached_search_results::<Vec<String>>(&params), None);

        assert_eq!(cache.invalidate_search_results(), 1);
        assert_eq!(cache.get_cached_search_results::<Vec<u32>>(&params), None);
    }

    #[test]
    fn test_expired_keys_are_forgotten() {
        let cache = CacheService::in_memory(&CacheConfig::default());
        let short = Some(Duration::from_millis(20));
        cache.cache_page_content(&page("abc", 1), short);
        cache.cache_page_content(&page("abc", 2), None);
        cache.cache_page_content(&page("def", 1), short);
        cache.cache_search_value(&[("q", Value::from("x"))], &Value::from(1), short);
        assert_eq!(cache.stats().tracked_keys, 4);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.prune_tracked_keys(), 3);
        assert_eq!(cache.stats().tracked_keys, 1);
        assert!(cache.get_cached_page_content("abc", 2).is_some());
    }

    #[test]
    fn test_miss_forgets_expired_key() {
        let cache = CacheService::in_memory(&CacheConfig::default());
        cache.cache_document_metadata(&document("abc"), Some(Duration::from_millis(20)));
        assert_eq!(cache.stats().tracked_keys, 1);

        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get_cached_document_metadata("abc").is_none());
        assert_eq!(cache.stats().tracked_keys, 0);
    }

    #[test]
    fn test_ttl_override() {
        let cache = CacheService::in_memory(&CacheConfig::default());
        cache.cache_page_content(&page("abc", 1), Some(Duration::from_millis(20)));
        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get_cached_page_content("abc", 1).is_none());
    }

    #[test]
    fn test_warm_populates_metadata_and_pages() {
        let cache = CacheService::in_memory(&CacheConfig::default());
        let written = cache.warm_document_cache(&document("abc"), &[page("abc", 1), page("abc", 2)]);
        assert_eq!(written, 3);
        assert_eq!(cache.get_cached_page_content("abc", 2).unwrap().content, "page 2 text");

        let stats = cache.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_backend_failure_degrades_to_miss() {
        let cache = CacheService::new(Arc::new(DownBackend), &CacheConfig::default());
        assert!(!cache.cache_document_metadata(&document("abc"), None));
        assert!(cache.get_cached_document_metadata("abc").is_none());
        assert_eq!(cache.invalidate_document_cache("abc"), 0);
        assert!(!cache.clear());
        assert_eq!(cache.stats().misses, 1);
    }
}
