use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store with per-entry TTL. Values are JSON text so any backend
/// can hold them.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    /// Returns whether an entry was present.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;
    fn clear(&self) -> Result<(), CacheError>;
    fn entry_count(&self) -> u64;
}

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process backend on `moka`, bounded by entry count.
pub struct MokaBackend {
    cache: Cache<String, Entry>,
}

impl MokaBackend {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();
        Self { cache }
    }
}

impl CacheBackend for MokaBackend {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.cache.get(key).map(|entry| entry.value))
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.cache.insert(key.to_string(), Entry { value, ttl });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.remove(key).is_some())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
        Ok(())
    }

    fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let backend = MokaBackend::new(100);
        backend
            .set("k", "\"v\"".to_string(), Duration::from_secs(60))
            .unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("\"v\""));
        assert!(backend.delete("k").unwrap());
        assert!(!backend.delete("k").unwrap());
        assert_eq!(backend.get("k").unwrap(), None);
    }

    #[test]
    fn test_entry_expires_after_its_ttl() {
        let backend = MokaBackend::new(100);
        backend
            .set("short", "1".to_string(), Duration::from_millis(20))
            .unwrap();
        backend
            .set("long", "2".to_string(), Duration::from_secs(60))
            .unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(backend.get("short").unwrap(), None);
        assert_eq!(backend.get("long").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_clear() {
        let backend = MokaBackend::new(100);
        backend.set("a", "1".to_string(), Duration::from_secs(60)).unwrap();
        backend.set("b", "2".to_string(), Duration::from_secs(60)).unwrap();
        assert_eq!(backend.entry_count(), 2);
        backend.clear().unwrap();
        assert_eq!(backend.entry_count(), 0);
    }
}
