//! Cancellation token management for documents being processed.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::sanitize::short_hash;

/// One token per document run. A cancelled token stays registered until the
/// document has settled, so jobs still queued for it observe the
/// cancellation instead of finding no token at all.
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: DashMap<String, CancellationToken>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token for a new run, replacing any previous one.
    pub fn register(&self, document_hash: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(document_hash.to_string(), token.clone());
        token
    }

    pub fn token(&self, document_hash: &str) -> Option<CancellationToken> {
        self.tokens.get(document_hash).map(|t| t.clone())
    }

    /// Triggers cancellation. Returns false when no run is registered.
    pub fn cancel(&self, document_hash: &str) -> bool {
        match self.tokens.get(document_hash) {
            Some(token) => {
                token.cancel();
                info!(document = %short_hash(document_hash), "Document processing cancellation triggered");
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, document_hash: &str) -> bool {
        self.tokens
            .get(document_hash)
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    /// Drops the token once the run has reached a terminal state.
    pub fn unregister(&self, document_hash: &str) {
        self.tokens.remove(document_hash);
    }

    /// Cancels every registered run. Returns the affected document hashes.
    pub fn cancel_all(&self) -> Vec<String> {
        let mut cancelled = Vec::new();
        for entry in self.tokens.iter() {
            if !entry.value().is_cancelled() {
                entry.value().cancel();
                cancelled.push(entry.key().clone());
            }
        }
        cancelled
    }

    pub fn active(&self) -> usize {
        self.tokens.len()
    }
}
