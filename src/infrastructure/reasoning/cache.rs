//! Node output cache keyed by the caller-supplied `cache_key`

use moka::future::Cache as MokaCache;
use serde_json::Value;

/// Outputs of successful nodes, shared by every run of an engine
///
/// Entries live until invalidated; keys are chosen by chain authors and two
/// nodes sharing a key share an entry.
#[derive(Debug, Clone)]
pub struct ResultCache {
    entries: MokaCache<String, Value>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: MokaCache::builder().build(),
        }
    }

    /// Bounded variant, evicting least recently used entries past `capacity`
    pub fn with_max_capacity(capacity: u64) -> Self {
        Self {
            entries: MokaCache::builder().max_capacity(capacity).build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).await
    }

    pub async fn insert(&self, key: impl Into<String>, output: Value) {
        self.entries.insert(key.into(), output).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}
