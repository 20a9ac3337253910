//! Content-addressed memoization of tool call results.
//!
//! Entries are keyed by a SHA-256 fingerprint of the tool name and the
//! canonical form of the input (`serde_json` serializes object keys in
//! sorted order, so semantically equal inputs hash identically). Expired
//! entries count as misses and are removed off the read path; at capacity,
//! the oldest entry by creation time is evicted.
//!
//! Error results may be cached too, under a shorter TTL, so a flapping tool
//! does not pin its failure for the full success TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

/// A cached tool outcome: the successful value or the error rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    /// The tool succeeded with this value.
    Success(Value),
    /// The tool failed with this error message.
    Failure(String),
}

impl CachedValue {
    /// Returns `true` for a cached success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// One memoized tool call.
#[derive(Debug, Clone)]
struct CacheEntry {
    tool_name: String,
    value: CachedValue,
    created_at: Instant,
    hit_count: u64,
}

/// Cache effectiveness counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Number of successful lookups.
    pub hits: u64,
    /// Number of lookups that found nothing usable.
    pub misses: u64,
    /// `hits / (hits + misses)`, or `0.0` before any lookup.
    pub hit_rate: f64,
    /// Live entries currently stored.
    pub item_count: usize,
}

/// Configuration for [`MemoryToolCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// How long successful results stay valid.
    pub ttl: Duration,
    /// How long error results stay valid. Defaults to a quarter of `ttl`.
    pub error_ttl: Duration,
    /// Maximum number of entries before eviction kicks in.
    pub capacity: usize,
    /// Whether error results are stored at all.
    pub cache_errors: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttl = Duration::from_secs(3600);
        Self {
            ttl,
            error_ttl: ttl / 4,
            capacity: 1000,
            cache_errors: false,
        }
    }
}

impl CacheConfig {
    /// Create a config with the given success TTL; error TTL is `ttl / 4`.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            error_ttl: ttl / 4,
            ..Default::default()
        }
    }

    /// Sets the entry capacity.
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enables caching of error results.
    #[must_use]
    pub const fn cache_errors(mut self, enabled: bool) -> Self {
        self.cache_errors = enabled;
        self
    }
}

/// Compute the fingerprint for a `(tool, input)` pair.
#[must_use]
pub fn fingerprint(tool: &str, input: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(input.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// The tool cache contract.
///
/// All operations take `&self`; implementations must be safe for many
/// concurrent readers and serialize their writers internally.
#[async_trait]
pub trait ToolCache: Send + Sync {
    /// Look up a memoized result. `None` is a miss.
    async fn get(&self, tool: &str, input: &Value) -> Option<CachedValue>;

    /// Memoize a successful result.
    async fn set(&self, tool: &str, input: &Value, result: Value);

    /// Memoize an error result (honoured only when error caching is on).
    async fn set_error(&self, tool: &str, input: &Value, error: &str);

    /// Drop every entry for one tool.
    async fn clear(&self, tool: &str);

    /// Drop every entry.
    async fn clear_all(&self);

    /// Current effectiveness counters.
    async fn stats(&self) -> CacheStats;

    /// Drop entries created more than `older_than` ago.
    async fn invalidate(&self, older_than: Duration);
}

/// A shared, thread-safe tool cache.
pub type SharedToolCache = Arc<dyn ToolCache>;

struct Inner {
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    config: CacheConfig,
}

/// In-process [`ToolCache`] backed by a lock-protected map.
#[derive(Clone)]
pub struct MemoryToolCache {
    inner: Arc<Inner>,
}

impl MemoryToolCache {
    /// Create a cache with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                config,
            }),
        }
    }

    /// The TTL applicable to an entry's value kind.
    fn ttl_for(&self, value: &CachedValue) -> Duration {
        match value {
            CachedValue::Success(_) => self.inner.config.ttl,
            CachedValue::Failure(_) => self.inner.config.error_ttl,
        }
    }

    async fn insert(&self, tool: &str, input: &Value, value: CachedValue) {
        let key = fingerprint(tool, input);
        let mut entries = self.inner.entries.write().await;

        // At capacity and inserting a new key: evict the oldest entry.
        if entries.len() >= self.inner.config.capacity && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(k, _)| k.clone())
            {
                debug!(tool, evicted = %oldest, "tool cache at capacity");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                tool_name: tool.to_owned(),
                value,
                created_at: Instant::now(),
                hit_count: 0,
            },
        );
    }
}

impl Default for MemoryToolCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for MemoryToolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryToolCache")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolCache for MemoryToolCache {
    async fn get(&self, tool: &str, input: &Value) -> Option<CachedValue> {
        let key = fingerprint(tool, input);

        let expired = {
            let entries = self.inner.entries.read().await;
            match entries.get(&key) {
                Some(entry) if entry.created_at.elapsed() <= self.ttl_for(&entry.value) => false,
                Some(_) => true,
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };

        if expired {
            // Expired entries are misses; removal happens off the read path.
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.entries.write().await.remove(&key);
            });
            return None;
        }

        let mut entries = self.inner.entries.write().await;
        let entry = entries.get_mut(&key)?;
        entry.hit_count += 1;
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    async fn set(&self, tool: &str, input: &Value, result: Value) {
        self.insert(tool, input, CachedValue::Success(result)).await;
    }

    async fn set_error(&self, tool: &str, input: &Value, error: &str) {
        if !self.inner.config.cache_errors {
            return;
        }
        self.insert(tool, input, CachedValue::Failure(error.to_owned()))
            .await;
    }

    async fn clear(&self, tool: &str) {
        self.inner
            .entries
            .write()
            .await
            .retain(|_, entry| entry.tool_name != tool);
    }

    async fn clear_all(&self) {
        self.inner.entries.write().await.clear();
    }

    async fn stats(&self) -> CacheStats {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            item_count: self.inner.entries.read().await.len(),
        }
    }

    async fn invalidate(&self, older_than: Duration) {
        self.inner
            .entries
            .write()
            .await
            .retain(|_, entry| entry.created_at.elapsed() <= older_than);
    }
}

/// A [`ToolCache`] that never stores anything, for disabled caching.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl ToolCache for NoopCache {
    async fn get(&self, _tool: &str, _input: &Value) -> Option<CachedValue> {
        None
    }

    async fn set(&self, _tool: &str, _input: &Value, _result: Value) {}

    async fn set_error(&self, _tool: &str, _input: &Value, _error: &str) {}

    async fn clear(&self, _tool: &str) {}

    async fn clear_all(&self) {}

    async fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    async fn invalidate(&self, _older_than: Duration) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_key_order_independent() {
        let a = json!({"x": 1, "y": 2});
        let b: Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();
        assert_eq!(fingerprint("add", &a), fingerprint("add", &b));
    }

    #[test]
    fn fingerprint_separates_tools() {
        let input = json!({"x": 1});
        assert_ne!(fingerprint("add", &input), fingerprint("mul", &input));
    }

    #[tokio::test]
    async fn get_after_set_hits() {
        let cache = MemoryToolCache::default();
        cache.set("add", &json!({"a": 1}), json!(2)).await;

        let value = cache.get("add", &json!({"a": 1})).await.unwrap();
        assert_eq!(value, CachedValue::Success(json!(2)));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.item_count, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = MemoryToolCache::new(CacheConfig::with_ttl(Duration::from_millis(10)));
        cache.set("add", &json!({"a": 1}), json!(2)).await;
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(cache.get("add", &json!({"a": 1})).await.is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let cache = MemoryToolCache::new(CacheConfig::default().capacity(2));
        cache.set("t", &json!({"n": 1}), json!(1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set("t", &json!({"n": 2}), json!(2)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set("t", &json!({"n": 3}), json!(3)).await;

        let stats = cache.stats().await;
        assert_eq!(stats.item_count, 2);
        assert!(cache.get("t", &json!({"n": 1})).await.is_none());
        assert!(cache.get("t", &json!({"n": 3})).await.is_some());
    }

    #[tokio::test]
    async fn errors_cached_only_when_enabled() {
        let off = MemoryToolCache::default();
        off.set_error("add", &json!({}), "boom").await;
        assert!(off.get("add", &json!({})).await.is_none());

        let on = MemoryToolCache::new(CacheConfig::default().cache_errors(true));
        on.set_error("add", &json!({}), "boom").await;
        let value = on.get("add", &json!({})).await.unwrap();
        assert_eq!(value, CachedValue::Failure("boom".into()));
    }

    #[tokio::test]
    async fn error_ttl_is_shorter() {
        let config = CacheConfig {
            ttl: Duration::from_secs(60),
            error_ttl: Duration::from_millis(10),
            capacity: 10,
            cache_errors: true,
        };
        let cache = MemoryToolCache::new(config);
        cache.set_error("add", &json!({}), "boom").await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get("add", &json!({})).await.is_none());
    }

    #[tokio::test]
    async fn clear_is_per_tool() {
        let cache = MemoryToolCache::default();
        cache.set("add", &json!({}), json!(1)).await;
        cache.set("mul", &json!({}), json!(2)).await;

        cache.clear("add").await;
        assert!(cache.get("add", &json!({})).await.is_none());
        assert!(cache.get("mul", &json!({})).await.is_some());

        cache.clear_all().await;
        assert_eq!(cache.stats().await.item_count, 0);
    }

    #[tokio::test]
    async fn invalidate_drops_old_entries() {
        let cache = MemoryToolCache::default();
        cache.set("add", &json!({"n": 1}), json!(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.set("add", &json!({"n": 2}), json!(2)).await;

        cache.invalidate(Duration::from_millis(10)).await;
        let stats = cache.stats().await;
        assert_eq!(stats.item_count, 1);
    }

    #[tokio::test]
    async fn noop_cache_stores_nothing() {
        let cache = NoopCache;
        cache.set("add", &json!({}), json!(1)).await;
        assert!(cache.get("add", &json!({})).await.is_none());
        assert_eq!(cache.stats().await, CacheStats::default());
    }

    #[tokio::test]
    async fn hit_rate_reflects_ratio() {
        let cache = MemoryToolCache::default();
        cache.set("add", &json!({}), json!(1)).await;
        cache.get("add", &json!({})).await;
        cache.get("add", &json!({"other": true})).await;

        let stats = cache.stats().await;
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }
}
