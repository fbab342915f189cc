//! Keyed query cache with targeted invalidation.
//!
//! The realtime layer only needs [`QueryCache::invalidate`]; hosts that
//! already run a data-fetching cache implement the trait over it. For
//! everything else there is [`MemoryQueryCache`].

use std::fmt;
use std::future::Future;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ErrorResponse;
use crate::error_codes::ErrorCode;

/// Ordered tuple identifying a cached query result, e.g. `["game", "01HV..."]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// `["game", id]`
    pub fn game(id: impl Into<String>) -> Self {
        Self(vec!["game".into(), id.into()])
    }

    /// `["lobby", id]`
    pub fn lobby(id: impl Into<String>) -> Self {
        Self(vec!["lobby".into(), id.into()])
    }

    /// `["lobbies"]`
    pub fn lobbies() -> Self {
        Self(vec!["lobbies".into()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// `true` if `prefix` matches the leading segments of this key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{segment:?}")?;
        }
        write!(f, "]")
    }
}

/// A cache that can drop or mark stale everything under a key.
///
/// Invalidation matches by prefix: invalidating `["lobbies"]` also covers
/// `["lobbies", "open"]`.
pub trait QueryCache: Send + Sync + 'static {
    fn invalidate(&self, key: &QueryKey);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stale: bool,
}

/// Concurrent in-memory [`QueryCache`].
///
/// Invalidated entries are kept but marked stale; [`get`](Self::get) ignores
/// them and [`fetch`](Self::fetch) refetches them.
#[derive(Debug, Default)]
pub struct MemoryQueryCache {
    entries: DashMap<QueryKey, CacheEntry>,
}

impl MemoryQueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh value under `key`.
    pub fn insert(&self, key: QueryKey, value: Value) {
        self.entries.insert(key, CacheEntry { value, stale: false });
    }

    /// The cached value for `key`, unless it is missing or stale.
    pub fn get(&self, key: &QueryKey) -> Option<Value> {
        self.entries
            .get(key)
            .filter(|entry| !entry.stale)
            .map(|entry| entry.value.clone())
    }

    /// `true` if `key` is cached and has been invalidated since it was stored.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.stale)
    }

    pub fn remove(&self, key: &QueryKey) -> Option<Value> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the fresh cached value for `key`, or run `fetcher`, cache its
    /// result, and return it.
    ///
    /// # Errors
    ///
    /// Whatever `fetcher` returns, or an `UNKNOWN_ERROR` if the value cannot
    /// be converted to or from JSON. Errors are never cached.
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<T, ErrorResponse>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ErrorResponse>>,
    {
        if let Some(value) = self.get(&key) {
            match serde_json::from_value(value) {
                Ok(cached) => return Ok(cached),
                Err(e) => debug!(key = %key, error = %e, "cached value has a different shape; refetching"),
            }
        }

        let fetched = fetcher().await?;
        let value = serde_json::to_value(&fetched)
            .map_err(|e| {
                ErrorResponse::new(
                    format!("failed to cache response: {e}"),
                    ErrorCode::UnknownError.as_wire(),
                )
            })?;
        self.insert(key, value);
        Ok(fetched)
    }
}

impl QueryCache for MemoryQueryCache {
    fn invalidate(&self, key: &QueryKey) {
        let mut marked = 0usize;
        for mut entry in self.entries.iter_mut() {
            if entry.key().starts_with(key) {
                entry.value_mut().stale = true;
                marked += 1;
            }
        }
        debug!(key = %key, marked, "invalidated queries");
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn key_display_and_serde() {
        let key = QueryKey::game("01HV");
        assert_eq!(key.to_string(), r#"["game","01HV"]"#);
        assert_eq!(serde_json::to_string(&key).unwrap(), r#"["game","01HV"]"#);
        assert_eq!(QueryKey::lobbies().segments(), &["lobbies".to_string()]);
    }

    #[test]
    fn prefix_matching() {
        let filtered = QueryKey::new(["lobbies", "open"]);
        assert!(filtered.starts_with(&QueryKey::lobbies()));
        assert!(!QueryKey::lobbies().starts_with(&filtered));
        assert!(!QueryKey::lobby("L1").starts_with(&QueryKey::lobbies()));
    }

    #[test]
    fn invalidate_marks_prefix_matches_stale() {
        let cache = MemoryQueryCache::new();
        cache.insert(QueryKey::lobbies(), json!([]));
        cache.insert(QueryKey::new(["lobbies", "open"]), json!([]));
        cache.insert(QueryKey::lobby("L1"), json!({"id": "L1"}));

        cache.invalidate(&QueryKey::lobbies());

        assert!(cache.is_stale(&QueryKey::lobbies()));
        assert!(cache.is_stale(&QueryKey::new(["lobbies", "open"])));
        assert!(!cache.is_stale(&QueryKey::lobby("L1")));
        assert!(cache.get(&QueryKey::lobbies()).is_none());
        assert_eq!(cache.get(&QueryKey::lobby("L1")), Some(json!({"id": "L1"})));
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn fetch_uses_fresh_entries_and_refetches_stale_ones() {
        let cache = MemoryQueryCache::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let fetcher = move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, ErrorResponse>(json!({ "version": n }))
        };

        let first: Value = cache.fetch(QueryKey::game("G1"), fetcher).await.unwrap();
        let second: Value = cache.fetch(QueryKey::game("G1"), fetcher).await.unwrap();
        assert_eq!(first, json!({"version": 1}));
        assert_eq!(second, first);

        cache.invalidate(&QueryKey::game("G1"));
        let third: Value = cache.fetch(QueryKey::game("G1"), fetcher).await.unwrap();
        assert_eq!(third, json!({"version": 2}));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_errors_are_not_cached() {
        let cache = MemoryQueryCache::new();
        let err = cache
            .fetch::<Value, _, _>(QueryKey::game("G1"), || async {
                Err(ErrorResponse::new("Game not found", "HTTP_404"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code.as_deref(), Some("HTTP_404"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn uncacheable_value_is_an_unknown_error() {
        let cache = MemoryQueryCache::new();
        let err = cache
            .fetch(QueryKey::game("G1"), || async {
                // Non-string map keys cannot become JSON.
                Ok::<_, ErrorResponse>(std::collections::BTreeMap::from([((1u8, 2u8), 3u8)]))
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code.as_deref(), Some("UNKNOWN_ERROR"));
        assert!(err.message.starts_with("failed to cache response"));
        assert!(cache.is_empty());
    }
}
