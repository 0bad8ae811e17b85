//! Last-payload-per-topic cache feeding `GET /api/sensors`.
//!
//! Updated from the broker callback thread, read from actix workers; the
//! snapshot is a deep copy so the lock is released before serialization.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::agriha::unix_time;

#[derive(Default)]
struct CacheInner {
    data: HashMap<String, serde_json::Value>,
    updated_at: f64,
}

#[derive(Default)]
pub struct SensorCache {
    inner: Mutex<CacheInner>,
}

impl SensorCache {
    pub fn new() -> SensorCache {
        SensorCache::default()
    }

    pub fn update(&self, topic: &str, value: serde_json::Value) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.data.insert(topic.to_string(), value);
        inner.updated_at = unix_time();
    }

    /// Deep copy of the cache plus its last-update time (0.0 = no data yet).
    pub fn snapshot(&self) -> (HashMap<String, serde_json::Value>, f64) {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        (inner.data.clone(), inner.updated_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let cache = SensorCache::new();
        let (data, updated_at) = cache.snapshot();
        assert!(data.is_empty());
        assert_eq!(updated_at, 0.0);
    }

    #[test]
    fn update_replaces_per_topic() {
        let cache = SensorCache::new();
        cache.update("a/b", serde_json::json!({"v": 1}));
        cache.update("a/b", serde_json::json!({"v": 2}));
        cache.update("a/c", serde_json::json!({"v": 3}));
        let (data, updated_at) = cache.snapshot();
        assert_eq!(data.len(), 2);
        assert_eq!(data["a/b"], serde_json::json!({"v": 2}));
        assert!(updated_at > 0.0);
    }

    #[test]
    fn update_advances_the_timestamp() {
        let cache = SensorCache::new();
        cache.update("a", serde_json::json!(1));
        let (_, first) = cache.snapshot();
        cache.update("a", serde_json::json!(2));
        let (_, second) = cache.snapshot();
        assert!(second >= first);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let cache = SensorCache::new();
        cache.update("a", serde_json::json!(1));
        let (mut data, _) = cache.snapshot();
        data.insert(String::from("b"), serde_json::json!(2));
        let (data2, _) = cache.snapshot();
        assert_eq!(data2.len(), 1);
    }
}
