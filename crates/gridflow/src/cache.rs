use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Cache backend failure.
#[derive(Debug, thiserror::Error)]
#[error("cache unavailable: {0}")]
pub struct CacheError(String);

/// Expiring key/value cache shared by the HTTP handlers.
#[derive(Debug, Clone, Default)]
pub struct TtlCache {
    entries: Arc<Mutex<HashMap<String, (Instant, Value)>>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| CacheError("lock poisoned".to_string()))?;
        let now = Instant::now();
        guard.retain(|_, (expires, _)| *expires > now);
        guard.insert(key.to_string(), (now + ttl, value));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| CacheError("lock poisoned".to_string()))?;
        Ok(guard
            .get(key)
            .filter(|(expires, _)| *expires > Instant::now())
            .map(|(_, value)| value.clone()))
    }

    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError("lock poisoned".to_string()))?
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_expire_after_ttl() {
        let cache = TtlCache::new();
        cache.set("fresh", json!("ok"), Duration::from_secs(30)).expect("set");
        cache.set("stale", json!(1), Duration::ZERO).expect("set");

        assert_eq!(cache.get("fresh").expect("get"), Some(json!("ok")));
        assert_eq!(cache.get("stale").expect("get"), None);
    }

    #[test]
    fn delete_removes_entry() {
        let cache = TtlCache::new();
        cache.set("k", json!(true), Duration::from_secs(5)).expect("set");
        cache.delete("k").expect("delete");
        assert_eq!(cache.get("k").expect("get"), None);
    }
}
