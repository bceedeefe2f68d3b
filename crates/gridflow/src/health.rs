use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::time::{Duration, Instant};

use crate::cache::TtlCache;
use crate::store::Store;
use crate::tasks::Heartbeat;

/// A worker that has not beaten within this window is reported as down.
pub const WORKER_STALE_AFTER: i64 = 60;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub database: bool,
    pub cache: bool,
    pub worker: bool,
    pub uptime: f64,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Probes the store, the cache and the worker heartbeat.
///
/// Store and cache failures mark the report unhealthy; a missing worker only
/// clears the `worker` flag.
pub fn check<S>(
    store: &S,
    cache: &TtlCache,
    heartbeat: Option<&Heartbeat>,
    started: Instant,
    now: DateTime<Utc>,
) -> HealthReport
where
    S: Store + ?Sized,
{
    let database = match store.ping() {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(error = %err, "database health check failed");
            false
        }
    };

    let cache_ok = cache
        .set("health_check", json!("ok"), Duration::from_secs(30))
        .and_then(|_| cache.get("health_check"))
        .map(|value| value == Some(json!("ok")));
    let cache_ok = match cache_ok {
        Ok(ok) => ok,
        Err(err) => {
            tracing::error!(error = %err, "cache health check failed");
            false
        }
    };

    let worker = heartbeat
        .is_some_and(|beat| beat.is_fresh(now, chrono::Duration::seconds(WORKER_STALE_AFTER)));

    HealthReport {
        status: if database && cache_ok { "healthy" } else { "unhealthy" },
        timestamp: now,
        version: env!("CARGO_PKG_VERSION"),
        database,
        cache: cache_ok,
        worker,
        uptime: started.elapsed().as_secs_f64(),
    }
}
