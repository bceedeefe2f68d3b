use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::domain::{EtlJobView, JobStatus};
use crate::store::{RepositoryError, Store};

const CACHE_KEY: &str = "dashboard_stats";
const CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_data_sources: usize,
    pub active_data_sources: usize,
    pub total_etl_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs_today: usize,
    pub failed_jobs_today: usize,
    pub recent_jobs: Vec<EtlJobView>,
}

/// Counts for the dashboard, with "today" taken as the UTC date of `now`.
pub fn compute<S>(store: &S, now: DateTime<Utc>) -> Result<DashboardStats, RepositoryError>
where
    S: Store + ?Sized,
{
    let sources = store.sources()?;
    let mut jobs = store.jobs()?;
    let today = now.date_naive();

    let finished_today = |status: JobStatus| {
        jobs.iter()
            .filter(|job| {
                job.status == status
                    && job.completed_at.is_some_and(|at| at.date_naive() == today)
            })
            .count()
    };
    let completed_jobs_today = finished_today(JobStatus::Completed);
    let failed_jobs_today = finished_today(JobStatus::Failed);
    let running_jobs = jobs
        .iter()
        .filter(|job| job.status == JobStatus::Running)
        .count();

    let counts: HashMap<_, usize> = jobs.iter().fold(HashMap::new(), |mut acc, job| {
        *acc.entry(job.data_source_id).or_default() += 1;
        acc
    });
    let total_etl_jobs = jobs.len();
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let recent_jobs = jobs
        .iter()
        .take(5)
        .filter_map(|job| {
            let source = sources.iter().find(|source| source.id == job.data_source_id)?;
            Some(job.view(source.view(counts.get(&source.id).copied().unwrap_or_default())))
        })
        .collect();

    Ok(DashboardStats {
        total_data_sources: sources.len(),
        active_data_sources: sources.iter().filter(|source| source.is_active).count(),
        total_etl_jobs,
        running_jobs,
        completed_jobs_today,
        failed_jobs_today,
        recent_jobs,
    })
}

/// Returns cached stats when fresh, otherwise recomputes and caches them.
/// Cache failures fall back to computing directly.
pub fn cached<S>(store: &S, cache: &TtlCache, now: DateTime<Utc>) -> Result<Value, RepositoryError>
where
    S: Store + ?Sized,
{
    match cache.get(CACHE_KEY) {
        Ok(Some(hit)) => return Ok(hit),
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "dashboard cache read failed"),
    }

    let stats = serde_json::to_value(compute(store, now)?)
        .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
    if let Err(err) = cache.set(CACHE_KEY, stats.clone(), CACHE_TTL) {
        tracing::warn!(error = %err, "dashboard cache write failed");
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataSource, DataSourceInput, EtlJob, JsonObject};
    use crate::store::{DataSourceRepository, InMemoryStore, JobRepository};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 15, 0, 0).single().expect("valid time")
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        let source = store
            .insert_source(
                DataSource::create(
                    DataSourceInput {
                        name: Some("UKPN".to_string()),
                        source_type: Some("database".to_string()),
                        connection_string: Some("postgres://ukpn".to_string()),
                        ..DataSourceInput::default()
                    },
                    now(),
                )
                .expect("valid source"),
            )
            .expect("insert");

        for i in 0..7 {
            let mut job = EtlJob::new(
                format!("job {i}"),
                source.id,
                JsonObject::new(),
                now() - ChronoDuration::hours(i),
            );
            match i {
                0 => job.start(now()),
                1 => job.complete(10, now()),
                2 => job.fail("boom", now() - ChronoDuration::days(1)),
                _ => {}
            }
            store.insert_job(job).expect("insert");
        }
        store
    }

    #[test]
    fn counts_use_todays_completion_date() {
        let stats = compute(&seeded(), now()).expect("stats");
        assert_eq!(stats.total_data_sources, 1);
        assert_eq!(stats.active_data_sources, 1);
        assert_eq!(stats.total_etl_jobs, 7);
        assert_eq!(stats.running_jobs, 1);
        assert_eq!(stats.completed_jobs_today, 1);
        assert_eq!(stats.failed_jobs_today, 0);
        assert_eq!(stats.recent_jobs.len(), 5);
        assert_eq!(stats.recent_jobs[0].name, "job 0");
    }

    #[test]
    fn cached_result_is_reused_within_ttl() {
        let store = seeded();
        let cache = TtlCache::new();
        let first = cached(&store, &cache, now()).expect("stats");

        store.set_offline(true);
        let second = cached(&store, &cache, now()).expect("served from cache");
        assert_eq!(first, second);
    }
}
