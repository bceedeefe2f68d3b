use chrono::{DateTime, Duration, Utc};

use super::{PipelineJob, RunRequest};
use crate::domain::JobStatus;
use crate::store::{DataSourceRepository, JobRepository};

/// What a sensor evaluation decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorResult {
    Run(RunRequest),
    Skip(String),
}

/// Triggers the ETL pipeline when an active source changed in the last hour.
pub fn data_availability<S>(store: &S, now: DateTime<Utc>) -> SensorResult
where
    S: DataSourceRepository + ?Sized,
{
    let sources = match store.sources() {
        Ok(sources) => sources,
        Err(err) => {
            tracing::error!(error = %err, "data availability sensor failed");
            return SensorResult::Skip(format!("Sensor error: {err}"));
        }
    };

    let threshold = now - Duration::hours(1);
    let latest = sources
        .into_iter()
        .filter(|source| source.is_active && source.updated_at >= threshold)
        .max_by_key(|source| source.updated_at);

    match latest {
        Some(source) => SensorResult::Run(RunRequest::new(
            format!(
                "sensor_triggered_{}_{}",
                source.id,
                now.format("%Y%m%d_%H%M%S")
            ),
            PipelineJob::EtlPipeline,
            [
                ("trigger", "sensor".to_string()),
                ("data_source", source.name),
                ("source_type", source.source_type.as_str().to_string()),
            ],
        )),
        None => SensorResult::Skip("No new data sources updated in the last hour".to_string()),
    }
}

/// Re-runs the pipeline for the oldest job that failed temporarily in the last four hours.
pub fn failure_recovery<S>(store: &S, now: DateTime<Utc>) -> SensorResult
where
    S: JobRepository + ?Sized,
{
    let jobs = match store.jobs() {
        Ok(jobs) => jobs,
        Err(err) => {
            tracing::error!(error = %err, "failure recovery sensor failed");
            return SensorResult::Skip(format!("Recovery sensor error: {err}"));
        }
    };

    let threshold = now - Duration::hours(4);
    let oldest = jobs
        .into_iter()
        .filter(|job| {
            job.status == JobStatus::Failed
                && job.completed_at.is_some_and(|at| at >= threshold)
                && job.error_message.to_lowercase().contains("temporary")
        })
        .min_by_key(|job| job.completed_at);

    match oldest {
        Some(job) => SensorResult::Run(RunRequest::new(
            format!("retry_{}_{}", job.id, now.format("%Y%m%d_%H%M%S")),
            PipelineJob::EtlPipeline,
            [
                ("trigger", "retry".to_string()),
                ("original_job_id", job.id.to_string()),
                ("retry_reason", "automatic_recovery".to_string()),
            ],
        )),
        None => SensorResult::Skip("No failed jobs requiring automatic retry".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataSource, DataSourceInput, EtlJob, JsonObject};
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 12, 30, 5).single().expect("valid time")
    }

    fn source(store: &InMemoryStore, name: &str, updated: DateTime<Utc>, active: bool) -> DataSource {
        let source = DataSource::create(
            DataSourceInput {
                name: Some(name.to_string()),
                source_type: Some("file".to_string()),
                connection_string: Some("/data/export.csv".to_string()),
                is_active: Some(active),
                ..DataSourceInput::default()
            },
            updated,
        )
        .expect("valid source");
        store.insert_source(source).expect("insert")
    }

    #[test]
    fn availability_picks_latest_active_source() {
        let store = InMemoryStore::new();
        assert_eq!(
            data_availability(&store, now()),
            SensorResult::Skip("No new data sources updated in the last hour".to_string())
        );

        source(&store, "older", now() - Duration::minutes(50), true);
        let latest = source(&store, "latest", now() - Duration::minutes(5), true);
        source(&store, "inactive", now() - Duration::minutes(1), false);

        let SensorResult::Run(request) = data_availability(&store, now()) else {
            panic!("expected a run request");
        };
        assert_eq!(
            request.run_key,
            format!("sensor_triggered_{}_20250701_123005", latest.id)
        );
        assert_eq!(request.tags["data_source"], "latest");
        assert_eq!(request.tags["source_type"], "file");
    }

    #[test]
    fn recovery_only_retries_recent_temporary_failures() {
        let store = InMemoryStore::new();
        let parent = source(&store, "feed", now() - Duration::days(1), true);

        let mut permanent = EtlJob::new("schema".into(), parent.id, JsonObject::new(), now());
        permanent.fail("schema mismatch", now() - Duration::hours(1));
        let mut stale = EtlJob::new("stale".into(), parent.id, JsonObject::new(), now());
        stale.fail("Temporary outage", now() - Duration::hours(5));
        let mut recent = EtlJob::new("recent".into(), parent.id, JsonObject::new(), now());
        recent.fail("temporary network error", now() - Duration::hours(2));
        for job in [permanent, stale, recent.clone()] {
            store.insert_job(job).expect("insert");
        }

        let SensorResult::Run(request) = failure_recovery(&store, now()) else {
            panic!("expected a retry request");
        };
        assert_eq!(request.tags["original_job_id"], recent.id.to_string());
        assert!(request.run_key.starts_with(&format!("retry_{}_", recent.id)));
    }

    #[test]
    fn store_errors_become_skip_reasons() {
        let store = InMemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            failure_recovery(&store, now()),
            SensorResult::Skip(reason) if reason.starts_with("Recovery sensor error")
        ));
    }
}
