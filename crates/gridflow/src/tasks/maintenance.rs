use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::domain::metrics::labels;
use crate::domain::{JobStatus, MetricRecord};
use crate::store::{JobRepository, MetricRepository, RepositoryError};

/// Fails jobs stuck in `running` for longer than `stuck_hours`.
pub fn health_check<S>(store: &S, stuck_hours: i64, now: DateTime<Utc>) -> Result<String, RepositoryError>
where
    S: JobRepository + MetricRepository + ?Sized,
{
    tracing::info!("running periodic health check");
    store.insert_metric(MetricRecord::counter(
        "system_health_check",
        labels([("component", "worker")]),
        now,
    ))?;

    let Some(threshold) = window_start(now, Duration::try_hours(stuck_hours)) else {
        tracing::warn!(stuck_hours, "stuck job window out of range, skipping sweep");
        return Ok(format!("Health check skipped: invalid stuck job window of {stuck_hours} hours."));
    };
    let mut stuck = 0usize;
    for mut job in store.jobs()? {
        let is_stuck = job.status == JobStatus::Running
            && job.started_at.is_some_and(|started| started < threshold);
        if !is_stuck {
            continue;
        }

        tracing::warn!(job_id = %job.id, started_at = ?job.started_at, "found stuck ETL job");
        let running = job.version();
        job.fail(format!("Job timed out after {stuck_hours} hours"), now);
        if !store.update_job_if(job.clone(), running)? {
            continue;
        }
        store.insert_metric(MetricRecord::counter(
            "etl_jobs_timeout",
            labels([("job_name", job.name.as_str())]),
            now,
        ))?;
        stuck += 1;
    }

    Ok(format!("Health check completed. Found {stuck} stuck jobs."))
}

pub fn cleanup_old_metrics<S>(
    store: &S,
    retention_days: i64,
    now: DateTime<Utc>,
) -> Result<String, RepositoryError>
where
    S: MetricRepository + ?Sized,
{
    let Some(cutoff) = window_start(now, Duration::try_days(retention_days)) else {
        tracing::warn!(retention_days, "metric retention out of range, skipping cleanup");
        return Ok(format!("Cleanup skipped: invalid retention of {retention_days} days."));
    };
    let deleted = store.delete_metrics_before(cutoff)?;
    tracing::info!(deleted_count = deleted, "cleaned up old metric data");

    let retention = retention_days.to_string();
    store.insert_metric(MetricRecord::gauge(
        "metrics_cleanup",
        deleted as f64,
        labels([("retention_days", retention.as_str())]),
        now,
    ))?;

    Ok(format!("Cleaned up {deleted} old metric records."))
}

/// `now - window`, or `None` for a negative or unrepresentable window.
fn window_start(now: DateTime<Utc>, window: Option<Duration>) -> Option<DateTime<Utc>> {
    window
        .filter(|window| *window >= Duration::zero())
        .and_then(|window| now.checked_sub_signed(window))
}

/// Job statistics for one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub total_records_processed: u64,
    pub success_rate: f64,
}

impl DailyReport {
    fn numeric(&self) -> [(&'static str, f64); 5] {
        [
            ("total_jobs", self.total_jobs as f64),
            ("completed_jobs", self.completed_jobs as f64),
            ("failed_jobs", self.failed_jobs as f64),
            ("total_records_processed", self.total_records_processed as f64),
            ("success_rate", self.success_rate),
        ]
    }
}

/// Summarises jobs created on `date` without recording anything.
pub fn daily_report<S>(store: &S, date: NaiveDate) -> Result<DailyReport, RepositoryError>
where
    S: JobRepository + ?Sized,
{
    let jobs: Vec<_> = store
        .jobs()?
        .into_iter()
        .filter(|job| job.created_at.date_naive() == date)
        .collect();

    let completed: Vec<_> = jobs
        .iter()
        .filter(|job| job.status == JobStatus::Completed)
        .collect();
    let failed_jobs = jobs
        .iter()
        .filter(|job| job.status == JobStatus::Failed)
        .count();
    let success_rate = if jobs.is_empty() {
        0.0
    } else {
        completed.len() as f64 / jobs.len() as f64 * 100.0
    };

    Ok(DailyReport {
        date,
        total_jobs: jobs.len(),
        completed_jobs: completed.len(),
        failed_jobs,
        total_records_processed: completed.iter().map(|job| job.records_processed).sum(),
        success_rate,
    })
}

/// Reports on the previous UTC day and records each figure as a `daily_report_*` gauge.
pub fn generate_daily_report<S>(store: &S, now: DateTime<Utc>) -> Result<DailyReport, RepositoryError>
where
    S: JobRepository + MetricRepository + ?Sized,
{
    let yesterday = now.date_naive() - Duration::days(1);
    let report = daily_report(store, yesterday)?;
    tracing::info!(
        date = %report.date,
        total_jobs = report.total_jobs,
        completed_jobs = report.completed_jobs,
        failed_jobs = report.failed_jobs,
        total_records_processed = report.total_records_processed,
        success_rate = report.success_rate,
        "daily ETL report generated"
    );

    let date = report.date.to_string();
    for (key, value) in report.numeric() {
        store.insert_metric(MetricRecord::gauge(
            format!("daily_report_{key}"),
            value,
            labels([("date", date.as_str())]),
            now,
        ))?;
    }
    Ok(report)
}
