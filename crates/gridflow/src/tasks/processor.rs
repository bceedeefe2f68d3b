use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

use super::{Task, TaskContext, TaskError};
use crate::domain::metrics::labels;
use crate::domain::{DataSource, EtlJob, JobStatus, JsonObject, MetricRecord, SourceType};
use crate::pipeline::substations::{self, SubstationImportError};
use crate::store::{RepositoryError, Store};

/// Why processing a job's data source failed.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Invalid configuration value for '{key}': expected a non-negative integer")]
    InvalidConfiguration { key: &'static str },
    #[error("Data source {0} does not exist")]
    MissingSource(Uuid),
    #[error(transparent)]
    SubstationImport(#[from] SubstationImportError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ProcessError {
    /// Label value recorded on `etl_jobs_failed`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration { .. } => "InvalidConfiguration",
            Self::MissingSource(_) => "MissingSource",
            Self::SubstationImport(_) => "SubstationImportError",
            Self::Repository(_) => "RepositoryError",
        }
    }
}

/// Runs one submission of an ETL job, scheduling a backoff retry when it fails.
///
/// Every status write is conditional on the job still being the version this
/// task last saw, so a cancel, a stuck-job timeout or a manual retry landing
/// mid-run wins over the worker's own result.
pub async fn process_etl_job<S>(
    context: &TaskContext<S>,
    job_id: Uuid,
    attempt: u32,
) -> Result<String, TaskError>
where
    S: Store + 'static,
{
    let store = context.store();
    let Some(mut job) = store.job(job_id)? else {
        tracing::error!(%job_id, "ETL job not found");
        return Err(TaskError::JobNotFound(job_id));
    };
    if job.attempt != attempt {
        tracing::info!(%job_id, attempt, current = job.attempt, "dropping superseded ETL job task");
        return Ok(format!("ETL job {job_id} attempt {attempt} was superseded"));
    }
    match job.status {
        JobStatus::Pending | JobStatus::Failed => {}
        JobStatus::Cancelled => {
            tracing::info!(%job_id, "ETL job was cancelled, skipping");
            return Ok(format!("ETL job {job_id} was cancelled"));
        }
        status => {
            tracing::info!(%job_id, status = status.as_str(), "ETL job is not waiting to run, skipping");
            return Ok(format!("ETL job {job_id} is already {}", status.as_str()));
        }
    }

    let source = store.source(job.data_source_id)?;
    let source_name = source
        .as_ref()
        .map(|source| source.name.clone())
        .unwrap_or_default();

    let queued = job.version();
    job.start(Utc::now());
    if !store.update_job_if(job.clone(), queued)? {
        return Ok(superseded(job_id));
    }
    tracing::info!(%job_id, job_name = %job.name, "starting ETL job processing");
    store.insert_metric(MetricRecord::counter(
        "etl_jobs_started",
        labels([("job_name", job.name.as_str()), ("data_source", source_name.as_str())]),
        Utc::now(),
    ))?;
    metrics::counter!("gridflow_etl_jobs_started_total", "data_source" => source_name.clone())
        .increment(1);

    let outcome = match &source {
        Some(source) => process_source(context, source, &job.configuration).await,
        None => Err(ProcessError::MissingSource(job.data_source_id)),
    };

    match outcome {
        Ok(records) => {
            if !complete(context, &mut job, &source_name, records)? {
                return Ok(superseded(job_id));
            }
            Ok(format!("ETL job {job_id} processed {records} records"))
        }
        Err(err) => {
            if !fail(context, &mut job, &err)? {
                return Ok(superseded(job_id));
            }
            Err(TaskError::JobFailed {
                job_id,
                source: err,
            })
        }
    }
}

fn superseded(job_id: Uuid) -> String {
    tracing::info!(%job_id, "ETL job changed during processing, discarding result");
    format!("ETL job {job_id} was cancelled or resubmitted during processing")
}

/// Records success; `false` when the running job was changed underneath us.
fn complete<S: Store + 'static>(
    context: &TaskContext<S>,
    job: &mut EtlJob,
    source_name: &str,
    records: u64,
) -> Result<bool, RepositoryError> {
    let store = context.store();
    let now = Utc::now();
    let running = job.version();
    job.complete(records, now);
    if !store.update_job_if(job.clone(), running)? {
        return Ok(false);
    }

    let duration = job.duration_seconds().unwrap_or_default();
    store.insert_metric(MetricRecord::gauge(
        "etl_job_duration_seconds",
        duration,
        labels([("job_name", job.name.as_str()), ("status", "completed")]),
        now,
    ))?;
    store.insert_metric(MetricRecord::gauge(
        "etl_records_processed",
        records as f64,
        labels([("job_name", job.name.as_str()), ("data_source", source_name)]),
        now,
    ))?;
    metrics::counter!("gridflow_etl_records_processed_total").increment(records);
    metrics::histogram!("gridflow_etl_job_duration_seconds").record(duration);

    tracing::info!(
        job_id = %job.id,
        records_processed = records,
        duration,
        "ETL job completed successfully"
    );
    Ok(true)
}

fn fail<S: Store + 'static>(
    context: &TaskContext<S>,
    job: &mut EtlJob,
    err: &ProcessError,
) -> Result<bool, RepositoryError> {
    let store = context.store();
    let now = Utc::now();
    let running = job.version();

    job.fail(err.to_string(), now);
    let attempt = job.retries;
    let retry = attempt < context.worker_config().max_retries;
    if retry {
        job.retries += 1;
    }
    if !store.update_job_if(job.clone(), running)? {
        return Ok(false);
    }
    tracing::error!(job_id = %job.id, error = %err, "ETL job failed");

    store.insert_metric(MetricRecord::counter(
        "etl_jobs_failed",
        labels([("job_name", job.name.as_str()), ("error_type", err.error_type())]),
        now,
    ))?;
    metrics::counter!("gridflow_etl_jobs_failed_total", "error_type" => err.error_type())
        .increment(1);

    if retry {
        let delay = retry_delay(context.worker_config().retry_base_delay, attempt);
        tracing::info!(
            job_id = %job.id,
            retry = attempt + 1,
            countdown_secs = delay.as_secs(),
            "retrying ETL job"
        );
        context.queue().enqueue_after(Task::process_job(job), delay);
    }
    Ok(true)
}

/// `base * 2^attempt`.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

async fn process_source<S: Store + 'static>(
    context: &TaskContext<S>,
    source: &DataSource,
    configuration: &JsonObject,
) -> Result<u64, ProcessError> {
    let (records, latency) = match source.source_type {
        SourceType::Database => (
            setting(configuration, "batch_size", 1000)?,
            Duration::from_secs(2),
        ),
        SourceType::Api => {
            let page_size = setting(configuration, "page_size", 100)?;
            let pages = setting(configuration, "pages", 5)?;
            (page_size.saturating_mul(pages), Duration::from_millis(1500))
        }
        SourceType::File => {
            if configuration.get("dataset").and_then(|v| v.as_str()) == Some("substations") {
                let summary = substations::import_path(context.store().as_ref(), &source.connection_string)?;
                tracing::info!(
                    rows = summary.rows,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    "imported substation records"
                );
                (summary.rows as u64, Duration::from_secs(3))
            } else {
                (
                    setting(configuration, "estimated_records", 5000)?,
                    Duration::from_secs(3),
                )
            }
        }
        SourceType::Stream => {
            let duration = setting(configuration, "duration_seconds", 10)?;
            let per_second = setting(configuration, "records_per_second", 100)?;
            (
                duration.saturating_mul(per_second),
                Duration::from_secs(duration.min(5)),
            )
        }
    };

    if context.worker_config().simulate_latency {
        tokio::time::sleep(latency).await;
    }
    Ok(records)
}

fn setting(configuration: &JsonObject, key: &'static str, default: u64) -> Result<u64, ProcessError> {
    match configuration.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .ok_or(ProcessError::InvalidConfiguration { key }),
    }
}
