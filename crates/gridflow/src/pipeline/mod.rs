//! Batch ETL pipeline: asset steps, run bookkeeping, schedules and sensors.

pub mod assets;
pub mod sensors;
pub mod substations;

pub use assets::{AggregatedMetrics, AssetError, PipelineConfig};
pub use sensors::SensorResult;
pub use substations::{ImportSummary, SubstationImportError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::{PipelineRun, RunStatus};
use crate::store::{MetricRepository, RepositoryError, RunRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineJob {
    /// extract, clean, aggregate and load.
    EtlPipeline,
    ExtractOnly,
}

impl PipelineJob {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EtlPipeline => "etl_pipeline",
            Self::ExtractOnly => "extract_only",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [Self::EtlPipeline, Self::ExtractOnly]
            .into_iter()
            .find(|job| job.as_str() == value)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::EtlPipeline => "Complete ETL pipeline for data processing",
            Self::ExtractOnly => "Quick data extraction job",
        }
    }

    /// Static tags merged under every run of the job.
    pub fn tags(self) -> BTreeMap<String, String> {
        let environment = match self {
            Self::EtlPipeline => "production",
            Self::ExtractOnly => "development",
        };
        BTreeMap::from([
            ("team".to_string(), "data".to_string()),
            ("environment".to_string(), environment.to_string()),
        ])
    }
}

/// Request to launch a job, deduplicated by `run_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRequest {
    pub run_key: String,
    pub job: PipelineJob,
    pub tags: BTreeMap<String, String>,
}

impl RunRequest {
    pub fn new<K, V>(
        run_key: impl Into<String>,
        job: PipelineJob,
        tags: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            run_key: run_key.into(),
            job,
            tags: tags
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Launch with a fresh key, used for manual runs.
    pub fn manual(job: PipelineJob, now: DateTime<Utc>) -> Self {
        Self::new(
            format!("manual_{}_{}", job.as_str(), now.format("%Y%m%d_%H%M%S")),
            job,
            [("trigger", "manual")],
        )
    }

    /// Run for the `daily_etl_schedule` tick at `scheduled`.
    pub fn daily_etl(scheduled: DateTime<Utc>) -> Self {
        Self::new(
            format!("daily_etl_{}", scheduled.format("%Y_%m_%d")),
            PipelineJob::EtlPipeline,
            [
                ("schedule", "daily".to_string()),
                ("execution_date", scheduled.format("%Y-%m-%d").to_string()),
            ],
        )
    }

    /// Run for the `frequent_extract_schedule` tick at `scheduled`.
    pub fn frequent_extract(scheduled: DateTime<Utc>) -> Self {
        Self::new(
            format!("extract_{}", scheduled.format("%Y_%m_%d_%H")),
            PipelineJob::ExtractOnly,
            [
                ("schedule", "frequent".to_string()),
                ("execution_time", scheduled.format("%Y-%m-%d %H:%M").to_string()),
            ],
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(PipelineRun),
    /// The run key was already recorded.
    Skipped { run_key: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Executes pipeline jobs against a store and records their history.
pub struct PipelineRunner<S> {
    store: Arc<S>,
    config: PipelineConfig,
}

impl<S> PipelineRunner<S>
where
    S: RunRepository + MetricRepository + 'static,
{
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the requested job unless its run key was seen before. Asset
    /// failures are captured on the run record rather than returned.
    pub fn launch(
        &self,
        request: RunRequest,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, PipelineError> {
        let mut tags = request.job.tags();
        tags.extend(request.tags);

        let mut run = PipelineRun {
            run_key: request.run_key,
            job: request.job.as_str().to_string(),
            tags,
            status: RunStatus::Running,
            started_at: now,
            finished_at: None,
            output: None,
            error: None,
        };

        match self.store.insert_run(run.clone()) {
            Ok(()) => {}
            Err(RepositoryError::Conflict) => {
                tracing::info!(run_key = %run.run_key, "run key already launched, skipping");
                return Ok(RunOutcome::Skipped {
                    run_key: run.run_key,
                });
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(run_key = %run.run_key, job = %run.job, "pipeline run started");
        match self.execute(request.job, now) {
            Ok(output) => {
                run.status = RunStatus::Succeeded;
                run.output = Some(output);
            }
            Err(err) => {
                tracing::error!(run_key = %run.run_key, error = %err, "pipeline run failed");
                run.status = RunStatus::Failed;
                run.error = Some(err.to_string());
            }
        }
        run.finished_at = Some(Utc::now().max(now));
        self.store.update_run(run.clone())?;

        Ok(RunOutcome::Completed(run))
    }

    fn execute(&self, job: PipelineJob, now: DateTime<Utc>) -> Result<serde_json::Value, AssetError> {
        let raw = assets::extract(&self.config);
        if job == PipelineJob::ExtractOnly {
            return Ok(json!({ "records": raw.len() }));
        }

        let cleaned = assets::clean(raw, now)?;
        let metrics = assets::aggregate(&cleaned, now);
        let loaded = assets::load(self.store.as_ref(), &self.config, &metrics, now);

        let mut output = serde_json::to_value(&metrics).unwrap_or_else(|_| json!({}));
        if let Some(object) = output.as_object_mut() {
            object.insert("loaded".to_string(), json!(loaded));
        }
        Ok(output)
    }
}
