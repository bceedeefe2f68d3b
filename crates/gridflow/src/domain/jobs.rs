use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sources::DataSourceView;
use super::validation::{check_length, ValidationErrors};
use super::JsonObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const fn all() -> [Self; 5] {
        [
            Self::Pending,
            Self::Running,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
        ]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
    }
}

/// Tracking record for one ETL run against a data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlJob {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub data_source_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub error_message: String,
    pub configuration: JsonObject,
    /// Worker retries consumed since the job was last (re)submitted.
    #[serde(default)]
    pub retries: u32,
    /// Submission generation, bumped by every manual retry. Queued work for an
    /// older generation is dropped.
    #[serde(default)]
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a conditional write expects the stored job to still look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobVersion {
    pub status: JobStatus,
    pub attempt: u32,
}

/// A state change the current status does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Only failed or cancelled jobs can be retried")]
    NotRetryable,
    #[error("Only pending or running jobs can be cancelled")]
    NotCancellable,
}

impl EtlJob {
    pub fn new(
        name: String,
        data_source_id: Uuid,
        configuration: JsonObject,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            status: JobStatus::Pending,
            data_source_id,
            started_at: None,
            completed_at: None,
            records_processed: 0,
            error_message: String::new(),
            configuration,
            retries: 0,
            attempt: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn version(&self) -> JobVersion {
        JobVersion {
            status: self.status,
            attempt: self.attempt,
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.error_message.is_empty()
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn complete(&mut self, records_processed: u64, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.records_processed = records_processed;
        self.updated_at = now;
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = message.into();
        self.updated_at = now;
    }

    /// Puts a failed or cancelled job back in the queue state.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !matches!(self.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(TransitionError::NotRetryable);
        }
        self.status = JobStatus::Pending;
        self.error_message.clear();
        self.started_at = None;
        self.completed_at = None;
        self.retries = 0;
        self.attempt = self.attempt.wrapping_add(1);
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !matches!(self.status, JobStatus::Pending | JobStatus::Running) {
            return Err(TransitionError::NotCancellable);
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn view(&self, data_source: DataSourceView) -> EtlJobView {
        EtlJobView {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            data_source,
            started_at: self.started_at,
            completed_at: self.completed_at,
            records_processed: self.records_processed,
            error_message: self.error_message.clone(),
            configuration: self.configuration.clone(),
            duration: self.duration_seconds(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Body of a job creation request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEtlJob {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub configuration: Option<JsonObject>,
}

impl NewEtlJob {
    /// Field-level checks; the referenced source is checked against the store by the caller.
    pub fn validate(self) -> Result<(String, Uuid, JsonObject), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match &self.name {
            Some(name) => check_length(&mut errors, "name", name, 1, 100),
            None => errors.add("name", "This field is required."),
        }

        let data_source = match self.data_source.as_deref() {
            Some(raw) => match Uuid::parse_str(raw.trim()) {
                Ok(id) => Some(id),
                Err(_) => {
                    errors.add("data_source", "Must be a valid UUID.");
                    None
                }
            },
            None => {
                errors.add("data_source", "This field is required.");
                None
            }
        };

        errors.into_result()?;
        match (self.name, data_source) {
            (Some(name), Some(id)) => Ok((
                name.trim().to_string(),
                id,
                self.configuration.unwrap_or_default(),
            )),
            _ => Err(ValidationErrors::single("non_field_errors", "Invalid data.")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EtlJobView {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub data_source: DataSourceView,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub error_message: String,
    pub configuration: JsonObject,
    /// Seconds between start and completion.
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 2, 0, 0).single().expect("valid time")
    }

    fn job() -> EtlJob {
        EtlJob::new("nightly".to_string(), Uuid::new_v4(), JsonObject::new(), now())
    }

    #[test]
    fn duration_requires_both_timestamps() {
        let mut job = job();
        assert_eq!(job.duration_seconds(), None);

        job.start(now());
        assert_eq!(job.duration_seconds(), None);

        job.complete(1000, now() + Duration::milliseconds(2500));
        assert_eq!(job.duration_seconds(), Some(2.5));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn only_failed_or_cancelled_jobs_reset() {
        let mut job = job();
        assert_eq!(
            job.reset_for_retry(now()),
            Err(TransitionError::NotRetryable)
        );

        job.start(now());
        job.fail("temporary outage", now());
        job.retries = 3;
        job.reset_for_retry(now()).expect("failed job resets");

        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error_message.is_empty());
        assert!(job.started_at.is_none() && job.completed_at.is_none());
        assert_eq!(job.retries, 0);
        assert_eq!(job.attempt, 1);
    }

    #[test]
    fn completed_jobs_cannot_be_cancelled() {
        let mut job = job();
        job.complete(10, now());
        assert_eq!(job.cancel(now()), Err(TransitionError::NotCancellable));
    }

    #[test]
    fn creation_payload_requires_name_and_valid_source() {
        let err = NewEtlJob {
            data_source: Some("not-a-uuid".to_string()),
            ..NewEtlJob::default()
        }
        .validate()
        .expect_err("invalid payload");

        assert_eq!(err.messages("name"), ["This field is required."]);
        assert_eq!(err.messages("data_source"), ["Must be a valid UUID."]);
    }
}
