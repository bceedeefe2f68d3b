//! Persistence seams. Each aggregate has its own repository trait so services
//! and tests can depend on only what they touch; [`Store`] bundles them for the
//! HTTP layer, the worker and the scheduler.

mod memory;

pub use memory::InMemoryStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{ApiKey, DataSource, EtlJob, JobVersion, MetricRecord, PipelineRun, Substation, SubstationRecord, User};

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

pub trait UserRepository: Send + Sync {
    /// Creates a user; usernames are unique.
    fn insert_user(
        &self,
        username: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<User, RepositoryError>;
    fn user(&self, id: u64) -> Result<Option<User>, RepositoryError>;
    fn user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
}

pub trait ApiKeyRepository: Send + Sync {
    fn insert_key(&self, key: ApiKey) -> Result<ApiKey, RepositoryError>;
    fn update_key(&self, key: ApiKey) -> Result<(), RepositoryError>;
    fn key(&self, id: Uuid) -> Result<Option<ApiKey>, RepositoryError>;
    fn key_by_secret(&self, secret: &str) -> Result<Option<ApiKey>, RepositoryError>;
    fn keys_for_user(&self, user_id: u64) -> Result<Vec<ApiKey>, RepositoryError>;
    fn delete_key(&self, id: Uuid) -> Result<bool, RepositoryError>;
}

pub trait DataSourceRepository: Send + Sync {
    fn insert_source(&self, source: DataSource) -> Result<DataSource, RepositoryError>;
    fn update_source(&self, source: DataSource) -> Result<(), RepositoryError>;
    fn source(&self, id: Uuid) -> Result<Option<DataSource>, RepositoryError>;
    fn sources(&self) -> Result<Vec<DataSource>, RepositoryError>;
    /// Removes the source and every job that references it.
    fn delete_source(&self, id: Uuid) -> Result<bool, RepositoryError>;
}

pub trait JobRepository: Send + Sync {
    fn insert_job(&self, job: EtlJob) -> Result<EtlJob, RepositoryError>;
    fn update_job(&self, job: EtlJob) -> Result<(), RepositoryError>;
    /// Writes `job` only while the stored copy still matches `expected`.
    /// Returns `false`, leaving the record untouched, when it has moved on.
    fn update_job_if(&self, job: EtlJob, expected: JobVersion) -> Result<bool, RepositoryError>;
    fn job(&self, id: Uuid) -> Result<Option<EtlJob>, RepositoryError>;
    fn jobs(&self) -> Result<Vec<EtlJob>, RepositoryError>;
    fn job_count_for_source(&self, source_id: Uuid) -> Result<usize, RepositoryError>;
}

pub trait MetricRepository: Send + Sync {
    fn insert_metric(&self, metric: MetricRecord) -> Result<(), RepositoryError>;
    fn metrics(&self) -> Result<Vec<MetricRecord>, RepositoryError>;
    /// Deletes samples strictly older than `cutoff`, returning how many were removed.
    fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError>;
}

pub trait SubstationRepository: Send + Sync {
    /// Inserts or replaces by `sitefunctionallocation`, returning the stored id.
    fn upsert_substation(&self, record: SubstationRecord) -> Result<u64, RepositoryError>;
    fn substation(&self, id: u64) -> Result<Option<Substation>, RepositoryError>;
    fn substations(&self) -> Result<Vec<Substation>, RepositoryError>;
}

pub trait RunRepository: Send + Sync {
    /// Records a run; an existing run key is a conflict.
    fn insert_run(&self, run: PipelineRun) -> Result<(), RepositoryError>;
    fn update_run(&self, run: PipelineRun) -> Result<(), RepositoryError>;
    fn run(&self, run_key: &str) -> Result<Option<PipelineRun>, RepositoryError>;
    fn runs(&self) -> Result<Vec<PipelineRun>, RepositoryError>;
}

/// Every repository plus a liveness probe.
pub trait Store:
    UserRepository
    + ApiKeyRepository
    + DataSourceRepository
    + JobRepository
    + MetricRepository
    + SubstationRepository
    + RunRepository
{
    fn ping(&self) -> Result<(), RepositoryError>;
}
