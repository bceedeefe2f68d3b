//! Records persisted by the platform and the rules that keep them valid.

pub mod jobs;
pub mod keys;
pub mod metrics;
pub mod runs;
pub mod sources;
pub mod substations;
pub mod validation;

pub use jobs::{EtlJob, EtlJobView, JobStatus, JobVersion, NewEtlJob};
pub use keys::{ApiKey, ApiKeyUpdate, ApiKeyView, NewApiKey, User};
pub use metrics::{MetricRecord, MetricType, NewMetric};
pub use runs::{PipelineRun, RunStatus};
pub use sources::{DataSource, DataSourceInput, DataSourcePatch, DataSourceView, SourceType};
pub use substations::{Coordinates, Substation, SubstationRecord};
pub use validation::ValidationErrors;

use serde_json::{Map, Value};

/// JSON object payloads (`metadata`, `configuration`).
pub type JsonObject = Map<String, Value>;

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    <Option<T> as serde::Deserialize>::deserialize(deserializer).map(Some)
}
