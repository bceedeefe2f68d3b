use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::validation::{check_length, ValidationErrors};

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricType {
    pub const fn all() -> [Self; 4] {
        [Self::Counter, Self::Gauge, Self::Histogram, Self::Summary]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
    }
}

/// A single application metric sample kept alongside the job history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: Uuid,
    pub metric_name: String,
    pub metric_value: f64,
    pub metric_type: MetricType,
    pub labels: Labels,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl MetricRecord {
    pub fn new(
        metric_name: impl Into<String>,
        metric_value: f64,
        metric_type: MetricType,
        labels: Labels,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            metric_name: metric_name.into(),
            metric_value,
            metric_type,
            labels,
            timestamp: now,
            created_at: now,
        }
    }

    pub fn counter(name: impl Into<String>, labels: Labels, now: DateTime<Utc>) -> Self {
        Self::new(name, 1.0, MetricType::Counter, labels, now)
    }

    pub fn gauge(name: impl Into<String>, value: f64, labels: Labels, now: DateTime<Utc>) -> Self {
        Self::new(name, value, MetricType::Gauge, labels, now)
    }
}

/// Builds a label map from borrowed pairs.
pub fn labels<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Labels
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMetric {
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub metric_value: Option<f64>,
    #[serde(default)]
    pub metric_type: Option<String>,
    #[serde(default)]
    pub labels: Option<Labels>,
}

impl NewMetric {
    pub fn into_record(self, now: DateTime<Utc>) -> Result<MetricRecord, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match &self.metric_name {
            Some(name) => check_length(&mut errors, "metric_name", name, 1, 100),
            None => errors.add("metric_name", "This field is required."),
        }

        match self.metric_value {
            Some(value) if !value.is_finite() => {
                errors.add("metric_value", "A valid number is required.")
            }
            Some(_) => {}
            None => errors.add("metric_value", "This field is required."),
        }

        let metric_type = match self.metric_type.as_deref() {
            None => MetricType::Gauge,
            Some(raw) => MetricType::parse(raw).unwrap_or_else(|| {
                errors.add(
                    "metric_type",
                    "Metric type must be one of: counter, gauge, histogram, summary",
                );
                MetricType::Gauge
            }),
        };

        errors.into_result()?;
        match (self.metric_name, self.metric_value) {
            (Some(name), Some(value)) => Ok(MetricRecord::new(
                name.trim(),
                value,
                metric_type,
                self.labels.unwrap_or_default(),
                now,
            )),
            _ => Err(ValidationErrors::single("non_field_errors", "Invalid data.")),
        }
    }
}
