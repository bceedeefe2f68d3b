use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::domain::metrics::labels;
use crate::domain::MetricRecord;
use crate::store::MetricRepository;

/// Tunables shared by every asset in a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub source_table: String,
    pub target_table: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            source_table: "raw_data".to_string(),
            target_table: "processed_data".to_string(),
        }
    }
}

/// Row as pulled from the source table; any column may be missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecord {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub value: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueCategory {
    Low,
    Medium,
    High,
}

impl ValueCategory {
    pub const fn all() -> [Self; 3] {
        [Self::Low, Self::Medium, Self::High]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Buckets are (0,100], (100,500] and above 500.
    pub fn of(value: i64) -> Option<Self> {
        match value {
            v if v <= 0 => None,
            v if v <= 100 => Some(Self::Low),
            v if v <= 500 => Some(Self::Medium),
            _ => Some(Self::High),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanRecord {
    pub id: u64,
    pub name: String,
    pub value: i64,
    pub status: String,
    pub processed_at: DateTime<Utc>,
    pub value_category: Option<ValueCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedMetrics {
    pub total_records: usize,
    pub avg_value: f64,
    pub max_value: i64,
    pub min_value: i64,
    pub value_distribution: BTreeMap<String, usize>,
    pub status_distribution: BTreeMap<String, usize>,
    pub processed_at: DateTime<Utc>,
}

impl AggregatedMetrics {
    /// Scalar aggregates in the order they are loaded.
    pub fn numeric(&self) -> [(&'static str, f64); 4] {
        [
            ("total_records", self.total_records as f64),
            ("avg_value", self.avg_value),
            ("max_value", self.max_value as f64),
            ("min_value", self.min_value as f64),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    #[error("No records after cleaning")]
    Empty,
    #[error("Duplicate IDs found")]
    DuplicateIds,
}

pub fn extract(config: &PipelineConfig) -> Vec<RawRecord> {
    tracing::info!(
        table = %config.source_table,
        batch_size = config.batch_size,
        "extracting raw data"
    );
    (1..=config.batch_size as u64)
        .map(|i| RawRecord {
            id: Some(i),
            name: Some(format!("Record_{i}")),
            value: Some(i as i64 * 10),
            status: Some("active".to_string()),
        })
        .collect()
}

pub fn clean(raw: Vec<RawRecord>, now: DateTime<Utc>) -> Result<Vec<CleanRecord>, AssetError> {
    let received = raw.len();
    let cleaned: Vec<CleanRecord> = raw
        .into_iter()
        .filter_map(|row| match (row.id, row.name, row.value, row.status) {
            (Some(id), Some(name), Some(value), Some(status)) => Some(CleanRecord {
                id,
                name,
                value,
                status,
                processed_at: now,
                value_category: ValueCategory::of(value),
            }),
            _ => None,
        })
        .collect();

    if cleaned.is_empty() {
        return Err(AssetError::Empty);
    }
    let mut seen = HashSet::with_capacity(cleaned.len());
    if !cleaned.iter().all(|record| seen.insert(record.id)) {
        return Err(AssetError::DuplicateIds);
    }

    tracing::info!(received, kept = cleaned.len(), "cleaned raw data");
    Ok(cleaned)
}

/// Summarises cleaned rows. Callers guarantee `records` is non-empty.
pub fn aggregate(records: &[CleanRecord], now: DateTime<Utc>) -> AggregatedMetrics {
    let total_records = records.len();
    let sum: i64 = records.iter().map(|record| record.value).sum();
    let avg_value = if total_records == 0 {
        0.0
    } else {
        sum as f64 / total_records as f64
    };

    let mut value_distribution: BTreeMap<String, usize> = ValueCategory::all()
        .into_iter()
        .map(|category| (category.as_str().to_string(), 0))
        .collect();
    let mut status_distribution = BTreeMap::new();
    for record in records {
        if let Some(category) = record.value_category {
            *value_distribution
                .entry(category.as_str().to_string())
                .or_default() += 1;
        }
        *status_distribution.entry(record.status.clone()).or_default() += 1;
    }

    AggregatedMetrics {
        total_records,
        avg_value,
        max_value: records.iter().map(|r| r.value).max().unwrap_or_default(),
        min_value: records.iter().map(|r| r.value).min().unwrap_or_default(),
        value_distribution,
        status_distribution,
        processed_at: now,
    }
}

/// Writes each numeric aggregate as an `etl_<name>` gauge. Store failures are
/// logged and reported as `false`.
pub fn load<S>(
    store: &S,
    config: &PipelineConfig,
    metrics: &AggregatedMetrics,
    now: DateTime<Utc>,
) -> bool
where
    S: MetricRepository + ?Sized,
{
    for (name, value) in metrics.numeric() {
        let record = MetricRecord::gauge(
            format!("etl_{name}"),
            value,
            labels([
                ("pipeline", "etl_pipeline"),
                ("table", config.target_table.as_str()),
            ]),
            now,
        );
        if let Err(err) = store.insert_metric(record) {
            tracing::error!(error = %err, metric = name, "failed to load aggregated metrics");
            return false;
        }
    }
    tracing::info!(table = %config.target_table, "loaded aggregated metrics");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 2, 0, 0).single().expect("valid time")
    }

    fn row(id: u64, value: i64) -> RawRecord {
        RawRecord {
            id: Some(id),
            name: Some(format!("Record_{id}")),
            value: Some(value),
            status: Some("active".to_string()),
        }
    }

    #[test]
    fn extract_generates_batch() {
        let config = PipelineConfig {
            batch_size: 3,
            ..PipelineConfig::default()
        };
        let rows = extract(&config);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].name.as_deref(), Some("Record_3"));
        assert_eq!(rows[2].value, Some(30));
    }

    #[test]
    fn categories_follow_bucket_edges() {
        assert_eq!(ValueCategory::of(0), None);
        assert_eq!(ValueCategory::of(100), Some(ValueCategory::Low));
        assert_eq!(ValueCategory::of(101), Some(ValueCategory::Medium));
        assert_eq!(ValueCategory::of(500), Some(ValueCategory::Medium));
        assert_eq!(ValueCategory::of(501), Some(ValueCategory::High));
    }

    #[test]
    fn clean_drops_incomplete_rows_and_rejects_duplicates() {
        let mut partial = row(2, 20);
        partial.status = None;
        let cleaned = clean(vec![row(1, 10), partial], now()).expect("cleans");
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].processed_at, now());

        assert_eq!(clean(vec![row(1, 10), row(1, 20)], now()), Err(AssetError::DuplicateIds));
        let mut empty = row(3, 30);
        empty.id = None;
        assert_eq!(clean(vec![empty], now()), Err(AssetError::Empty));
    }

    #[test]
    fn aggregate_and_load_write_gauges() {
        let config = PipelineConfig {
            batch_size: 60,
            ..PipelineConfig::default()
        };
        let cleaned = clean(extract(&config), now()).expect("cleans");
        let metrics = aggregate(&cleaned, now());

        assert_eq!(metrics.total_records, 60);
        assert_eq!(metrics.avg_value, 305.0);
        assert_eq!(metrics.max_value, 600);
        assert_eq!(metrics.value_distribution["low"], 10);
        assert_eq!(metrics.value_distribution["medium"], 40);
        assert_eq!(metrics.value_distribution["high"], 10);
        assert_eq!(metrics.status_distribution["active"], 60);

        let store = InMemoryStore::new();
        assert!(load(&store, &config, &metrics, now()));
        let stored = store.metrics().expect("metrics");
        assert_eq!(stored.len(), 4);
        assert!(stored
            .iter()
            .all(|m| m.labels["pipeline"] == "etl_pipeline" && m.labels["table"] == "processed_data"));

        store.set_offline(true);
        assert!(!load(&store, &config, &metrics, now()));
    }
}
