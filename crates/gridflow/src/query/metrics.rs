use chrono::{DateTime, Utc};

use super::{sort_by_fields, within, QueryPairs};
use crate::domain::{MetricRecord, MetricType, ValidationErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricOrder {
    Timestamp,
    MetricName,
    MetricValue,
}

const ORDER_FIELDS: [(&str, MetricOrder); 3] = [
    ("timestamp", MetricOrder::Timestamp),
    ("metric_name", MetricOrder::MetricName),
    ("metric_value", MetricOrder::MetricValue),
];

#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub metric_name: Option<String>,
    pub metric_type: Option<MetricType>,
    pub timestamp_after: Option<DateTime<Utc>>,
    pub timestamp_before: Option<DateTime<Utc>>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub has_labels: Option<bool>,
    pub label_key: Option<String>,
    pub label_value: Option<String>,
    pub ordering: Vec<(MetricOrder, bool)>,
}

impl MetricQuery {
    pub fn from_pairs(pairs: &QueryPairs) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let metric_type = pairs.get("metric_type").and_then(|raw| {
            let parsed = MetricType::parse(raw);
            if parsed.is_none() {
                errors.add(
                    "metric_type",
                    format!("Select a valid choice. {raw} is not one of the available choices."),
                );
            }
            parsed
        });

        let query = Self {
            metric_name: pairs.text("metric_name"),
            metric_type,
            timestamp_after: pairs.datetime("timestamp_after", &mut errors),
            timestamp_before: pairs.datetime("timestamp_before", &mut errors),
            min_value: pairs.number("min_value", &mut errors),
            max_value: pairs.number("max_value", &mut errors),
            has_labels: pairs.bool("has_labels", &mut errors),
            label_key: pairs.get("label_key").map(str::to_string),
            label_value: pairs.get("label_value").map(str::to_string),
            ordering: pairs.ordering(&ORDER_FIELDS, &[(MetricOrder::Timestamp, true)]),
        };
        errors.into_result().map(|_| query)
    }

    pub fn matches(&self, metric: &MetricRecord) -> bool {
        if let Some(needle) = &self.metric_name {
            if !metric.metric_name.to_lowercase().contains(needle.as_str()) {
                return false;
            }
        }
        if self.metric_type.is_some_and(|kind| kind != metric.metric_type) {
            return false;
        }
        if !within(Some(metric.timestamp), self.timestamp_after, self.timestamp_before)
            || !within(Some(metric.metric_value), self.min_value, self.max_value)
        {
            return false;
        }
        if self
            .has_labels
            .is_some_and(|wanted| wanted == metric.labels.is_empty())
        {
            return false;
        }
        if let Some(key) = &self.label_key {
            if !metric.labels.contains_key(key) {
                return false;
            }
        }
        if let Some(value) = &self.label_value {
            if !metric.labels.values().any(|candidate| candidate == value) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, metrics: Vec<MetricRecord>) -> Vec<MetricRecord> {
        let mut selected: Vec<MetricRecord> =
            metrics.into_iter().filter(|m| self.matches(m)).collect();
        sort_by_fields(&mut selected, &self.ordering, |a, b, field| match field {
            MetricOrder::Timestamp => a.timestamp.cmp(&b.timestamp),
            MetricOrder::MetricName => a.metric_name.cmp(&b.metric_name),
            MetricOrder::MetricValue => a.metric_value.total_cmp(&b.metric_value),
        });
        selected
    }
}
