//! List filtering, search and ordering driven by raw query strings.

mod jobs;
mod keys;
mod metrics;
mod sources;
mod substations;

pub use jobs::{JobOrder, JobQuery};
pub use keys::{KeyOrder, KeyQuery};
pub use metrics::{MetricOrder, MetricQuery};
pub use sources::{SourceOrder, SourceQuery};
pub use substations::SubstationQuery;

use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::domain::ValidationErrors;

/// Repeated-key aware view over `a=1&a=2&b=3`.
#[derive(Debug, Clone, Default)]
pub struct QueryPairs(Vec<(String, String)>);

impl QueryPairs {
    pub fn parse(raw: Option<&str>) -> Result<Self, ValidationErrors> {
        match raw {
            None | Some("") => Ok(Self::default()),
            Some(raw) => serde_urlencoded::from_str::<Vec<(String, String)>>(raw)
                .map(Self)
                .map_err(|err| ValidationErrors::single("query", err.to_string())),
        }
    }

    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Last non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(name, value)| name == key && !value.is_empty())
            .map(|(_, value)| value.as_str())
    }

    pub fn all(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(name, value)| name == key && !value.is_empty())
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub(crate) fn bool(&self, key: &str, errors: &mut ValidationErrors) -> Option<bool> {
        let raw = self.get(key)?;
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => {
                errors.add(key, "Select a valid choice.");
                None
            }
        }
    }

    pub(crate) fn datetime(&self, key: &str, errors: &mut ValidationErrors) -> Option<DateTime<Utc>> {
        let raw = self.get(key)?;
        let parsed = parse_datetime(raw);
        if parsed.is_none() {
            errors.add(key, "Enter a valid date/time.");
        }
        parsed
    }

    pub(crate) fn number(&self, key: &str, errors: &mut ValidationErrors) -> Option<f64> {
        let raw = self.get(key)?;
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Some(value),
            _ => {
                errors.add(key, "Enter a number.");
                None
            }
        }
    }

    pub(crate) fn uuid(&self, key: &str, errors: &mut ValidationErrors) -> Option<Uuid> {
        let raw = self.get(key)?;
        match Uuid::parse_str(raw.trim()) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.add(key, "Enter a valid UUID.");
                None
            }
        }
    }

    pub(crate) fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(|value| value.trim().to_lowercase())
    }

    /// Parses `ordering=-a,b` against the allowed field names, falling back to `default`.
    ///
    /// Unknown names are ignored.
    pub(crate) fn ordering<F: Copy>(
        &self,
        allowed: &[(&str, F)],
        default: &[(F, bool)],
    ) -> Vec<(F, bool)> {
        let requested: Vec<(F, bool)> = self
            .get("ordering")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|term| {
                        let term = term.trim();
                        let (descending, name) = match term.strip_prefix('-') {
                            Some(name) => (true, name),
                            None => (false, term),
                        };
                        allowed
                            .iter()
                            .find(|(candidate, _)| *candidate == name)
                            .map(|(_, field)| (*field, descending))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if requested.is_empty() {
            default.to_vec()
        } else {
            requested
        }
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Sorts by each `(field, descending)` in turn.
pub(crate) fn sort_by_fields<T, F: Copy>(
    items: &mut [T],
    fields: &[(F, bool)],
    compare: impl Fn(&T, &T, F) -> Ordering,
) {
    items.sort_by(|left, right| {
        fields
            .iter()
            .map(|(field, descending)| {
                let ordering = compare(left, right, *field);
                if *descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

/// Ascending order with nulls last, so descending puts them first.
pub(crate) fn nulls_last<T: Ord>(left: &Option<T>, right: &Option<T>) -> Ordering {
    match (left, right) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub(crate) fn within<T: PartialOrd>(value: Option<T>, after: Option<T>, before: Option<T>) -> bool {
    if after.is_none() && before.is_none() {
        return true;
    }
    match value {
        None => false,
        Some(value) => {
            after.map_or(true, |bound| value >= bound) && before.map_or(true, |bound| value <= bound)
        }
    }
}
