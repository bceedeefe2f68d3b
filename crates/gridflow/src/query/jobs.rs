use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::{nulls_last, sort_by_fields, within, QueryPairs};
use crate::domain::{DataSource, EtlJob, JobStatus, ValidationErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrder {
    Name,
    CreatedAt,
    StartedAt,
    CompletedAt,
    Status,
}

const ORDER_FIELDS: [(&str, JobOrder); 5] = [
    ("name", JobOrder::Name),
    ("created_at", JobOrder::CreatedAt),
    ("started_at", JobOrder::StartedAt),
    ("completed_at", JobOrder::CompletedAt),
    ("status", JobOrder::Status),
];

/// Filters accepted by the job listing.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub statuses: Vec<JobStatus>,
    pub data_source: Option<Uuid>,
    pub data_source_name: Option<String>,
    pub name: Option<String>,
    pub name_contains: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub completed_after: Option<DateTime<Utc>>,
    pub completed_before: Option<DateTime<Utc>>,
    pub min_records: Option<f64>,
    pub max_records: Option<f64>,
    pub has_errors: Option<bool>,
    pub search: Option<String>,
    pub ordering: Vec<(JobOrder, bool)>,
}

impl JobQuery {
    pub fn from_pairs(pairs: &QueryPairs) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let mut statuses = Vec::new();
        for raw in pairs.all("status") {
            match JobStatus::parse(raw) {
                Some(status) => statuses.push(status),
                None => errors.add(
                    "status",
                    format!("Select a valid choice. {raw} is not one of the available choices."),
                ),
            }
        }

        let query = Self {
            statuses,
            data_source: pairs.uuid("data_source", &mut errors),
            data_source_name: pairs.text("data_source_name"),
            name: pairs.get("name").map(str::to_string),
            name_contains: pairs.text("name__icontains"),
            created_after: pairs.datetime("created_after", &mut errors),
            created_before: pairs.datetime("created_before", &mut errors),
            started_after: pairs.datetime("started_after", &mut errors),
            started_before: pairs.datetime("started_before", &mut errors),
            completed_after: pairs.datetime("completed_after", &mut errors),
            completed_before: pairs.datetime("completed_before", &mut errors),
            min_records: pairs.number("min_records", &mut errors),
            max_records: pairs.number("max_records", &mut errors),
            has_errors: pairs.bool("has_errors", &mut errors),
            search: pairs.text("search"),
            ordering: pairs.ordering(&ORDER_FIELDS, &[(JobOrder::CreatedAt, true)]),
        };

        errors.into_result().map(|_| query)
    }

    pub fn matches(&self, job: &EtlJob, sources: &HashMap<Uuid, DataSource>) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&job.status) {
            return false;
        }
        if self.data_source.is_some_and(|id| id != job.data_source_id) {
            return false;
        }
        if let Some(needle) = &self.data_source_name {
            let hit = sources
                .get(&job.data_source_id)
                .is_some_and(|source| source.name.to_lowercase().contains(needle));
            if !hit {
                return false;
            }
        }
        if self.name.as_deref().is_some_and(|name| name != job.name) {
            return false;
        }
        let lowered = job.name.to_lowercase();
        for needle in [&self.name_contains, &self.search].into_iter().flatten() {
            if !lowered.contains(needle.as_str()) {
                return false;
            }
        }
        if !within(Some(job.created_at), self.created_after, self.created_before)
            || !within(job.started_at, self.started_after, self.started_before)
            || !within(job.completed_at, self.completed_after, self.completed_before)
        {
            return false;
        }
        let records = job.records_processed as f64;
        if !within(Some(records), self.min_records, self.max_records) {
            return false;
        }
        if self.has_errors.is_some_and(|wanted| wanted != job.has_errors()) {
            return false;
        }
        true
    }

    pub fn apply(&self, jobs: Vec<EtlJob>, sources: &HashMap<Uuid, DataSource>) -> Vec<EtlJob> {
        let mut selected: Vec<EtlJob> = jobs
            .into_iter()
            .filter(|job| self.matches(job, sources))
            .collect();
        sort_by_fields(&mut selected, &self.ordering, |a, b, field| match field {
            JobOrder::Name => a.name.cmp(&b.name),
            JobOrder::CreatedAt => a.created_at.cmp(&b.created_at),
            JobOrder::StartedAt => nulls_last(&a.started_at, &b.started_at),
            JobOrder::CompletedAt => nulls_last(&a.completed_at, &b.completed_at),
            JobOrder::Status => a.status.as_str().cmp(b.status.as_str()),
        });
        selected
    }
}
