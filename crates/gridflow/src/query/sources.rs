use super::{sort_by_fields, QueryPairs};
use crate::domain::{DataSource, SourceType, ValidationErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrder {
    Name,
    CreatedAt,
    SourceType,
}

const ORDER_FIELDS: [(&str, SourceOrder); 3] = [
    ("name", SourceOrder::Name),
    ("created_at", SourceOrder::CreatedAt),
    ("source_type", SourceOrder::SourceType),
];

#[derive(Debug, Clone, Default)]
pub struct SourceQuery {
    pub source_type: Option<SourceType>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
    pub ordering: Vec<(SourceOrder, bool)>,
}

impl SourceQuery {
    pub fn from_pairs(pairs: &QueryPairs) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let source_type = pairs.get("source_type").and_then(|raw| {
            let parsed = SourceType::parse(raw);
            if parsed.is_none() {
                errors.add(
                    "source_type",
                    format!("Select a valid choice. {raw} is not one of the available choices."),
                );
            }
            parsed
        });

        let query = Self {
            source_type,
            is_active: pairs.bool("is_active", &mut errors),
            search: pairs.text("search"),
            ordering: pairs.ordering(&ORDER_FIELDS, &[(SourceOrder::Name, false)]),
        };
        errors.into_result().map(|_| query)
    }

    pub fn apply(&self, sources: Vec<DataSource>) -> Vec<DataSource> {
        let mut selected: Vec<DataSource> = sources
            .into_iter()
            .filter(|source| self.source_type.map_or(true, |kind| kind == source.source_type))
            .filter(|source| self.is_active.map_or(true, |active| active == source.is_active))
            .filter(|source| {
                self.search
                    .as_ref()
                    .map_or(true, |needle| source.name.to_lowercase().contains(needle.as_str()))
            })
            .collect();

        sort_by_fields(&mut selected, &self.ordering, |a, b, field| match field {
            SourceOrder::Name => a.name.cmp(&b.name),
            SourceOrder::CreatedAt => a.created_at.cmp(&b.created_at),
            SourceOrder::SourceType => a.source_type.as_str().cmp(b.source_type.as_str()),
        });
        selected
    }
}
