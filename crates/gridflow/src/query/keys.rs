use super::{nulls_last, sort_by_fields, QueryPairs};
use crate::domain::ApiKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrder {
    Name,
    CreatedAt,
    LastUsedAt,
}

const ORDER_FIELDS: [(&str, KeyOrder); 3] = [
    ("name", KeyOrder::Name),
    ("created_at", KeyOrder::CreatedAt),
    ("last_used_at", KeyOrder::LastUsedAt),
];

#[derive(Debug, Clone, Default)]
pub struct KeyQuery {
    pub search: Option<String>,
    pub ordering: Vec<(KeyOrder, bool)>,
}

impl KeyQuery {
    pub fn from_pairs(pairs: &QueryPairs) -> Self {
        Self {
            search: pairs.text("search"),
            ordering: pairs.ordering(&ORDER_FIELDS, &[(KeyOrder::CreatedAt, true)]),
        }
    }

    pub fn apply(&self, keys: Vec<ApiKey>) -> Vec<ApiKey> {
        let mut selected: Vec<ApiKey> = keys
            .into_iter()
            .filter(|key| {
                self.search
                    .as_ref()
                    .map_or(true, |needle| key.name.to_lowercase().contains(needle.as_str()))
            })
            .collect();

        sort_by_fields(&mut selected, &self.ordering, |a, b, field| match field {
            KeyOrder::Name => a.name.cmp(&b.name),
            KeyOrder::CreatedAt => a.created_at.cmp(&b.created_at),
            KeyOrder::LastUsedAt => nulls_last(&a.last_used_at, &b.last_used_at),
        });
        selected
    }
}
