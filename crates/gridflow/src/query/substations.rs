use super::QueryPairs;
use crate::domain::Substation;

/// Case-insensitive exact filters plus a site name search; results stay in id order.
#[derive(Debug, Clone, Default)]
pub struct SubstationQuery {
    pub licencearea: Option<String>,
    pub sitetype: Option<String>,
    pub county: Option<String>,
    pub search: Option<String>,
}

fn equals_ignoring_case(field: &Option<String>, wanted: &Option<String>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => field
            .as_deref()
            .is_some_and(|value| value.trim().to_lowercase() == *wanted),
    }
}

impl SubstationQuery {
    pub fn from_pairs(pairs: &QueryPairs) -> Self {
        Self {
            licencearea: pairs.text("licencearea"),
            sitetype: pairs.text("sitetype"),
            county: pairs.text("county"),
            search: pairs.text("search"),
        }
    }

    pub fn apply(&self, mut sites: Vec<Substation>) -> Vec<Substation> {
        sites.retain(|site| {
            let record = &site.record;
            equals_ignoring_case(&record.licencearea, &self.licencearea)
                && equals_ignoring_case(&record.sitetype, &self.sitetype)
                && equals_ignoring_case(&record.county, &self.county)
                && self.search.as_ref().map_or(true, |needle| {
                    record
                        .sitename
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(needle.as_str()))
                })
        });
        sites.sort_by_key(|site| site.id);
        sites
    }
}
