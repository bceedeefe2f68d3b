use serde::{Deserialize, Deserializer};
use std::io::Read;
use std::path::Path;

use crate::domain::{Coordinates, SubstationRecord};
use crate::store::{RepositoryError, SubstationRepository};

#[derive(Debug, thiserror::Error)]
pub enum SubstationImportError {
    #[error("failed to read substation export: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid substation CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("line {line}: {field} value '{value}' is not a number")]
    InvalidNumber {
        line: u64,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: sitefunctionallocation is required")]
    MissingLocation { line: u64 },
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

/// Counts reported after an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub rows: usize,
    pub inserted: usize,
    pub updated: usize,
}

pub fn import_path<S, P>(store: &S, path: P) -> Result<ImportSummary, SubstationImportError>
where
    S: SubstationRepository + ?Sized,
    P: AsRef<Path>,
{
    let file = std::fs::File::open(path)?;
    import_reader(store, file)
}

pub fn import_reader<S, R>(store: &S, reader: R) -> Result<ImportSummary, SubstationImportError>
where
    S: SubstationRepository + ?Sized,
    R: Read,
{
    let records = parse_records(reader)?;
    let mut summary = ImportSummary::default();
    let mut known: std::collections::HashSet<String> = store
        .substations()?
        .into_iter()
        .map(|site| site.record.sitefunctionallocation)
        .collect();

    for record in records {
        summary.rows += 1;
        if known.insert(record.sitefunctionallocation.clone()) {
            summary.inserted += 1;
        } else {
            summary.updated += 1;
        }
        store.upsert_substation(record)?;
    }

    Ok(summary)
}

/// Parses every row up front so a bad line aborts the import before anything is stored.
pub fn parse_records<R: Read>(reader: R) -> Result<Vec<SubstationRecord>, SubstationImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let mut records = Vec::new();

    for row in csv_reader.records() {
        let row = row?;
        let line = row.position().map_or(0, |position| position.line());
        let parsed: SubstationRow = row.deserialize(Some(&headers))?;
        records.push(parsed.into_record(line)?);
    }

    Ok(records)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SubstationRow {
    #[serde(deserialize_with = "empty_string_as_none")]
    sitefunctionallocation: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    licencearea: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    sitename: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    sitetype: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    sitevoltage: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    esqcroverallrisk: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    gridref: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    siteassetcount: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    powertransformercount: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    electricalassetcount: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    civilassetcount: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    street: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    suburb: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    towncity: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    county: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    postcode: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    yearcommissioned: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    datecommissioned: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    siteclassification: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    assessmentdate: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    last_report: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    calculatedresistance: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    measuredresistance_ohm: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    next_assessmentdate: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    easting: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    northing: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    transratingwinter: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    transratingsummer: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    reversepower: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    maxdemandsummer: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    maxdemandwinter: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    spatial_coordinates: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    lat: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    lon: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    local_authority: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    local_authority_code: Option<String>,
    #[serde(deserialize_with = "empty_string_as_none")]
    what3words: Option<String>,
}

impl SubstationRow {
    fn into_record(self, line: u64) -> Result<SubstationRecord, SubstationImportError> {
        let sitefunctionallocation = self
            .sitefunctionallocation
            .ok_or(SubstationImportError::MissingLocation { line })?;

        let raw_point = match (self.spatial_coordinates, &self.lat, &self.lon) {
            (Some(pair), _, _) => Some(pair),
            (None, Some(lat), Some(lon)) => Some(format!("{lat},{lon}")),
            _ => None,
        };
        let spatial_coordinates = raw_point.as_deref().and_then(|raw| {
            let parsed = Coordinates::parse(raw);
            if parsed.is_none() && !is_missing(raw) {
                tracing::warn!(
                    line,
                    site = %sitefunctionallocation,
                    value = raw,
                    "ignoring malformed spatial_coordinates"
                );
            }
            parsed
        });

        Ok(SubstationRecord {
            sitefunctionallocation,
            licencearea: self.licencearea,
            sitename: self.sitename,
            sitetype: self.sitetype,
            sitevoltage: integer(line, "sitevoltage", self.sitevoltage)?,
            esqcroverallrisk: self.esqcroverallrisk,
            gridref: self.gridref,
            siteassetcount: integer(line, "siteassetcount", self.siteassetcount)?,
            powertransformercount: integer(
                line,
                "powertransformercount",
                self.powertransformercount,
            )?,
            electricalassetcount: integer(line, "electricalassetcount", self.electricalassetcount)?,
            civilassetcount: integer(line, "civilassetcount", self.civilassetcount)?,
            street: self.street,
            suburb: self.suburb,
            towncity: self.towncity,
            county: self.county,
            postcode: self.postcode,
            yearcommissioned: self.yearcommissioned,
            datecommissioned: self.datecommissioned,
            siteclassification: self.siteclassification,
            assessmentdate: self.assessmentdate,
            last_report: self.last_report,
            calculatedresistance: self.calculatedresistance,
            measuredresistance_ohm: decimal(
                line,
                "measuredresistance_ohm",
                self.measuredresistance_ohm,
            )?,
            next_assessmentdate: self.next_assessmentdate,
            easting: self.easting,
            northing: self.northing,
            transratingwinter: self.transratingwinter,
            transratingsummer: self.transratingsummer,
            reversepower: self.reversepower,
            maxdemandsummer: self.maxdemandsummer,
            maxdemandwinter: self.maxdemandwinter,
            spatial_coordinates,
            local_authority: self.local_authority,
            local_authority_code: self.local_authority_code,
            what3words: self.what3words,
        })
    }
}

fn is_missing(value: &str) -> bool {
    matches!(value.to_ascii_uppercase().as_str(), "NA" | "N/A" | "NULL")
}

fn integer(
    line: u64,
    field: &'static str,
    value: Option<String>,
) -> Result<Option<i64>, SubstationImportError> {
    match value {
        None => Ok(None),
        Some(raw) if is_missing(&raw) => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| SubstationImportError::InvalidNumber {
                line,
                field,
                value: raw,
            }),
    }
}

fn decimal(
    line: u64,
    field: &'static str,
    value: Option<String>,
) -> Result<Option<f64>, SubstationImportError> {
    match value {
        None => Ok(None),
        Some(raw) if is_missing(&raw) => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| SubstationImportError::InvalidNumber {
                line,
                field,
                value: raw,
            }),
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
