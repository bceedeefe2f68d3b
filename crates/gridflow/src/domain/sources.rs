use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::validation::{check_length, ValidationErrors};
use super::JsonObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Database,
    Api,
    File,
    Stream,
}

impl SourceType {
    pub const fn all() -> [Self; 4] {
        [Self::Database, Self::Api, Self::File, Self::Stream]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Api => "api",
            Self::File => "file",
            Self::Stream => "stream",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Database => "Database",
            Self::Api => "API",
            Self::File => "File",
            Self::Stream => "Stream",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
    }
}

/// An upstream system the ETL jobs read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    pub connection_string: String,
    pub is_active: bool,
    pub metadata: JsonObject,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of create (full) and update (full or partial) requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataSourceInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub metadata: Option<JsonObject>,
}

/// Partial updates reuse the input shape with every field optional.
pub type DataSourcePatch = DataSourceInput;

impl DataSourceInput {
    fn validate(&self, partial: bool) -> Result<Option<SourceType>, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match &self.name {
            Some(name) => check_length(&mut errors, "name", name, 1, 100),
            None if !partial => errors.add("name", "This field is required."),
            None => {}
        }

        let source_type = match self.source_type.as_deref() {
            Some(raw) => match SourceType::parse(raw) {
                Some(kind) => Some(kind),
                None => {
                    errors.add("source_type", format!("\"{raw}\" is not a valid choice."));
                    None
                }
            },
            None => {
                if !partial {
                    errors.add("source_type", "This field is required.");
                }
                None
            }
        };

        match &self.connection_string {
            Some(value) if value.trim().is_empty() => {
                errors.add("connection_string", "This field may not be blank.")
            }
            Some(_) => {}
            None if !partial => errors.add("connection_string", "This field is required."),
            None => {}
        }

        errors.into_result().map(|_| source_type)
    }
}

impl DataSource {
    pub fn create(input: DataSourceInput, now: DateTime<Utc>) -> Result<Self, ValidationErrors> {
        let source_type = input.validate(false)?;
        let (Some(name), Some(source_type), Some(connection_string)) =
            (input.name, source_type, input.connection_string)
        else {
            return Err(ValidationErrors::single("non_field_errors", "Invalid data."));
        };

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            source_type,
            connection_string,
            is_active: input.is_active.unwrap_or(true),
            metadata: input.metadata.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply(
        &mut self,
        input: DataSourceInput,
        partial: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationErrors> {
        let source_type = input.validate(partial)?;

        if let Some(name) = input.name {
            self.name = name.trim().to_string();
        }
        if let Some(source_type) = source_type {
            self.source_type = source_type;
        }
        if let Some(connection_string) = input.connection_string {
            self.connection_string = connection_string;
        }
        if let Some(active) = input.is_active {
            self.is_active = active;
        }
        if let Some(metadata) = input.metadata {
            self.metadata = metadata;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn view(&self, etl_jobs_count: usize) -> DataSourceView {
        DataSourceView {
            id: self.id,
            name: self.name.clone(),
            source_type: self.source_type,
            is_active: self.is_active,
            metadata: self.metadata.clone(),
            etl_jobs_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Checks that `name` is not taken by another source, ignoring case.
///
/// Renaming a source to a different casing of its own name is allowed.
pub fn ensure_unique_name<'a, I>(
    name: &str,
    current: Option<&DataSource>,
    existing: I,
) -> Result<(), ValidationErrors>
where
    I: IntoIterator<Item = &'a DataSource>,
{
    let wanted = name.trim().to_lowercase();
    let taken = existing.into_iter().any(|source| {
        source.name.to_lowercase() == wanted && current.map_or(true, |own| own.id != source.id)
    });

    if taken {
        Err(ValidationErrors::single(
            "name",
            "A data source with this name already exists.",
        ))
    } else {
        Ok(())
    }
}

/// Output shape; `connection_string` is write-only.
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceView {
    pub id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    pub is_active: bool,
    pub metadata: JsonObject,
    pub etl_jobs_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 9, 30, 0).single().expect("valid time")
    }

    fn input(name: &str, source_type: &str) -> DataSourceInput {
        DataSourceInput {
            name: Some(name.to_string()),
            source_type: Some(source_type.to_string()),
            connection_string: Some("postgres://ukpn/substations".to_string()),
            ..DataSourceInput::default()
        }
    }

    #[test]
    fn create_defaults_to_active_with_empty_metadata() {
        let source = DataSource::create(input("UKPN Grid", "database"), now()).expect("valid");
        assert!(source.is_active);
        assert!(source.metadata.is_empty());
        assert_eq!(source.source_type, SourceType::Database);
    }

    #[test]
    fn create_reports_every_invalid_field() {
        let err = DataSource::create(
            DataSourceInput {
                source_type: Some("ftp".to_string()),
                ..DataSourceInput::default()
            },
            now(),
        )
        .expect_err("invalid input");

        assert_eq!(err.messages("name"), ["This field is required."]);
        assert_eq!(err.messages("source_type"), ["\"ftp\" is not a valid choice."]);
        assert_eq!(err.messages("connection_string"), ["This field is required."]);
    }

    #[test]
    fn names_are_unique_ignoring_case_except_for_self() {
        let existing = DataSource::create(input("UKPN Grid", "api"), now()).expect("valid");
        let others = vec![existing.clone()];

        let err = ensure_unique_name("ukpn grid", None, &others).expect_err("duplicate");
        assert_eq!(
            err.messages("name"),
            ["A data source with this name already exists."]
        );
        ensure_unique_name("UKPN GRID", Some(&existing), &others).expect("own name allowed");
    }

    #[test]
    fn view_hides_connection_string() {
        let source = DataSource::create(input("Feeds", "stream"), now()).expect("valid");
        let json = serde_json::to_value(source.view(3)).expect("serializes");
        assert!(json.get("connection_string").is_none());
        assert_eq!(json["etl_jobs_count"], 3);
        assert_eq!(json["source_type"], "stream");
    }
}
