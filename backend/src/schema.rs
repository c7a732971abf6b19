use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

pub const YEAR_COLUMN: &str = "Year";
pub const LAG_COLUMNS: [&str; 3] = ["GDP_lag_1", "GDP_lag_2", "GDP_lag_3"];
pub const COUNTRY_PREFIX: &str = "Country_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate column '{0}' in training schema")]
    DuplicateColumn(String),
    #[error("training schema is missing required column '{0}'")]
    MissingColumn(&'static str),
    #[error("training schema has no country columns")]
    NoCountries,
}

/// Ordered column set a trained model expects as input.
///
/// Built once by the trainer, persisted next to the forest and handed to the
/// feature builder at serving time. Serialized as a plain array of names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct TrainingSchema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl TrainingSchema {
    pub fn new(columns: Vec<String>) -> Result<Self, SchemaError> {
        let mut index = HashMap::with_capacity(columns.len());
        for (position, column) in columns.iter().enumerate() {
            if index.insert(column.clone(), position).is_some() {
                return Err(SchemaError::DuplicateColumn(column.clone()));
            }
        }

        for required in std::iter::once(YEAR_COLUMN).chain(LAG_COLUMNS) {
            if !index.contains_key(required) {
                return Err(SchemaError::MissingColumn(required));
            }
        }

        if !columns.iter().any(|c| c.starts_with(COUNTRY_PREFIX)) {
            return Err(SchemaError::NoCountries);
        }

        Ok(Self { columns, index })
    }

    /// Canonical layout: year, the three lags, then one column per country
    /// sorted by display name.
    pub fn for_countries<I, S>(countries: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sorted: BTreeSet<String> = countries
            .into_iter()
            .map(|c| country_column(c.as_ref()))
            .collect();

        let columns = std::iter::once(YEAR_COLUMN.to_string())
            .chain(LAG_COLUMNS.iter().map(|c| c.to_string()))
            .chain(sorted)
            .collect();

        Self::new(columns)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn country_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|c| c.starts_with(COUNTRY_PREFIX))
    }

    /// Display names of the countries the model was trained on.
    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.country_columns()
            .filter_map(|c| c.strip_prefix(COUNTRY_PREFIX))
    }
}

impl PartialEq for TrainingSchema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Eq for TrainingSchema {}

impl TryFrom<Vec<String>> for TrainingSchema {
    type Error = SchemaError;

    fn try_from(columns: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(columns)
    }
}

impl From<TrainingSchema> for Vec<String> {
    fn from(schema: TrainingSchema) -> Self {
        schema.columns
    }
}

/// One-hot column name for a country display name.
pub fn country_column(country: &str) -> String {
    format!("{COUNTRY_PREFIX}{country}")
}
