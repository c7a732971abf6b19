//! Builds model-ready feature rows aligned to a [`TrainingSchema`].
//!
//! The trainer encodes every training row through [`build_feature_row`] with
//! the same schema value the predictor later loads, so both sides of the
//! training/serving boundary share one encoding.

use crate::schema::{country_column, TrainingSchema, LAG_COLUMNS, YEAR_COLUMN};
use ndarray::Array1;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error("Country '{0}' was not present in the training data.")]
    UnknownCountry(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Flag(bool),
}

impl FeatureValue {
    pub fn as_f64(self) -> f64 {
        match self {
            FeatureValue::Numeric(v) => v,
            FeatureValue::Flag(true) => 1.0,
            FeatureValue::Flag(false) => 0.0,
        }
    }
}

/// Raw inputs for one row: country display name, year and lags ordered
/// most-recent-first.
#[derive(Debug, Clone, Copy)]
pub struct FeatureInput<'a> {
    pub country: &'a str,
    pub year: i32,
    pub lags: [f64; 3],
}

/// Single row of `(column, value)` pairs in schema order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    columns: Vec<(String, FeatureValue)>,
}

impl FeatureRow {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, column: &str) -> Option<FeatureValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FeatureValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Dense numeric encoding, flags as 0/1.
    pub fn to_array(&self) -> Array1<f64> {
        self.columns.iter().map(|(_, value)| value.as_f64()).collect()
    }

    /// True when names and order match the schema exactly.
    pub fn matches(&self, schema: &TrainingSchema) -> bool {
        self.len() == schema.len() && self.names().eq(schema.columns().iter().map(String::as_str))
    }
}

impl From<Vec<(String, FeatureValue)>> for FeatureRow {
    fn from(columns: Vec<(String, FeatureValue)>) -> Self {
        Self { columns }
    }
}

pub fn build_feature_row(
    schema: &TrainingSchema,
    input: &FeatureInput<'_>,
) -> Result<FeatureRow, FeatureError> {
    let mut working: HashMap<String, FeatureValue> = HashMap::with_capacity(schema.len() + 4);
    working.insert(
        YEAR_COLUMN.to_string(),
        FeatureValue::Numeric(f64::from(input.year)),
    );
    for (column, lag) in LAG_COLUMNS.iter().zip(input.lags) {
        working.insert(column.to_string(), FeatureValue::Numeric(lag));
    }

    for column in schema.country_columns() {
        working.insert(column.to_string(), FeatureValue::Flag(false));
    }

    let requested = country_column(input.country);
    if !schema.contains(&requested) {
        return Err(FeatureError::UnknownCountry(input.country.to_string()));
    }
    working.insert(requested, FeatureValue::Flag(true));

    // Stray keys never reach the model; absent schema columns default to false.
    working.retain(|column, _| schema.contains(column));
    let columns = schema
        .columns()
        .iter()
        .map(|column| {
            let value = working
                .remove(column)
                .unwrap_or(FeatureValue::Flag(false));
            (column.clone(), value)
        })
        .collect();

    Ok(FeatureRow { columns })
}
