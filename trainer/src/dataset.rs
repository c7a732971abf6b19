//! Turns raw World Bank observations into the lagged training matrix.

use anyhow::{bail, Context, Result};
use gdp_backend::worldbank::Observation;
use gdp_backend::{build_feature_row, FeatureInput, TrainingSchema};
use log::{info, warn};
use ndarray::{Array1, Array2};
use std::collections::{BTreeMap, BTreeSet};

/// Number of trailing GDP values used as features.
pub const LAGS: usize = 3;

/// One supervised example before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub country: String,
    pub year: i32,
    pub lags: [f64; LAGS],
    pub target: f64,
}

#[derive(Debug)]
pub struct PreparedData {
    pub schema: TrainingSchema,
    /// Country code -> display name, for the countries that reached training.
    pub countries: BTreeMap<String, String>,
    pub rows: Vec<TrainingRow>,
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

/// Maps each country code present in the data to its display name.
///
/// A code reported under two names is an error. Requested codes that never
/// appear are logged and skipped.
pub fn country_names(observations: &[Observation], requested: &[String]) -> Result<BTreeMap<String, String>> {
    let mut names: BTreeMap<String, String> = BTreeMap::new();
    for obs in observations {
        match names.get(&obs.country_code) {
            Some(existing) if existing != &obs.country => bail!(
                "country code {} is reported as both '{}' and '{}'",
                obs.country_code,
                existing,
                obs.country
            ),
            Some(_) => {}
            None => {
                names.insert(obs.country_code.clone(), obs.country.clone());
            }
        }
    }

    for code in missing_codes(observations, requested) {
        warn!("no data returned for country code {code}, skipping it");
    }
    Ok(names)
}

/// Requested codes matching neither the two-letter nor the three-letter code
/// of any observation.
pub fn missing_codes<'r>(observations: &[Observation], requested: &'r [String]) -> Vec<&'r str> {
    let seen: BTreeSet<String> = observations
        .iter()
        .flat_map(|o| std::iter::once(&o.country_code).chain(o.iso3_code.as_ref()))
        .map(|code| code.to_ascii_uppercase())
        .collect();
    requested
        .iter()
        .map(|code| code.trim())
        .filter(|code| !seen.contains(&code.to_ascii_uppercase()))
        .collect()
}

/// Carries the last seen value forward over gaps. Leading gaps stay empty.
pub fn forward_fill(values: &mut [Option<f64>]) {
    let mut last = None;
    for value in values.iter_mut() {
        match value {
            Some(v) => last = Some(*v),
            None => *value = last,
        }
    }
}

/// Builds the lag/target rows for one country's year-ordered series.
///
/// Shifts are positional over the filled series, so the first three and the
/// last entries never produce a row.
pub fn lagged_rows(country: &str, series: &[(i32, f64)]) -> Vec<TrainingRow> {
    if series.len() < LAGS + 2 {
        return Vec::new();
    }
    (LAGS..series.len() - 1)
        .map(|i| TrainingRow {
            country: country.to_string(),
            year: series[i].0,
            lags: [series[i - 1].1, series[i - 2].1, series[i - 3].1],
            target: series[i + 1].1,
        })
        .collect()
}

/// Sorts, fills, shifts and encodes the observations.
pub fn prepare(mut observations: Vec<Observation>, requested: &[String]) -> Result<PreparedData> {
    if observations.is_empty() {
        bail!("Cannot proceed with training as no data was fetched");
    }
    let names = country_names(&observations, requested)?;

    observations.sort_by(|a, b| a.country.cmp(&b.country).then(a.year.cmp(&b.year)));

    let missing = observations.iter().filter(|o| o.value.is_none()).count();
    info!("{} observations, {missing} without a value", observations.len());

    let mut rows = Vec::new();
    let mut dropped_leading = 0;
    for chunk in observations.chunk_by(|a, b| a.country == b.country) {
        let country = &chunk[0].country;
        let mut values: Vec<Option<f64>> = chunk.iter().map(|o| o.value).collect();
        forward_fill(&mut values);

        let series: Vec<(i32, f64)> = chunk
            .iter()
            .zip(values)
            .filter_map(|(o, v)| v.map(|v| (o.year, v)))
            .collect();
        dropped_leading += chunk.len() - series.len();

        let country_rows = lagged_rows(country, &series);
        if country_rows.is_empty() {
            warn!("{country}: {} usable years is too few for lag features", series.len());
        }
        rows.extend(country_rows);
    }
    if dropped_leading > 0 {
        info!("dropped {dropped_leading} leading observations without a value");
    }
    if rows.is_empty() {
        bail!("no training rows left after building lag features");
    }

    let trained: BTreeSet<&str> = rows.iter().map(|r| r.country.as_str()).collect();
    let schema = TrainingSchema::for_countries(trained.iter().copied())
        .context("building the training schema")?;
    let countries = names
        .into_iter()
        .filter(|(_, name)| trained.contains(name.as_str()))
        .collect();

    let mut values = Vec::with_capacity(rows.len() * schema.len());
    for row in &rows {
        let encoded = build_feature_row(
            &schema,
            &FeatureInput {
                country: &row.country,
                year: row.year,
                lags: row.lags,
            },
        )?;
        values.extend(encoded.to_array().iter().copied());
    }
    let x = Array2::from_shape_vec((rows.len(), schema.len()), values)?;
    let y = rows.iter().map(|r| r.target).collect::<Array1<f64>>();

    info!("prepared {} rows x {} features", x.nrows(), x.ncols());
    Ok(PreparedData {
        schema,
        countries,
        rows,
        x,
        y,
    })
}
