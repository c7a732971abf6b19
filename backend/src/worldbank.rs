//! Client for the World Bank v2 indicator API.
//!
//! Responses are `[metadata, records]` arrays. Pages are followed until the
//! metadata says there are none left. A one-element response carries an
//! error message; a `null` records element means no data.

use log::{debug, info, warn};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://api.worldbank.org/v2";
pub const GDP_INDICATOR: &str = "NY.GDP.MKTP.CD";
pub const DEFAULT_PER_PAGE: u32 = 10_000;

/// Short indicator names accepted by the data routes.
pub const INDICATORS: [(&str, &str); 3] = [
    ("gdp", GDP_INDICATOR),
    ("inflation", "FP.CPI.TOTL.ZG"),
    ("unemployment", "SL.UEM.TOTL.ZS"),
];

pub fn indicator_id(alias: &str) -> Option<&'static str> {
    INDICATORS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(alias))
        .map(|(_, id)| *id)
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response shape: {0}")]
    Shape(String),
    #[error("data source reported an error: {0}")]
    Api(String),
    #[error("invalid year '{0}' in record")]
    BadDate(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageMeta {
    #[serde(deserialize_with = "lenient_u32")]
    pub page: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub pages: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub per_page: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub total: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedRef {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorRecord {
    pub country: NamedRef,
    #[serde(rename = "countryiso3code", default)]
    pub iso3_code: Option<String>,
    pub date: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct IndicatorPage {
    pub meta: PageMeta,
    pub records: Vec<IndicatorRecord>,
}

/// One (country, year, value) triple. `value` is `None` where the source has no figure.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub country: String,
    pub country_code: String,
    /// Empty for aggregates such as regions.
    pub iso3_code: Option<String>,
    pub year: i32,
    pub value: Option<f64>,
}

impl TryFrom<IndicatorRecord> for Observation {
    type Error = FetchError;

    fn try_from(record: IndicatorRecord) -> Result<Self, Self::Error> {
        let year = record
            .date
            .trim()
            .parse()
            .map_err(|_| FetchError::BadDate(record.date.clone()))?;
        Ok(Observation {
            country: record.country.value,
            country_code: record.country.id,
            iso3_code: record.iso3_code.filter(|code| !code.is_empty()),
            year,
            value: record.value,
        })
    }
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| de::Error::custom(format!("expected a page count, got {n}"))),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected a page count, got {other}"))),
    }
}

pub fn parse_page(body: Value) -> Result<IndicatorPage, FetchError> {
    let Value::Array(mut parts) = body else {
        return Err(FetchError::Shape("top-level value is not an array".into()));
    };

    match parts.len() {
        0 => Err(FetchError::Shape("empty response".into())),
        1 => {
            let message = parts[0]
                .pointer("/message/0/value")
                .and_then(Value::as_str)
                .unwrap_or("no data returned")
                .to_string();
            Err(FetchError::Api(message))
        }
        _ => {
            let records = parts.swap_remove(1);
            let meta = serde_json::from_value(parts.swap_remove(0))
                .map_err(|e| FetchError::Shape(format!("metadata: {e}")))?;
            let records = match records {
                Value::Null => Vec::new(),
                other => serde_json::from_value(other)
                    .map_err(|e| FetchError::Shape(format!("records: {e}")))?,
            };
            Ok(IndicatorPage { meta, records })
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndicatorQuery {
    pub countries: Vec<String>,
    pub indicator: String,
    pub start_year: i32,
    pub end_year: i32,
}

impl IndicatorQuery {
    pub fn new<I, S>(indicator: &str, countries: I, start_year: i32, end_year: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            countries: countries.into_iter().map(Into::into).collect(),
            indicator: indicator.to_string(),
            start_year,
            end_year,
        }
    }

    pub fn gdp<I, S>(countries: I, start_year: i32, end_year: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(GDP_INDICATOR, countries, start_year, end_year)
    }
}

pub struct WorldBankClient {
    http: reqwest::blocking::Client,
    base_url: String,
    per_page: u32,
}

impl WorldBankClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            per_page: DEFAULT_PER_PAGE,
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn page_url(&self, query: &IndicatorQuery, page: u32) -> String {
        format!(
            "{}/country/{}/indicator/{}?format=json&date={}:{}&per_page={}&page={}",
            self.base_url,
            query.countries.join(";"),
            query.indicator,
            query.start_year,
            query.end_year,
            self.per_page,
            page
        )
    }

    fn fetch_page(&self, query: &IndicatorQuery, page: u32) -> Result<IndicatorPage, FetchError> {
        let url = self.page_url(query, page);
        debug!("GET {url}");
        let http_err = |source: reqwest::Error| FetchError::Http {
            url: url.clone(),
            source,
        };
        let body: Value = self
            .http
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?
            .json()
            .map_err(http_err)?;
        parse_page(body)
    }

    /// Fetches every page of the query and flattens the records.
    pub fn fetch(&self, query: &IndicatorQuery) -> Result<Vec<Observation>, FetchError> {
        let mut observations = Vec::new();
        let mut page = 1;
        loop {
            let IndicatorPage { meta, records } = self.fetch_page(query, page)?;
            for record in records {
                observations.push(Observation::try_from(record)?);
            }

            if page >= meta.pages {
                break;
            }
            page += 1;
        }

        if observations.is_empty() {
            warn!("no records returned for {:?}", query.countries);
        } else {
            info!(
                "retrieved {} records for {} countries ({} pages)",
                observations.len(),
                query.countries.len(),
                page
            );
        }
        Ok(observations)
    }
}
