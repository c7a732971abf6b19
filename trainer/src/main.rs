mod dataset;
mod evaluation;

use anyhow::{Context, Result};
use clap::Parser;
use gdp_backend::artifact::DEFAULT_MODEL_PATH;
use gdp_backend::forest::{ForestParams, RandomForestRegressor};
use gdp_backend::worldbank::{IndicatorQuery, WorldBankClient, DEFAULT_BASE_URL, DEFAULT_PER_PAGE, GDP_INDICATOR};
use gdp_backend::PersistedModel;
use log::info;
use std::path::PathBuf;
use std::time::Instant;

use crate::evaluation::{evaluate, Split};

/// Fetch GDP history from the World Bank, fit the forecast forest and write
/// the model artifact the server loads.
#[derive(Parser, Debug)]
#[command(name = "gdp-trainer", version)]
struct Args {
    /// World Bank country codes to train on
    #[arg(
        long,
        env = "GDP_COUNTRIES",
        value_delimiter = ',',
        default_value = "US,GB,CN,IN,JP,DE,FR,CA,AU,BR,RU,ZA,MX,KR,ID"
    )]
    countries: Vec<String>,

    /// Indicator holding the GDP series
    #[arg(long, env = "GDP_INDICATOR", default_value = GDP_INDICATOR)]
    indicator: String,

    #[arg(long, env = "GDP_START_YEAR", default_value_t = 1960)]
    start_year: i32,

    #[arg(long, env = "GDP_END_YEAR", default_value_t = 2022)]
    end_year: i32,

    #[arg(long, env = "WORLD_BANK_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Records requested per page
    #[arg(long, env = "WORLD_BANK_PER_PAGE", default_value_t = DEFAULT_PER_PAGE)]
    per_page: u32,

    #[arg(long, env = "GDP_N_ESTIMATORS", default_value_t = 100)]
    n_estimators: usize,

    /// Maximum tree depth; unlimited when omitted
    #[arg(long, env = "GDP_MAX_DEPTH")]
    max_depth: Option<usize>,

    /// Fraction of rows held out for evaluation
    #[arg(long, env = "GDP_TEST_SIZE", default_value_t = 0.2)]
    test_size: f64,

    #[arg(long, env = "GDP_SEED", default_value_t = 42)]
    seed: u64,

    /// Where the model artifact is written
    #[arg(long, short = 'o', env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .init();

    let args = Args::parse();
    if args.start_year > args.end_year {
        anyhow::bail!(
            "start year {} is after end year {}",
            args.start_year,
            args.end_year
        );
    }
    let started = Instant::now();

    info!(
        "Fetching {} for {} countries, {}-{}",
        args.indicator,
        args.countries.len(),
        args.start_year,
        args.end_year
    );
    let client = WorldBankClient::new(args.base_url.as_str()).with_per_page(args.per_page);
    let query = IndicatorQuery::new(
        &args.indicator,
        args.countries.iter().map(|c| c.trim().to_string()),
        args.start_year,
        args.end_year,
    );
    let observations = client
        .fetch(&query)
        .context("fetching training data from the World Bank")?;
    info!("Retrieved {} records", observations.len());

    let data = dataset::prepare(observations, &args.countries)?;
    info!(
        "Training on {} countries: {}",
        data.countries.len(),
        data.countries.values().cloned().collect::<Vec<_>>().join(", ")
    );

    let split = Split::shuffled(data.x.nrows(), args.test_size, args.seed)?;
    let (x_train, y_train) = Split::select(&split.train, data.x.view(), data.y.view());
    let (x_test, y_test) = Split::select(&split.test, data.x.view(), data.y.view());
    info!("{} train rows, {} test rows", split.train.len(), split.test.len());

    let params = ForestParams {
        n_estimators: args.n_estimators,
        max_depth: args.max_depth,
        seed: args.seed,
        ..ForestParams::default()
    };
    let fit_started = Instant::now();
    let forest = RandomForestRegressor::fit(params, x_train.view(), y_train.view())?;
    let fitted = forest.params();
    info!(
        "Fitted {} trees (max depth {}, seed {}) in {:.2?}",
        forest.n_trees(),
        fitted
            .max_depth
            .map_or_else(|| "unlimited".to_string(), |d| d.to_string()),
        fitted.seed,
        fit_started.elapsed()
    );

    let predicted = forest.predict(x_test.view())?;
    let metrics = evaluate(&predicted, y_test.view());
    info!(
        "Held-out evaluation: R2 {:.4}, MAE {:.3e}, RMSE {:.3e} over {} rows",
        metrics.r2, metrics.mae, metrics.rmse, metrics.test_rows
    );

    let model = PersistedModel::new(data.schema, data.countries, forest)?.with_metrics(metrics);
    model
        .save(&args.output)
        .with_context(|| format!("writing model to {}", args.output.display()))?;

    info!(
        "SUCCESS: model saved to {} ({:.2?} total)",
        args.output.display(),
        started.elapsed()
    );
    Ok(())
}
