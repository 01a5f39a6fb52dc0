//! # Expense Forecaster
//!
//! Per-category monthly expense forecasting for a single user's transaction feed.
//!
//! ## Core Concepts
//!
//! - **Monthly history**: transactions bucketed by `(category, month)` and summed
//! - **Strategy ladder**: each category is forecast with the richest method its
//!   history supports, down to repeating the last value
//! - **Stabilization**: forecasts are clamped against the category's recent actuals
//! - **Total**: always the per-step sum of the stabilized categories
//!
//! ## Example
//!
//! ```rust,ignore
//! use expense_forecaster::*;
//! use chrono::NaiveDate;
//!
//! let records = vec![
//!     TransactionRecord::new("Food", 500.0, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap())?,
//!     TransactionRecord::new("Food", 520.0, NaiveDate::from_ymd_opt(2024, 2, 3).unwrap())?,
//!     TransactionRecord::new("Rent", 1000.0, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())?,
//! ];
//!
//! let result = forecast_expenses(&records, &ForecastRequest::new(3))?;
//! println!("{}", result.to_json()?);
//! ```

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod models;
pub mod overrides;
pub mod schema;
pub mod seasonality;
pub mod stabilizer;
pub mod utils;

pub use aggregator::{aggregate_monthly, MonthlyAggregator, MonthlyHistory};
pub use classifier::{classify_series, SeriesClassifier};
pub use config::{
    ForecastConfig, LinearModelConfig, MultiStepMode, SequenceModelConfig, StabilizerConfig,
};
pub use engine::{CategoryForecast, ExpenseForecaster};
pub use error::{ForecastError, Result};
pub use ingestion::*;
pub use overrides::CategoryOverride;
pub use schema::*;
pub use stabilizer::{verify_total, Stabilizer};

use log::{debug, info};

pub struct ForecastProcessor;

impl ForecastProcessor {
    pub fn process(
        records: &[TransactionRecord],
        request: &ForecastRequest,
        config: &ForecastConfig,
    ) -> Result<ForecastResult> {
        let forecaster = ExpenseForecaster::new(config.clone())?;
        let history = MonthlyAggregator::aggregate(records);

        info!(
            "Forecasting {} months from {} transactions",
            request.horizon,
            records.len()
        );
        debug!(
            "History spans {} categories, latest month {:?}",
            history.categories().len(),
            history.last_month()
        );

        forecaster.forecast(&history, request)
    }

    /// Runs [`ForecastProcessor::process`] and then checks that Total matches
    /// the per-category sum at every step.
    pub fn process_with_verification(
        records: &[TransactionRecord],
        request: &ForecastRequest,
        config: &ForecastConfig,
        tolerance: f64,
    ) -> Result<ForecastResult> {
        let result = Self::process(records, request, config)?;
        verify_total(result.per_category(), result.total(), tolerance)?;
        Ok(result)
    }
}

pub fn forecast_expenses(
    records: &[TransactionRecord],
    request: &ForecastRequest,
) -> Result<ForecastResult> {
    ForecastProcessor::process(records, request, &ForecastConfig::default())
}

pub fn forecast_expenses_with_config(
    records: &[TransactionRecord],
    request: &ForecastRequest,
    config: &ForecastConfig,
) -> Result<ForecastResult> {
    ForecastProcessor::process(records, request, config)
}

pub fn forecast_with_verification(
    records: &[TransactionRecord],
    request: &ForecastRequest,
    config: &ForecastConfig,
    tolerance: f64,
) -> Result<ForecastResult> {
    ForecastProcessor::process_with_verification(records, request, config, tolerance)
}

/// Forecasts straight from raw feed entries, optionally restricted to one user.
/// Entries that fail to parse are skipped with a warning.
pub fn forecast_raw_feed(
    raw: &[RawTransaction],
    user_id: Option<&str>,
    request: &ForecastRequest,
    config: &ForecastConfig,
) -> Result<ForecastResult> {
    let records = match user_id {
        Some(user) => parse_raw_records(&filter_user(raw, user)),
        None => parse_raw_records(raw),
    };
    ForecastProcessor::process(&records, request, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(category: &str, amount: f64, y: i32, m: u32, d: u32) -> TransactionRecord {
        TransactionRecord::new(category, amount, NaiveDate::from_ymd_opt(y, m, d).unwrap()).unwrap()
    }

    #[test]
    fn test_end_to_end_processing() {
        let records = vec![
            record("Food", 300.0, 2024, 1, 3),
            record("Food", 200.0, 2024, 1, 20),
            record("Food", 520.0, 2024, 2, 3),
            record("Food", 510.0, 2024, 3, 3),
            record("Rent", 1000.0, 2024, 1, 1),
            record("Rent", 1000.0, 2024, 2, 1),
            record("Rent", 1000.0, 2024, 3, 1),
        ];

        let result = forecast_with_verification(
            &records,
            &ForecastRequest::new(3),
            &ForecastConfig::default(),
            0.0,
        )
        .unwrap();

        assert_eq!(result.horizon(), 3);
        assert_eq!(result.category("Rent"), Some(&[1000.0, 1000.0, 1000.0][..]));
        assert_eq!(
            result.strategies().get("Rent"),
            Some(&ForecastStrategy::ConstantRepeat(1000.0))
        );
        assert_eq!(result.total().len(), 3);
        assert_eq!(result.periods()[0], MonthKey::new(2024, 4).unwrap());
    }

    #[test]
    fn test_empty_feed_yields_zero_total() {
        let result = forecast_expenses(&[], &ForecastRequest::new(2)).unwrap();
        assert!(result.per_category().is_empty());
        assert_eq!(result.total(), &[0.0, 0.0]);
        assert!(result.periods().is_empty());
    }

    #[test]
    fn test_raw_feed_is_filtered_by_user() {
        let mut mine = RawTransaction::new("Food", 100.0, "2024-01-10");
        mine.user_id = Some("u1".to_string());
        let mut theirs = RawTransaction::new("Travel", 900.0, "2024-01-12");
        theirs.user_id = Some("u2".to_string());

        let result = forecast_raw_feed(
            &[mine, theirs],
            Some("u1"),
            &ForecastRequest::new(1),
            &ForecastConfig::default(),
        )
        .unwrap();

        assert_eq!(result.category("Food"), Some(&[100.0][..]));
        assert_eq!(result.category("Travel"), None);
    }

    #[test]
    fn test_chart_map_includes_total() {
        let records = vec![record("Food", 40.0, 2024, 5, 1), record("Bills", 60.0, 2024, 5, 2)];
        let result = forecast_expenses(&records, &ForecastRequest::new(1)).unwrap();

        let chart = result.to_chart_map();
        assert_eq!(chart.get(TOTAL_KEY), Some(&vec![100.0]));
        assert!(result.to_json().unwrap().contains("\"Total\""));
    }
}
