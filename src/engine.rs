use crate::aggregator::{MonthlyAggregator, MonthlyHistory};
use crate::classifier::SeriesClassifier;
use crate::config::ForecastConfig;
use crate::error::Result;
use crate::models::{fit_and_forecast, Deadline};
use crate::schema::{
    CategorySeries, FallbackReason, ForecastRequest, ForecastResult, ForecastStrategy,
    TransactionRecord,
};
use crate::seasonality::seasonal_trend_forecast;
use crate::stabilizer::Stabilizer;
use crate::utils::{months_after, to_amount};
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Forecast for one category after stabilization.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryForecast {
    pub category: String,
    pub strategy: ForecastStrategy,
    pub values: Vec<f64>,
    pub fallback: Option<FallbackReason>,
}

/// Runs classifier, strategy and stabilizer for each category of a history.
/// Holds no state between calls beyond its configuration.
#[derive(Debug, Clone, Default)]
pub struct ExpenseForecaster {
    config: ForecastConfig,
}

impl ExpenseForecaster {
    pub fn new(config: ForecastConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn forecast_records(
        &self,
        records: &[TransactionRecord],
        request: &ForecastRequest,
    ) -> Result<ForecastResult> {
        let history = MonthlyAggregator::aggregate(records);
        self.forecast(&history, request)
    }

    /// Forecasts every category one after another.
    pub fn forecast(
        &self,
        history: &MonthlyHistory,
        request: &ForecastRequest,
    ) -> Result<ForecastResult> {
        request.validate()?;

        let outcomes: Vec<CategoryForecast> = history
            .categories()
            .iter()
            .map(|(name, series)| forecast_category(&self.config, name, series, request))
            .collect();

        Ok(assemble(&self.config, history, request, outcomes))
    }

    pub fn forecast_category(
        &self,
        category: &str,
        series: &CategorySeries,
        request: &ForecastRequest,
    ) -> Result<CategoryForecast> {
        request.validate()?;
        Ok(forecast_category(&self.config, category, series, request))
    }

    /// Forecasts categories on blocking worker threads, at most
    /// `config.worker_count()` at a time. Total is summed once every category is back.
    #[cfg(feature = "concurrent")]
    pub async fn forecast_concurrent(
        &self,
        history: &MonthlyHistory,
        request: &ForecastRequest,
    ) -> Result<ForecastResult> {
        use futures::future::join_all;
        use std::sync::Arc;
        use tokio::sync::Semaphore;

        request.validate()?;

        let config = Arc::new(self.config.clone());
        let semaphore = Arc::new(Semaphore::new(config.worker_count()));
        let request = *request;

        let tasks = history.categories().iter().map(|(name, series)| {
            let config = Arc::clone(&config);
            let semaphore = Arc::clone(&semaphore);
            let name = name.clone();
            let series = series.clone();

            async move {
                let permit = semaphore.acquire_owned().await.ok();
                let worker_name = name.clone();
                let worker_series = series.clone();
                let worker_config = Arc::clone(&config);

                let joined = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    forecast_category(&worker_config, &worker_name, &worker_series, &request)
                })
                .await;

                match joined {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!("{}: forecast worker failed ({}), using last value", name, e);
                        constant_fallback(
                            &config,
                            &name,
                            &series,
                            request.horizon,
                            FallbackReason::WorkerFailure,
                        )
                    }
                }
            }
        });

        let outcomes = join_all(tasks).await;
        Ok(assemble(&self.config, history, &request, outcomes))
    }
}

fn forecast_category(
    config: &ForecastConfig,
    category: &str,
    series: &CategorySeries,
    request: &ForecastRequest,
) -> CategoryForecast {
    let horizon = request.horizon;
    let strategy = SeriesClassifier::new(config).classify_category(category, series, request.mode);

    // Repeated values are already amounts; only model output is rounded.
    let amounts = match &strategy {
        ForecastStrategy::Passthrough(value) | ForecastStrategy::ConstantRepeat(value) => {
            Ok(vec![*value; horizon])
        }
        ForecastStrategy::SeasonalTrend(params) => {
            seasonal_trend_forecast(series, *params, horizon).map(|raw| rounded(&raw, config))
        }
        ForecastStrategy::Regression(kind) => {
            let deadline = Deadline::new(category, config.training_timeout());
            fit_and_forecast(*kind, &series.values(), horizon, config, &deadline)
                .map(|raw| rounded(&raw, config))
        }
    };

    match amounts {
        Ok(amounts) => {
            let stabilizer = Stabilizer::new(&config.stabilizer, config.precision);
            CategoryForecast {
                category: category.to_string(),
                values: stabilizer.stabilize(category, &amounts, series),
                strategy,
                fallback: None,
            }
        }
        Err(e) => {
            warn!(
                "{}: {:?} failed ({}), falling back to last observed value",
                category, strategy, e
            );
            constant_fallback(
                config,
                category,
                series,
                horizon,
                FallbackReason::from_error(&e),
            )
        }
    }
}

fn rounded(raw: &[f64], config: &ForecastConfig) -> Vec<f64> {
    raw.iter().map(|v| to_amount(*v, config.precision)).collect()
}

fn constant_fallback(
    config: &ForecastConfig,
    category: &str,
    series: &CategorySeries,
    horizon: usize,
    reason: FallbackReason,
) -> CategoryForecast {
    let last = series.last_value().unwrap_or(0.0);
    let amounts = vec![last; horizon];
    let stabilizer = Stabilizer::new(&config.stabilizer, config.precision);

    CategoryForecast {
        category: category.to_string(),
        strategy: ForecastStrategy::ConstantRepeat(last),
        values: stabilizer.stabilize(category, &amounts, series),
        fallback: Some(reason),
    }
}

fn assemble(
    config: &ForecastConfig,
    history: &MonthlyHistory,
    request: &ForecastRequest,
    outcomes: Vec<CategoryForecast>,
) -> ForecastResult {
    let mut per_category = BTreeMap::new();
    let mut strategies = BTreeMap::new();
    let mut fallbacks = BTreeMap::new();

    for outcome in outcomes {
        debug!("{}: {:?} -> {:?}", outcome.category, outcome.strategy, outcome.values);
        if let Some(reason) = outcome.fallback {
            fallbacks.insert(outcome.category.clone(), reason);
        }
        strategies.insert(outcome.category.clone(), outcome.strategy);
        per_category.insert(outcome.category, outcome.values);
    }

    let stabilizer = Stabilizer::new(&config.stabilizer, config.precision);
    let total = stabilizer.rebuild_total(&per_category, request.horizon);
    let periods = history
        .last_month()
        .map(|last| months_after(last, request.horizon))
        .unwrap_or_default();

    info!(
        "Forecast {} months for {} categories ({} fell back)",
        request.horizon,
        per_category.len(),
        fallbacks.len()
    );

    ForecastResult::new(
        request.horizon,
        periods,
        per_category,
        total,
        strategies,
        fallbacks,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MultiStepMode;
    use crate::overrides::CategoryOverride;
    use crate::schema::{ForecastMode, ModelKind, MonthKey};
    use crate::stabilizer::verify_total;

    fn series(values: &[f64]) -> CategorySeries {
        CategorySeries::from_values(MonthKey::new(2024, 1).unwrap(), values)
    }

    fn record(category: &str, amount: f64, y: i32, m: u32, d: u32) -> TransactionRecord {
        let date = chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap();
        TransactionRecord::new(category, amount, date).unwrap()
    }

    #[test]
    fn test_linear_category_forecast() {
        let forecaster = ExpenseForecaster::default();
        let request = ForecastRequest::new(1).with_mode(ForecastMode::Linear);
        let outcome = forecaster
            .forecast_category("Food", &series(&[500.0, 520.0, 510.0, 530.0, 505.0]), &request)
            .unwrap();

        assert_eq!(outcome.strategy, ForecastStrategy::Regression(ModelKind::Linear));
        assert_eq!(outcome.values, vec![519.0]);
        assert_eq!(outcome.fallback, None);
    }

    #[test]
    fn test_timeout_falls_back_to_last_value() {
        let config = ForecastConfig {
            training_timeout_ms: Some(0),
            ..ForecastConfig::default()
        };
        let forecaster = ExpenseForecaster::new(config).unwrap();
        let request = ForecastRequest::new(3).with_mode(ForecastMode::Sequence);
        let outcome = forecaster
            .forecast_category("Food", &series(&[400.0, 450.0, 420.0, 480.0, 430.0]), &request)
            .unwrap();

        assert_eq!(outcome.strategy, ForecastStrategy::ConstantRepeat(430.0));
        assert_eq!(outcome.values, vec![430.0; 3]);
        assert_eq!(outcome.fallback, Some(FallbackReason::Timeout));
    }

    #[test]
    fn test_fractional_passthrough_is_not_rounded() {
        let forecaster = ExpenseForecaster::default();
        let outcome = forecaster
            .forecast_category("Gift", &series(&[12.5]), &ForecastRequest::new(2))
            .unwrap();

        assert_eq!(outcome.strategy, ForecastStrategy::Passthrough(12.5));
        assert_eq!(outcome.values, vec![12.5, 12.5]);
    }

    #[test]
    fn test_fractional_constant_is_not_rounded() {
        let forecaster = ExpenseForecaster::default();
        let request = ForecastRequest::new(3).with_mode(ForecastMode::Linear);
        let outcome = forecaster
            .forecast_category("Coffee", &series(&[9.99, 9.99, 9.99]), &request)
            .unwrap();

        assert_eq!(outcome.strategy, ForecastStrategy::ConstantRepeat(9.99));
        assert_eq!(outcome.values, vec![9.99, 9.99, 9.99]);
    }

    #[test]
    fn test_diverging_fit_falls_back_to_last_value() {
        let mut config = ForecastConfig::default();
        config.linear.learning_rate = 1e6;
        let forecaster = ExpenseForecaster::new(config).unwrap();
        let request = ForecastRequest::new(2).with_mode(ForecastMode::Linear);

        let outcome = forecaster
            .forecast_category("Food", &series(&[100.0, 300.0, 200.0]), &request)
            .unwrap();

        assert_eq!(outcome.strategy, ForecastStrategy::ConstantRepeat(200.0));
        assert_eq!(outcome.values, vec![200.0, 200.0]);
        assert_eq!(outcome.fallback, Some(FallbackReason::NumericInstability));
    }

    #[test]
    fn test_declining_series_is_floored_at_zero() {
        let forecaster = ExpenseForecaster::default();
        let request = ForecastRequest::new(3).with_mode(ForecastMode::Linear);
        let outcome = forecaster
            .forecast_category("Shopping", &series(&[300.0, 200.0, 100.0]), &request)
            .unwrap();
        assert_eq!(outcome.values, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_forecast_assembles_total_and_periods() {
        let config = ForecastConfig::default().with_override("Rent", CategoryOverride::LastValue);
        let forecaster = ExpenseForecaster::new(config).unwrap();

        let records = vec![
            record("Rent", 1000.0, 2024, 1, 5),
            record("Rent", 1100.0, 2024, 2, 5),
            record("Gift", 200.0, 2024, 2, 14),
        ];
        let result = forecaster
            .forecast_records(&records, &ForecastRequest::new(3))
            .unwrap();

        assert_eq!(result.category("Rent"), Some(&[1100.0, 1100.0, 1100.0][..]));
        assert_eq!(result.category("Gift"), Some(&[200.0, 200.0, 200.0][..]));
        assert_eq!(result.total(), &[1300.0, 1300.0, 1300.0]);
        assert_eq!(
            result.periods(),
            &[
                MonthKey::new(2024, 3).unwrap(),
                MonthKey::new(2024, 4).unwrap(),
                MonthKey::new(2024, 5).unwrap()
            ]
        );
        assert!(verify_total(result.per_category(), result.total(), 0.0).is_ok());
    }

    #[test]
    fn test_recursive_linear_mode_runs_end_to_end() {
        let mut config = ForecastConfig::default();
        config.linear.multi_step = MultiStepMode::Recursive;
        let forecaster = ExpenseForecaster::new(config).unwrap();
        let request = ForecastRequest::new(3).with_mode(ForecastMode::Linear);

        let outcome = forecaster
            .forecast_category("Food", &series(&[100.0, 110.0, 120.0, 130.0]), &request)
            .unwrap();
        // Trailing average 120 caps the line at 180.
        assert_eq!(outcome.values, vec![140.0, 150.0, 160.0]);
    }

    #[test]
    fn test_zero_horizon_is_rejected() {
        let forecaster = ExpenseForecaster::default();
        assert!(forecaster
            .forecast(&MonthlyHistory::default(), &ForecastRequest::new(0))
            .is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ForecastConfig::default();
        config.stabilizer.upper_ratio = 0.0;
        assert!(ExpenseForecaster::new(config).is_err());
    }
}
