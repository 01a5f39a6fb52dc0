//! Strategy selection. The fallback ladder, first match wins:
//!
//! | Rule | Condition                                   | Strategy                      |
//! |------|---------------------------------------------|-------------------------------|
//! | 1    | fewer than 2 observations                   | `Passthrough(last or 0)`      |
//! | 2    | every value within tolerance of the first   | `ConstantRepeat(first)`       |
//! | -    | category has a configured override          | the override's strategy       |
//! | 3    | length >= 12, seasonal-aware mode           | `SeasonalTrend`               |
//! | 4    | length >= 4, sequence mode                  | `Regression(Sequence)`        |
//! | 5    | otherwise                                   | `Regression(Linear)`          |
//!
//! `ForecastMode::Auto` is seasonal-aware and sequence-enabled at once, so it
//! walks rules 3 and 4 purely on length.

use crate::config::ForecastConfig;
use crate::schema::{CategorySeries, ForecastMode, ForecastStrategy, ModelKind};
use log::debug;

pub struct SeriesClassifier<'a> {
    config: &'a ForecastConfig,
}

impl<'a> SeriesClassifier<'a> {
    pub fn new(config: &'a ForecastConfig) -> Self {
        Self { config }
    }

    /// Chooses the strategy for a named category, honouring the override table.
    pub fn classify_category(
        &self,
        category: &str,
        series: &CategorySeries,
        mode: ForecastMode,
    ) -> ForecastStrategy {
        let values = series.values();

        if let Some(strategy) = self.degenerate_strategy(&values) {
            debug!("{}: degenerate series -> {:?}", category, strategy);
            return strategy;
        }

        if let Some(rule) = self.config.overrides.get(category) {
            let contiguous = series.contiguous_values();
            if let Some(strategy) = rule.resolve(&contiguous, values.len(), self.config) {
                debug!("{}: override {:?} -> {:?}", category, rule, strategy);
                return strategy;
            }
        }

        let strategy = self.ladder(values.len(), mode);
        debug!(
            "{}: {} months, mode {:?} -> {:?}",
            category,
            values.len(),
            mode,
            strategy
        );
        strategy
    }

    /// Chooses a strategy from the values alone.
    pub fn classify(&self, values: &[f64], mode: ForecastMode) -> ForecastStrategy {
        self.degenerate_strategy(values)
            .unwrap_or_else(|| self.ladder(values.len(), mode))
    }

    fn degenerate_strategy(&self, values: &[f64]) -> Option<ForecastStrategy> {
        if values.len() < 2 {
            return Some(ForecastStrategy::Passthrough(
                values.last().copied().unwrap_or(0.0),
            ));
        }

        let first = values[0];
        let tolerance = self.config.constant_tolerance;
        if values.iter().all(|v| (v - first).abs() <= tolerance) {
            return Some(ForecastStrategy::ConstantRepeat(first));
        }

        None
    }

    fn ladder(&self, len: usize, mode: ForecastMode) -> ForecastStrategy {
        let seasonal_aware = matches!(mode, ForecastMode::Seasonal | ForecastMode::Auto);
        let sequence_enabled = matches!(mode, ForecastMode::Sequence | ForecastMode::Auto);

        if seasonal_aware && len >= self.config.seasonal_min_len {
            ForecastStrategy::SeasonalTrend(self.config.seasonal)
        } else if sequence_enabled && len >= self.config.sequence_min_len {
            ForecastStrategy::Regression(ModelKind::Sequence)
        } else {
            ForecastStrategy::Regression(ModelKind::Linear)
        }
    }
}

pub fn classify_series(
    values: &[f64],
    mode: ForecastMode,
    config: &ForecastConfig,
) -> ForecastStrategy {
    SeriesClassifier::new(config).classify(values, mode)
}
