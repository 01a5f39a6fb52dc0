use crate::error::{ForecastError, Result};
use crate::utils::{mean, parse_transaction_date};
use chrono::{Datelike, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the synthesized series summing every category.
pub const TOTAL_KEY: &str = "Total";

/// A calendar month. Orders chronologically (year first, then month).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(ForecastError::DateError(format!(
                "Invalid month {} for year {}: must be between 1 and 12",
                month, year
            )));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Months elapsed since the start of year 0; used for gap arithmetic.
    pub fn ordinal(self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    pub fn months_until(self, later: MonthKey) -> i64 {
        later.ordinal() - self.ordinal()
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One validated expense, as consumed by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransactionRecord {
    pub category: String,
    pub amount: f64,
    pub date: NaiveDate,
}

impl TransactionRecord {
    pub fn new(category: impl Into<String>, amount: f64, date: NaiveDate) -> Result<Self> {
        let category = category.into();
        let trimmed = category.trim();

        if trimmed.is_empty() {
            return Err(ForecastError::RecordParse {
                index: 0,
                reason: "category is blank".to_string(),
            });
        }
        if trimmed == TOTAL_KEY {
            return Err(ForecastError::RecordParse {
                index: 0,
                reason: format!("category name '{}' is reserved", TOTAL_KEY),
            });
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(ForecastError::RecordParse {
                index: 0,
                reason: format!("amount {} must be a finite, non-negative number", amount),
            });
        }

        Ok(Self {
            category: trimmed.to_string(),
            amount,
            date,
        })
    }

    pub fn month(&self) -> MonthKey {
        MonthKey::from_date(self.date)
    }
}

/// Amounts arrive either as JSON numbers or as numeric strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RawAmount {
    Number(f64),
    Text(String),
}

impl RawAmount {
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            RawAmount::Number(n) => Some(*n),
            RawAmount::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }
}

/// A transaction exactly as the feed supplies it, before date parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawTransaction {
    pub category: String,
    pub amount: RawAmount,
    #[schemars(description = "Transaction date in YYYY-MM-DD format")]
    pub date: String,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RawTransaction {
    pub fn new(category: impl Into<String>, amount: f64, date: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            amount: RawAmount::Number(amount),
            date: date.into(),
            user_id: None,
            description: None,
        }
    }

    pub fn parse(&self) -> Result<TransactionRecord> {
        let amount = self
            .amount
            .to_f64()
            .ok_or_else(|| ForecastError::RecordParse {
                index: 0,
                reason: format!("amount {:?} is not a number", self.amount),
            })?;
        let date = parse_transaction_date(&self.date)?;
        TransactionRecord::new(self.category.clone(), amount, date)
    }
}

/// Monthly totals for one category, strictly increasing by month.
/// Months without activity are absent, not zero-filled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CategorySeries {
    points: Vec<(MonthKey, f64)>,
}

impl CategorySeries {
    pub fn from_monthly(monthly: BTreeMap<MonthKey, f64>) -> Self {
        Self {
            points: monthly.into_iter().collect(),
        }
    }

    /// Builds a series from consecutive months starting at `start`.
    pub fn from_values(start: MonthKey, values: &[f64]) -> Self {
        let mut month = start;
        let mut points = Vec::with_capacity(values.len());
        for &value in values {
            points.push((month, value));
            month = month.next();
        }
        Self { points }
    }

    pub fn points(&self) -> &[(MonthKey, f64)] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|(_, v)| *v).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_value(&self) -> Option<f64> {
        self.points.last().map(|(_, v)| *v)
    }

    pub fn last_month(&self) -> Option<MonthKey> {
        self.points.last().map(|(m, _)| *m)
    }

    /// Mean of the last `window` observed values (fewer if the series is shorter).
    pub fn trailing_average(&self, window: usize) -> f64 {
        let start = self.points.len().saturating_sub(window);
        let recent: Vec<f64> = self.points[start..].iter().map(|(_, v)| *v).collect();
        mean(&recent)
    }

    /// Values over every calendar month from the first to the last observation,
    /// with missing months filled as zero.
    pub fn contiguous_values(&self) -> Vec<f64> {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some((first, _)), Some((last, _))) => (*first, *last),
            _ => return Vec::new(),
        };

        let span = first.months_until(last).max(0) as usize + 1;
        let mut dense = vec![0.0; span];
        for (month, value) in &self.points {
            let idx = first.months_until(*month) as usize;
            dense[idx] = *value;
        }
        dense
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMode {
    #[schemars(
        description = "Walk the full fallback ladder: seasonal with a year of history, sequence model with four months, linear otherwise."
    )]
    #[default]
    Auto,

    #[schemars(description = "Fit a straight line over the month index.")]
    Linear,

    #[schemars(description = "Windowed recurrent predictor with autoregressive rollout.")]
    Sequence,

    #[schemars(description = "Trend plus year-over-year seasonal heuristic.")]
    Seasonal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Sequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SeasonalParams {
    /// Months averaged for the recent and prior windows.
    pub window: usize,
    /// Months between a window and its year-ago counterpart.
    pub season_length: usize,
}

impl Default for SeasonalParams {
    fn default() -> Self {
        Self {
            window: 3,
            season_length: 12,
        }
    }
}

/// The single strategy chosen for a category in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "strategy", content = "params", rename_all = "snake_case")]
pub enum ForecastStrategy {
    Passthrough(f64),
    ConstantRepeat(f64),
    SeasonalTrend(SeasonalParams),
    Regression(ModelKind),
}

/// Why a category ended up on the constant fallback instead of its chosen strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    InsufficientData,
    NumericInstability,
    Timeout,
    WorkerFailure,
}

impl FallbackReason {
    pub fn from_error(error: &ForecastError) -> Self {
        match error {
            ForecastError::InsufficientData { .. } => FallbackReason::InsufficientData,
            ForecastError::Timeout { .. } => FallbackReason::Timeout,
            _ => FallbackReason::NumericInstability,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ForecastRequest {
    #[schemars(description = "Number of future months to forecast (1, 3, 6 and 12 are typical)")]
    pub horizon: usize,
    #[serde(default)]
    pub mode: ForecastMode,
}

impl Default for ForecastRequest {
    fn default() -> Self {
        Self {
            horizon: 1,
            mode: ForecastMode::Auto,
        }
    }
}

impl ForecastRequest {
    pub fn new(horizon: usize) -> Self {
        Self {
            horizon,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ForecastMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(ForecastError::InvalidHorizon(self.horizon));
        }
        Ok(())
    }
}

/// Immutable output of one forecast run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ForecastResult {
    horizon: usize,
    periods: Vec<MonthKey>,
    per_category: BTreeMap<String, Vec<f64>>,
    total: Vec<f64>,
    strategies: BTreeMap<String, ForecastStrategy>,
    fallbacks: BTreeMap<String, FallbackReason>,
}

impl ForecastResult {
    pub(crate) fn new(
        horizon: usize,
        periods: Vec<MonthKey>,
        per_category: BTreeMap<String, Vec<f64>>,
        total: Vec<f64>,
        strategies: BTreeMap<String, ForecastStrategy>,
        fallbacks: BTreeMap<String, FallbackReason>,
    ) -> Self {
        Self {
            horizon,
            periods,
            per_category,
            total,
            strategies,
            fallbacks,
        }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// The months being forecast, starting right after the latest month in the feed.
    pub fn periods(&self) -> &[MonthKey] {
        &self.periods
    }

    pub fn per_category(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.per_category
    }

    pub fn category(&self, name: &str) -> Option<&[f64]> {
        self.per_category.get(name).map(Vec::as_slice)
    }

    pub fn total(&self) -> &[f64] {
        &self.total
    }

    pub fn strategies(&self) -> &BTreeMap<String, ForecastStrategy> {
        &self.strategies
    }

    pub fn fallbacks(&self) -> &BTreeMap<String, FallbackReason> {
        &self.fallbacks
    }

    /// Flattens to `category -> values` plus a `"Total"` entry, the shape charting code expects.
    pub fn to_chart_map(&self) -> BTreeMap<String, Vec<f64>> {
        let mut map = self.per_category.clone();
        map.insert(TOTAL_KEY.to_string(), self.total.clone());
        map
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_chart_map())?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ForecastResult)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}
