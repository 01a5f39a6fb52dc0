use crate::error::{ForecastError, Result};
use crate::overrides::CategoryOverride;
use crate::schema::SeasonalParams;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MultiStepMode {
    #[schemars(description = "Predict every future index from a single fit.")]
    #[default]
    Direct,

    #[schemars(
        description = "Predict one month, append it to the training window and refit before the next month."
    )]
    Recursive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LinearModelConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub multi_step: MultiStepMode,
}

impl Default for LinearModelConfig {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.1,
            multi_step: MultiStepMode::Direct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SequenceModelConfig {
    #[schemars(description = "Length of each input window (minimum 3)")]
    pub window: usize,
    pub hidden_units: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    #[schemars(description = "Seed for weight initialisation; fixed seeds give repeatable forecasts")]
    pub seed: u64,
}

impl Default for SequenceModelConfig {
    fn default() -> Self {
        Self {
            window: 3,
            hidden_units: 8,
            epochs: 300,
            learning_rate: 0.05,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StabilizerConfig {
    pub trailing_window: usize,
    #[schemars(description = "Forecasts are capped at this multiple of the trailing average")]
    pub upper_ratio: f64,
    #[schemars(
        description = "Volatile-category forecasts below this multiple of the trailing average are lifted"
    )]
    pub volatile_threshold_ratio: f64,
    #[schemars(description = "Multiple of the trailing average that low volatile forecasts are lifted to")]
    pub volatile_floor_ratio: f64,
    pub volatile_categories: BTreeSet<String>,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            trailing_window: 3,
            upper_ratio: 1.5,
            volatile_threshold_ratio: 0.5,
            volatile_floor_ratio: 0.75,
            volatile_categories: BTreeSet::new(),
        }
    }
}

/// Every tunable of the forecasting pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ForecastConfig {
    #[schemars(description = "Series whose values all lie within this distance of the first are treated as constant")]
    pub constant_tolerance: f64,

    #[schemars(description = "Decimal places forecasts are rounded to (0 = whole currency units)")]
    pub precision: u32,

    pub seasonal_min_len: usize,
    pub sequence_min_len: usize,

    pub linear: LinearModelConfig,
    pub sequence: SequenceModelConfig,
    pub seasonal: SeasonalParams,
    pub stabilizer: StabilizerConfig,

    pub overrides: BTreeMap<String, CategoryOverride>,

    #[schemars(description = "Per-category training deadline in milliseconds; unlimited when absent")]
    pub training_timeout_ms: Option<u64>,

    #[schemars(description = "Upper bound on concurrently forecast categories; defaults to available cores")]
    pub max_workers: Option<usize>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            constant_tolerance: 0.0,
            precision: 0,
            seasonal_min_len: 12,
            sequence_min_len: 4,
            linear: LinearModelConfig::default(),
            sequence: SequenceModelConfig::default(),
            seasonal: SeasonalParams::default(),
            stabilizer: StabilizerConfig::default(),
            overrides: BTreeMap::new(),
            training_timeout_ms: None,
            max_workers: None,
        }
    }
}

impl ForecastConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ForecastConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn with_override(mut self, category: impl Into<String>, rule: CategoryOverride) -> Self {
        self.overrides.insert(category.into(), rule);
        self
    }

    pub fn with_volatile_category(mut self, category: impl Into<String>) -> Self {
        self.stabilizer.volatile_categories.insert(category.into());
        self
    }

    pub fn training_timeout(&self) -> Option<Duration> {
        self.training_timeout_ms.map(Duration::from_millis)
    }

    pub fn worker_count(&self) -> usize {
        self.max_workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(ForecastError::InvalidConfig(msg)) };

        if !self.constant_tolerance.is_finite() || self.constant_tolerance < 0.0 {
            return invalid(format!(
                "constant_tolerance {} must be a non-negative number",
                self.constant_tolerance
            ));
        }
        if self.precision > 6 {
            return invalid(format!("precision {} exceeds 6 decimal places", self.precision));
        }
        if self.sequence.window < 3 {
            return invalid(format!(
                "sequence.window {} is below the minimum of 3",
                self.sequence.window
            ));
        }
        if self.sequence_min_len <= self.sequence.window {
            return invalid(format!(
                "sequence_min_len {} must exceed sequence.window {} so at least one training pair exists",
                self.sequence_min_len, self.sequence.window
            ));
        }
        if self.sequence.hidden_units == 0 {
            return invalid("sequence.hidden_units must be at least 1".to_string());
        }
        for (name, rate) in [
            ("linear.learning_rate", self.linear.learning_rate),
            ("sequence.learning_rate", self.sequence.learning_rate),
        ] {
            if !rate.is_finite() || rate <= 0.0 {
                return invalid(format!("{} {} must be positive", name, rate));
            }
        }
        if self.seasonal.window == 0 || self.seasonal.season_length == 0 {
            return invalid("seasonal window and season_length must be positive".to_string());
        }
        if self.seasonal_min_len < self.seasonal.season_length {
            return invalid(format!(
                "seasonal_min_len {} is shorter than one season ({})",
                self.seasonal_min_len, self.seasonal.season_length
            ));
        }

        let stabilizer = &self.stabilizer;
        if stabilizer.trailing_window == 0 {
            return invalid("stabilizer.trailing_window must be at least 1".to_string());
        }
        if !stabilizer.upper_ratio.is_finite() || stabilizer.upper_ratio < 1.0 {
            return invalid(format!(
                "stabilizer.upper_ratio {} must be at least 1.0",
                stabilizer.upper_ratio
            ));
        }
        if !(0.0..=1.0).contains(&stabilizer.volatile_threshold_ratio)
            || stabilizer.volatile_floor_ratio < stabilizer.volatile_threshold_ratio
            || stabilizer.volatile_floor_ratio > stabilizer.upper_ratio
        {
            return invalid(format!(
                "volatile band must satisfy 0 <= threshold ({}) <= floor ({}) <= upper ({})",
                stabilizer.volatile_threshold_ratio,
                stabilizer.volatile_floor_ratio,
                stabilizer.upper_ratio
            ));
        }

        for (category, rule) in &self.overrides {
            rule.validate().map_err(|e| {
                ForecastError::InvalidConfig(format!("override for '{}': {}", category, e))
            })?;
        }

        if self.max_workers == Some(0) {
            return invalid("max_workers must be at least 1".to_string());
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ForecastConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}
