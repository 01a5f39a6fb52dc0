use crate::config::ForecastConfig;
use crate::schema::{ForecastMode, ForecastStrategy, ModelKind};
use crate::utils::mean;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A forced strategy for one named category, taking precedence over the
/// length/mode ladder but not over the short-series and constant-series rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CategoryOverride {
    /// Always repeat the last observed month (fixed bills such as rent).
    LastValue,

    /// Blend of the recent mean and the value observed one year before the
    /// next month. Without a year-ago observation the recent mean is used alone.
    RecentYearBlend {
        #[schemars(description = "Weight of the recent mean, between 0.0 and 1.0")]
        recent_weight: f64,
        #[serde(default = "default_recent_window")]
        #[schemars(description = "Number of trailing months in the recent mean")]
        recent_window: usize,
    },

    /// Pin the category to a specific mode regardless of the request.
    Mode { mode: ForecastMode },
}

fn default_recent_window() -> usize {
    3
}

impl CategoryOverride {
    /// Resolves the override against a gap-filled monthly series.
    /// Returns `None` when the pinned mode does not apply to this series length,
    /// so the caller continues down the ladder. Pinned modes use the same
    /// minimum observed lengths as the ladder.
    pub fn resolve(
        &self,
        contiguous: &[f64],
        observed_len: usize,
        config: &ForecastConfig,
    ) -> Option<ForecastStrategy> {
        let seasonal = config.seasonal;
        match self {
            CategoryOverride::LastValue => contiguous
                .last()
                .map(|&last| ForecastStrategy::Passthrough(last)),
            CategoryOverride::RecentYearBlend {
                recent_weight,
                recent_window,
            } => {
                let start = contiguous.len().saturating_sub(*recent_window);
                let recent = mean(&contiguous[start..]);
                // The next month sits at index len; a year earlier is len - season_length.
                let year_ago = contiguous
                    .len()
                    .checked_sub(seasonal.season_length)
                    .and_then(|idx| contiguous.get(idx).copied());
                let value = match year_ago {
                    Some(past) => recent_weight * recent + (1.0 - recent_weight) * past,
                    None => recent,
                };
                Some(ForecastStrategy::ConstantRepeat(value))
            }
            CategoryOverride::Mode { mode } => match mode {
                ForecastMode::Auto => None,
                ForecastMode::Linear => Some(ForecastStrategy::Regression(ModelKind::Linear)),
                ForecastMode::Sequence if observed_len >= config.sequence_min_len => {
                    Some(ForecastStrategy::Regression(ModelKind::Sequence))
                }
                ForecastMode::Seasonal if observed_len >= config.seasonal_min_len => {
                    Some(ForecastStrategy::SeasonalTrend(seasonal))
                }
                _ => None,
            },
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if let CategoryOverride::RecentYearBlend {
            recent_weight,
            recent_window,
        } = self
        {
            if !(0.0..=1.0).contains(recent_weight) {
                return Err(format!(
                    "recent_weight {} must be between 0.0 and 1.0",
                    recent_weight
                ));
            }
            if *recent_window == 0 {
                return Err("recent_window must be at least 1".to_string());
            }
        }
        Ok(())
    }
}
