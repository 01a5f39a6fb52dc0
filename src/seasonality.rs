use crate::error::{ForecastError, Result};
use crate::schema::{CategorySeries, SeasonalParams};
use crate::utils::mean;

/// Trend and year-over-year factor derived from a gap-filled monthly series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeasonalTrend {
    pub last_value: f64,
    /// Mean of the latest window minus mean of the window before it.
    pub trend: f64,
    /// Latest window mean over the same window one season earlier; 1.0 when unavailable.
    pub seasonal_factor: f64,
    pub season_length: usize,
}

impl SeasonalTrend {
    pub fn estimate(values: &[f64], params: SeasonalParams) -> Result<Self> {
        let n = values.len();
        let w = params.window;
        if w == 0 || n < 2 * w {
            return Err(ForecastError::InsufficientData {
                needed: 2 * w.max(1),
                got: n,
            });
        }

        let recent = mean(&values[n - w..]);
        let prior = mean(&values[n - 2 * w..n - w]);
        let trend = recent - prior;

        let seasonal_factor = match n.checked_sub(params.season_length + w) {
            Some(start) => {
                let year_ago = mean(&values[start..start + w]);
                if year_ago > 0.0 {
                    recent / year_ago
                } else {
                    1.0
                }
            }
            None => 1.0,
        };

        Ok(Self {
            last_value: values[n - 1],
            trend,
            seasonal_factor,
            season_length: params.season_length,
        })
    }

    /// Step `k` (1-based) is `last + trend * k`, scaled by the seasonal factor
    /// only when `k` lands on a season boundary.
    pub fn project(&self, horizon: usize) -> Vec<f64> {
        (1..=horizon)
            .map(|k| {
                let base = self.last_value + self.trend * k as f64;
                if self.season_length > 0 && k % self.season_length == 0 {
                    base * self.seasonal_factor
                } else {
                    base
                }
            })
            .collect()
    }
}

/// Seasonal/trend forecast over the series with missing months filled as zero.
pub fn seasonal_trend_forecast(
    series: &CategorySeries,
    params: SeasonalParams,
    horizon: usize,
) -> Result<Vec<f64>> {
    let values = series.contiguous_values();
    let model = SeasonalTrend::estimate(&values, params)?;
    Ok(model.project(horizon))
}
