//! Trainable forecasting models.
//!
//! A model is built fresh for one category, trained, asked for its forecast and
//! dropped; nothing is cached between categories or runs.

pub mod linear;
pub mod sequence;

use crate::config::ForecastConfig;
use crate::error::{ForecastError, Result};
use crate::schema::ModelKind;
use std::time::{Duration, Instant};

pub use linear::{LinearModel, LinearRegressor, TrainedLinearModel};
pub use sequence::{SequenceModel, TrainedSequenceModel};

/// Training budget for one category. Models poll it once per epoch.
#[derive(Debug, Clone)]
pub struct Deadline {
    category: String,
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(category: impl Into<String>, limit: Option<Duration>) -> Self {
        Self {
            category: category.into(),
            started: Instant::now(),
            limit,
        }
    }

    pub fn unlimited() -> Self {
        Self::new("", None)
    }

    pub fn check(&self) -> Result<()> {
        if let Some(limit) = self.limit {
            let elapsed = self.started.elapsed();
            if elapsed >= limit {
                return Err(ForecastError::Timeout {
                    category: self.category.clone(),
                    elapsed_ms: elapsed.as_millis(),
                });
            }
        }
        Ok(())
    }
}

pub trait ForecastModel {
    type Trained: TrainedModel;

    fn train(&self, values: &[f64], deadline: &Deadline) -> Result<Self::Trained>;

    fn name(&self) -> &str;
}

pub trait TrainedModel {
    /// Raw predictions for the next `horizon` months, before flooring or rounding.
    fn forecast(&self, horizon: usize, deadline: &Deadline) -> Result<Vec<f64>>;
}

/// Builds the requested model, trains it on `values` and returns its raw forecast.
/// The model is dropped before returning.
pub fn fit_and_forecast(
    kind: ModelKind,
    values: &[f64],
    horizon: usize,
    config: &ForecastConfig,
    deadline: &Deadline,
) -> Result<Vec<f64>> {
    match kind {
        ModelKind::Linear => run(
            &LinearModel::new(config.linear.clone()),
            values,
            horizon,
            deadline,
        ),
        ModelKind::Sequence => run(
            &SequenceModel::new(config.sequence.clone()),
            values,
            horizon,
            deadline,
        ),
    }
}

fn run<M: ForecastModel>(
    model: &M,
    values: &[f64],
    horizon: usize,
    deadline: &Deadline,
) -> Result<Vec<f64>> {
    let trained = model.train(values, deadline)?;
    let forecast = trained.forecast(horizon, deadline)?;

    if let Some(bad) = forecast.iter().find(|v| !v.is_finite()) {
        return Err(ForecastError::NumericInstability(format!(
            "{} produced a non-finite prediction ({})",
            model.name(),
            bad
        )));
    }

    Ok(forecast)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_deadline_never_expires() {
        assert!(Deadline::unlimited().check().is_ok());
    }

    #[test]
    fn test_zero_deadline_expires_immediately() {
        let deadline = Deadline::new("Food", Some(Duration::ZERO));
        match deadline.check() {
            Err(ForecastError::Timeout { category, .. }) => assert_eq!(category, "Food"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_fit_and_forecast_times_out_trainable_models() {
        let config = ForecastConfig::default();
        let deadline = Deadline::new("Food", Some(Duration::ZERO));
        let values = [10.0, 20.0, 15.0, 30.0, 25.0];

        for kind in [ModelKind::Linear, ModelKind::Sequence] {
            let result = fit_and_forecast(kind, &values, 3, &config, &deadline);
            assert!(matches!(result, Err(ForecastError::Timeout { .. })));
        }
    }
}
