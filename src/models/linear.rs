use super::{Deadline, ForecastModel, TrainedModel};
use crate::config::{LinearModelConfig, MultiStepMode};
use crate::error::{ForecastError, Result};
use crate::utils::{all_finite, mean};

/// A single-input linear unit (`y = slope * x + intercept`) trained by
/// full-batch gradient descent on mean squared error. Inputs and targets are
/// standardised first so a fixed learning rate converges for any amount scale.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegressor {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearRegressor {
    pub fn fit(
        xs: &[f64],
        ys: &[f64],
        epochs: usize,
        learning_rate: f64,
        deadline: &Deadline,
    ) -> Result<Self> {
        if xs.len() != ys.len() || xs.len() < 2 {
            return Err(ForecastError::InsufficientData {
                needed: 2,
                got: xs.len().min(ys.len()),
            });
        }
        deadline.check()?;

        let n = xs.len() as f64;
        let x_mean = mean(xs);
        let y_mean = mean(ys);
        let x_std = (xs.iter().map(|x| (x - x_mean).powi(2)).sum::<f64>() / n).sqrt();
        let y_std = (ys.iter().map(|y| (y - y_mean).powi(2)).sum::<f64>() / n).sqrt();

        if x_std == 0.0 || !x_std.is_finite() {
            return Err(ForecastError::NumericInstability(
                "time index has no spread".to_string(),
            ));
        }
        let y_std = if y_std > 0.0 { y_std } else { 1.0 };

        let xs_n: Vec<f64> = xs.iter().map(|x| (x - x_mean) / x_std).collect();
        let ys_n: Vec<f64> = ys.iter().map(|y| (y - y_mean) / y_std).collect();

        let mut w = 0.0;
        let mut b = 0.0;
        for _ in 0..epochs {
            deadline.check()?;

            let mut grad_w = 0.0;
            let mut grad_b = 0.0;
            for (x, y) in xs_n.iter().zip(&ys_n) {
                let err = w * x + b - y;
                grad_w += err * x;
                grad_b += err;
            }
            w -= learning_rate * 2.0 * grad_w / n;
            b -= learning_rate * 2.0 * grad_b / n;
        }

        let slope = w * y_std / x_std;
        let intercept = y_mean + b * y_std - slope * x_mean;

        if !slope.is_finite() || !intercept.is_finite() {
            return Err(ForecastError::NumericInstability(format!(
                "linear fit diverged (slope {}, intercept {})",
                slope, intercept
            )));
        }

        Ok(Self { slope, intercept })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    config: LinearModelConfig,
}

impl LinearModel {
    pub fn new(config: LinearModelConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Clone)]
pub struct TrainedLinearModel {
    config: LinearModelConfig,
    regressor: LinearRegressor,
    history: Vec<f64>,
}

impl TrainedLinearModel {
    pub fn regressor(&self) -> &LinearRegressor {
        &self.regressor
    }
}

fn time_index(len: usize) -> Vec<f64> {
    (0..len).map(|i| i as f64).collect()
}

impl ForecastModel for LinearModel {
    type Trained = TrainedLinearModel;

    fn train(&self, values: &[f64], deadline: &Deadline) -> Result<TrainedLinearModel> {
        if !all_finite(values) {
            return Err(ForecastError::NumericInstability(
                "series contains non-finite values".to_string(),
            ));
        }

        let regressor = LinearRegressor::fit(
            &time_index(values.len()),
            values,
            self.config.epochs,
            self.config.learning_rate,
            deadline,
        )?;

        Ok(TrainedLinearModel {
            config: self.config.clone(),
            regressor,
            history: values.to_vec(),
        })
    }

    fn name(&self) -> &str {
        "linear"
    }
}

impl TrainedModel for TrainedLinearModel {
    fn forecast(&self, horizon: usize, deadline: &Deadline) -> Result<Vec<f64>> {
        let len = self.history.len();

        match self.config.multi_step {
            MultiStepMode::Direct => Ok((0..horizon)
                .map(|step| self.regressor.predict((len + step) as f64))
                .collect()),
            MultiStepMode::Recursive => {
                let mut window = self.history.clone();
                let mut regressor = self.regressor.clone();
                let mut forecasts = Vec::with_capacity(horizon);

                for step in 0..horizon {
                    if step > 0 {
                        regressor = LinearRegressor::fit(
                            &time_index(window.len()),
                            &window,
                            self.config.epochs,
                            self.config.learning_rate,
                            deadline,
                        )?;
                    }
                    let next = regressor.predict(window.len() as f64);
                    forecasts.push(next);
                    window.push(next);
                }

                Ok(forecasts)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train(values: &[f64], multi_step: MultiStepMode) -> TrainedLinearModel {
        let config = LinearModelConfig {
            multi_step,
            ..LinearModelConfig::default()
        };
        LinearModel::new(config)
            .train(values, &Deadline::unlimited())
            .unwrap()
    }

    #[test]
    fn test_fit_recovers_exact_line() {
        let trained = train(&[10.0, 20.0, 30.0, 40.0], MultiStepMode::Direct);
        let regressor = trained.regressor();
        assert!((regressor.slope - 10.0).abs() < 1e-6);
        assert!((regressor.intercept - 10.0).abs() < 1e-6);

        let forecast = trained.forecast(2, &Deadline::unlimited()).unwrap();
        assert!((forecast[0] - 50.0).abs() < 1e-6);
        assert!((forecast[1] - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_noisy_series_matches_least_squares() {
        // Least squares over x = 0..4: slope 2, intercept 509, next value 519.
        let trained = train(&[500.0, 520.0, 510.0, 530.0, 505.0], MultiStepMode::Direct);
        let forecast = trained.forecast(1, &Deadline::unlimited()).unwrap();
        assert!((forecast[0] - 519.0).abs() < 1e-3, "got {}", forecast[0]);
    }

    #[test]
    fn test_recursive_agrees_with_direct_on_linear_data() {
        let values = [100.0, 140.0, 130.0, 170.0, 160.0, 200.0];
        let direct = train(&values, MultiStepMode::Direct)
            .forecast(3, &Deadline::unlimited())
            .unwrap();
        let recursive = train(&values, MultiStepMode::Recursive)
            .forecast(3, &Deadline::unlimited())
            .unwrap();

        assert_eq!(recursive.len(), 3);
        for (d, r) in direct.iter().zip(&recursive) {
            assert!((d - r).abs() < 1e-3, "direct {} vs recursive {}", d, r);
        }
    }

    #[test]
    fn test_downward_trend_can_go_negative_before_flooring() {
        let trained = train(&[300.0, 200.0, 100.0], MultiStepMode::Direct);
        let forecast = trained.forecast(2, &Deadline::unlimited()).unwrap();
        assert!(forecast[0].abs() < 1e-6);
        assert!(forecast[1] < 0.0);
    }

    #[test]
    fn test_rejects_non_finite_input() {
        let result = LinearModel::new(LinearModelConfig::default())
            .train(&[1.0, f64::INFINITY, 3.0], &Deadline::unlimited());
        assert!(matches!(result, Err(ForecastError::NumericInstability(_))));
    }

    #[test]
    fn test_single_point_is_insufficient() {
        let result = LinearRegressor::fit(&[0.0], &[5.0], 10, 0.1, &Deadline::unlimited());
        assert!(matches!(result, Err(ForecastError::InsufficientData { .. })));
    }
}
