use crate::config::StabilizerConfig;
use crate::error::{ForecastError, Result};
use crate::schema::CategorySeries;
use crate::utils::{floor_to_precision, round_to_precision};
use log::debug;
use std::collections::BTreeMap;

/// Clamps raw forecasts against each category's trailing actual average.
pub struct Stabilizer<'a> {
    config: &'a StabilizerConfig,
    precision: u32,
}

impl<'a> Stabilizer<'a> {
    pub fn new(config: &'a StabilizerConfig, precision: u32) -> Self {
        Self { config, precision }
    }

    pub fn is_volatile(&self, category: &str) -> bool {
        self.config.volatile_categories.contains(category)
    }

    /// Caps every value at `upper_ratio` times the trailing average and, for
    /// volatile categories, lifts values under the threshold to the floor ratio.
    /// With a zero trailing average only the lower bound of 0 applies.
    /// Only clamped values are rounded; the rest pass through unchanged.
    pub fn stabilize(&self, category: &str, raw: &[f64], history: &CategorySeries) -> Vec<f64> {
        let average = history.trailing_average(self.config.trailing_window);
        let volatile = self.is_volatile(category);

        raw.iter()
            .map(|&value| {
                let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
                if average <= 0.0 {
                    return value;
                }

                let upper = self.config.upper_ratio * average;
                if value > upper {
                    debug!(
                        "{}: capping {:.2} at {:.2} ({}x trailing average {:.2})",
                        category, value, upper, self.config.upper_ratio, average
                    );
                    return floor_to_precision(upper, self.precision);
                }

                if volatile && value < self.config.volatile_threshold_ratio * average {
                    let floor = self.config.volatile_floor_ratio * average;
                    debug!(
                        "{}: lifting {:.2} to {:.2} (volatile category)",
                        category, value, floor
                    );
                    return round_to_precision(floor, self.precision);
                }

                value
            })
            .collect()
    }

    /// Index-wise sum of the already-stabilized category vectors.
    pub fn rebuild_total(
        &self,
        per_category: &BTreeMap<String, Vec<f64>>,
        horizon: usize,
    ) -> Vec<f64> {
        let mut total = vec![0.0; horizon];
        for values in per_category.values() {
            for (slot, value) in total.iter_mut().zip(values) {
                *slot += value;
            }
        }
        total
    }
}

/// Checks that `total[i]` equals the sum of every category at step `i`.
pub fn verify_total(
    per_category: &BTreeMap<String, Vec<f64>>,
    total: &[f64],
    tolerance: f64,
) -> Result<()> {
    for (step, &reported) in total.iter().enumerate() {
        let sum: f64 = per_category
            .values()
            .map(|values| values.get(step).copied().unwrap_or(0.0))
            .sum();
        if (reported - sum).abs() > tolerance {
            return Err(ForecastError::TotalMismatch {
                step,
                total: reported,
                sum,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MonthKey;

    fn history(values: &[f64]) -> CategorySeries {
        CategorySeries::from_values(MonthKey::new(2024, 1).unwrap(), values)
    }

    #[test]
    fn test_caps_at_upper_ratio() {
        let config = StabilizerConfig::default();
        let stabilizer = Stabilizer::new(&config, 0);
        // Trailing average of the last three months is 515; cap is 772.5.
        let out = stabilizer.stabilize(
            "Food",
            &[519.0, 900.0, -20.0],
            &history(&[500.0, 520.0, 510.0, 530.0, 505.0]),
        );
        assert_eq!(out, vec![519.0, 772.0, 0.0]);
    }

    #[test]
    fn test_unclamped_values_keep_their_precision() {
        let config = StabilizerConfig::default();
        let stabilizer = Stabilizer::new(&config, 0);

        let out = stabilizer.stabilize("Gift", &[12.5, 12.5], &history(&[12.5]));
        assert_eq!(out, vec![12.5, 12.5]);

        let out = stabilizer.stabilize("Coffee", &[9.99], &history(&[9.99, 9.99, 9.99]));
        assert_eq!(out, vec![9.99]);
    }

    #[test]
    fn test_total_of_fractional_categories_is_exact() {
        let config = StabilizerConfig::default();
        let stabilizer = Stabilizer::new(&config, 0);

        let mut per_category = BTreeMap::new();
        per_category.insert("Coffee".to_string(), vec![9.99]);
        per_category.insert("Gift".to_string(), vec![12.5]);

        let total = stabilizer.rebuild_total(&per_category, 1);
        assert!((total[0] - 22.49).abs() < 1e-9);
        assert!(verify_total(&per_category, &total, 0.0).is_ok());
    }

    #[test]
    fn test_volatile_categories_are_lifted() {
        let config = StabilizerConfig {
            volatile_categories: ["Entertainment".to_string()].into_iter().collect(),
            ..StabilizerConfig::default()
        };
        let stabilizer = Stabilizer::new(&config, 0);
        let past = history(&[400.0, 400.0, 400.0]);

        assert_eq!(
            stabilizer.stabilize("Entertainment", &[10.0, 250.0], &past),
            vec![300.0, 250.0]
        );
        // Non-volatile categories keep low values.
        assert_eq!(stabilizer.stabilize("Food", &[10.0], &past), vec![10.0]);
    }

    #[test]
    fn test_zero_average_only_floors_at_zero() {
        let config = StabilizerConfig::default();
        let stabilizer = Stabilizer::new(&config, 0);
        let out = stabilizer.stabilize("Gift", &[5000.0, -3.0], &history(&[100.0, 0.0, 0.0, 0.0]));
        assert_eq!(out, vec![5000.0, 0.0]);
    }

    #[test]
    fn test_rebuild_and_verify_total() {
        let config = StabilizerConfig::default();
        let stabilizer = Stabilizer::new(&config, 0);

        let mut per_category = BTreeMap::new();
        per_category.insert("Food".to_string(), vec![500.0, 510.0]);
        per_category.insert("Rent".to_string(), vec![1000.0, 1000.0]);

        let total = stabilizer.rebuild_total(&per_category, 2);
        assert_eq!(total, vec![1500.0, 1510.0]);
        assert!(verify_total(&per_category, &total, 0.0).is_ok());
        assert!(verify_total(&per_category, &[1500.0, 1600.0], 0.5).is_err());
    }

    #[test]
    fn test_empty_total_is_zero_per_step() {
        let config = StabilizerConfig::default();
        let stabilizer = Stabilizer::new(&config, 0);
        assert_eq!(stabilizer.rebuild_total(&BTreeMap::new(), 3), vec![0.0, 0.0, 0.0]);
    }
}
