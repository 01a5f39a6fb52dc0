use crate::error::{ForecastError, Result};
use crate::schema::MonthKey;
use chrono::NaiveDate;

/// Parses a transaction date in `YYYY-MM-DD` format.
pub fn parse_transaction_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|_| {
        ForecastError::DateError(format!(
            "Invalid transaction date: '{}'. Expected YYYY-MM-DD",
            date
        ))
    })
}

/// The `count` months that follow `last`.
pub fn months_after(last: MonthKey, count: usize) -> Vec<MonthKey> {
    let mut months = Vec::with_capacity(count);
    let mut current = last;
    for _ in 0..count {
        current = current.next();
        months.push(current);
    }
    months
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn round_to_precision(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

pub fn floor_to_precision(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).floor() / factor
}

/// Clamps a raw model output to a non-negative amount at currency precision.
pub fn to_amount(value: f64, precision: u32) -> f64 {
    round_to_precision(value.max(0.0), precision)
}

pub fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transaction_date() {
        assert_eq!(
            parse_transaction_date("2024-02-29").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(parse_transaction_date("2023-02-29").is_err());
        assert!(parse_transaction_date("15/03/2024").is_err());
        assert!(parse_transaction_date("").is_err());
    }

    #[test]
    fn test_months_after_crosses_year_boundary() {
        let last = MonthKey::new(2023, 11).unwrap();
        let months = months_after(last, 3);
        assert_eq!(
            months,
            vec![
                MonthKey::new(2023, 12).unwrap(),
                MonthKey::new(2024, 1).unwrap(),
                MonthKey::new(2024, 2).unwrap(),
            ]
        );
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(round_to_precision(519.4999, 0), 519.0);
        assert_eq!(round_to_precision(12.346, 2), 12.35);
        assert_eq!(floor_to_precision(772.5, 0), 772.0);
        assert_eq!(to_amount(-15.2, 0), 0.0);
        assert_eq!(to_amount(15.6, 0), 16.0);
    }

    #[test]
    fn test_mean_of_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
    }
}
