use crate::schema::{CategorySeries, MonthKey, TransactionRecord};
use log::debug;
use std::collections::BTreeMap;

/// Per-category monthly series for one user, plus the month-aligned sum of all of them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonthlyHistory {
    categories: BTreeMap<String, CategorySeries>,
    total: CategorySeries,
}

impl MonthlyHistory {
    pub fn categories(&self) -> &BTreeMap<String, CategorySeries> {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&CategorySeries> {
        self.categories.get(name)
    }

    pub fn total(&self) -> &CategorySeries {
        &self.total
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Latest month with activity in any category.
    pub fn last_month(&self) -> Option<MonthKey> {
        self.total.last_month()
    }
}

pub struct MonthlyAggregator;

impl MonthlyAggregator {
    /// Buckets amounts by `(category, month)` and sums them. Categories with no
    /// records never appear; months absent from a category count as zero in Total.
    pub fn aggregate<'a, I>(records: I) -> MonthlyHistory
    where
        I: IntoIterator<Item = &'a TransactionRecord>,
    {
        let mut buckets: BTreeMap<String, BTreeMap<MonthKey, f64>> = BTreeMap::new();
        let mut total: BTreeMap<MonthKey, f64> = BTreeMap::new();
        let mut count = 0usize;

        for record in records {
            let month = record.month();
            *buckets
                .entry(record.category.clone())
                .or_default()
                .entry(month)
                .or_insert(0.0) += record.amount;
            count += 1;
        }

        for monthly in buckets.values() {
            for (month, amount) in monthly {
                *total.entry(*month).or_insert(0.0) += amount;
            }
        }

        let categories: BTreeMap<String, CategorySeries> = buckets
            .into_iter()
            .map(|(name, monthly)| (name, CategorySeries::from_monthly(monthly)))
            .collect();

        debug!(
            "Aggregated {} records into {} categories over {} months",
            count,
            categories.len(),
            total.len()
        );

        MonthlyHistory {
            categories,
            total: CategorySeries::from_monthly(total),
        }
    }
}

pub fn aggregate_monthly(records: &[TransactionRecord]) -> MonthlyHistory {
    MonthlyAggregator::aggregate(records)
}
