use crate::error::{ForecastError, Result};
use crate::schema::{RawAmount, RawTransaction, TransactionRecord};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

/// Delimiter used by the expense export files (`amount;category;date;...`).
pub const DEFAULT_CSV_DELIMITER: u8 = b';';

/// One row of an expense export. Columns beyond these are ignored.
#[derive(Debug, Clone, Deserialize)]
struct CsvExpenseRow {
    amount: String,
    category: String,
    date: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "userId", alias = "user_id")]
    user_id: Option<String>,
}

impl From<CsvExpenseRow> for RawTransaction {
    fn from(row: CsvExpenseRow) -> Self {
        RawTransaction {
            category: row.category,
            amount: RawAmount::Text(row.amount),
            date: row.date,
            user_id: row.user_id.filter(|u| !u.trim().is_empty()),
            description: row.description.filter(|d| !d.trim().is_empty()),
        }
    }
}

/// Converts raw feed entries into validated records.
/// A malformed entry is dropped with a warning; the rest still aggregate.
pub fn parse_raw_records(raw: &[RawTransaction]) -> Vec<TransactionRecord> {
    let mut records = Vec::with_capacity(raw.len());

    for (index, entry) in raw.iter().enumerate() {
        match entry.parse() {
            Ok(record) => records.push(record),
            Err(e) => {
                let warning = ForecastError::RecordParse {
                    index,
                    reason: record_failure_reason(e),
                };
                warn!("{}", warning);
            }
        }
    }

    debug!(
        "Parsed {} of {} transaction records",
        records.len(),
        raw.len()
    );
    records
}

fn record_failure_reason(error: ForecastError) -> String {
    match error {
        ForecastError::RecordParse { reason, .. } => reason,
        other => other.to_string(),
    }
}

/// Keeps only the entries belonging to `user_id`.
pub fn filter_user(raw: &[RawTransaction], user_id: &str) -> Vec<RawTransaction> {
    raw.iter()
        .filter(|entry| entry.user_id.as_deref() == Some(user_id))
        .cloned()
        .collect()
}

/// Drops exact repeats of an earlier entry (same user, date, amount, category
/// and description), keeping the first occurrence.
pub fn dedup_transactions(raw: Vec<RawTransaction>) -> Vec<RawTransaction> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(raw.len());

    for entry in raw {
        let amount_key = match entry.amount.to_f64() {
            Some(amount) => format!("{}", amount),
            None => format!("{:?}", entry.amount),
        };
        let key = (
            entry.user_id.clone(),
            entry.date.trim().to_string(),
            amount_key,
            entry.category.trim().to_string(),
            entry.description.clone(),
        );
        if seen.insert(key) {
            unique.push(entry);
        } else {
            debug!(
                "Skipped duplicate: {} {:?} on {}",
                entry.category, entry.amount, entry.date
            );
        }
    }

    unique
}

/// Parses a JSON array of `{category, amount, date}` objects.
pub fn parse_json_feed(json: &str) -> Result<Vec<TransactionRecord>> {
    let raw: Vec<RawTransaction> = serde_json::from_str(json)?;
    Ok(parse_raw_records(&raw))
}

/// Reads an expense export with a header row. Rows that fail to deserialize are
/// skipped with a warning; I/O failures abort the read.
pub fn read_transactions_csv<R: Read>(reader: R, delimiter: u8) -> Result<Vec<RawTransaction>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut raw = Vec::new();
    for (index, row) in csv_reader.deserialize::<CsvExpenseRow>().enumerate() {
        match row {
            Ok(row) => raw.push(RawTransaction::from(row)),
            Err(e) if e.is_io_error() => return Err(ForecastError::Csv(e)),
            Err(e) => {
                let warning = ForecastError::RecordParse {
                    index,
                    reason: e.to_string(),
                };
                warn!("{}", warning);
            }
        }
    }

    Ok(dedup_transactions(raw))
}

/// Loads an expense export from disk and returns the records that parse.
pub fn load_transactions_csv(
    path: impl AsRef<Path>,
    delimiter: u8,
) -> Result<Vec<TransactionRecord>> {
    let file = std::fs::File::open(path)?;
    let raw = read_transactions_csv(file, delimiter)?;
    Ok(parse_raw_records(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const EXPORT: &str = "amount;category;date;description;paymentMethod;userId
120;Food;2024-01-03;lunch;cash;u1
10000;Rent;2024-01-05;january rent;bkash;u1
120;Food;2024-01-03;lunch;cash;u1
abc;Food;2024-01-04;bad amount;cash;u1
75;Transportation;2024-13-01;bad date;cash;u1
60;Food;2024-02-10;dinner;cash;u2
";

    #[test]
    fn test_parse_raw_records_skips_malformed_entries() {
        let raw = vec![
            RawTransaction::new("Food", 100.0, "2024-01-15"),
            RawTransaction::new("Food", 50.0, "not-a-date"),
            RawTransaction::new("", 10.0, "2024-01-15"),
            RawTransaction::new("Food", -5.0, "2024-01-15"),
            RawTransaction::new("Rent", 1000.0, "2024-02-01"),
        ];

        let records = parse_raw_records(&raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(records[1].category, "Rent");
    }

    #[test]
    fn test_read_csv_export_dedups_and_keeps_bad_rows_for_parsing() {
        let raw = read_transactions_csv(EXPORT.as_bytes(), DEFAULT_CSV_DELIMITER).unwrap();
        // The repeated lunch row is dropped at read time.
        assert_eq!(raw.len(), 5);

        let records = parse_raw_records(&raw);
        // Bad amount and bad date rows are dropped at parse time.
        assert_eq!(records.len(), 3);
        let total: f64 = records.iter().map(|r| r.amount).sum();
        assert_eq!(total, 10180.0);
    }

    #[test]
    fn test_filter_user() {
        let raw = read_transactions_csv(EXPORT.as_bytes(), DEFAULT_CSV_DELIMITER).unwrap();
        let mine = filter_user(&raw, "u2");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].category, "Food");
    }

    #[test]
    fn test_csv_with_comma_delimiter_and_minimal_columns() {
        let data = "date,category,amount\n2024-03-01,Healthcare,300\n2024-03-09,Healthcare,200.5\n";
        let raw = read_transactions_csv(data.as_bytes(), b',').unwrap();
        let records = parse_raw_records(&raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].amount, 200.5);
    }

    #[test]
    fn test_parse_json_feed() {
        let json = r#"[
            {"category": "Food", "amount": 500, "date": "2024-01-02"},
            {"category": "Food", "amount": 20, "date": "2024-01-32"}
        ]"#;
        let records = parse_json_feed(json).unwrap();
        assert_eq!(records.len(), 1);

        assert!(parse_json_feed("{not json").is_err());
    }
}
