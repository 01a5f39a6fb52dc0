use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Invalid forecast horizon {0}: must be a positive number of months")]
    InvalidHorizon(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Skipping transaction record #{index}: {reason}")]
    RecordParse { index: usize, reason: String },

    #[error("Insufficient data: need at least {needed} observations, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Numeric instability during fit: {0}")]
    NumericInstability(String),

    #[error("Training for category '{category}' exceeded its deadline after {elapsed_ms} ms")]
    Timeout { category: String, elapsed_ms: u128 },

    #[error("Total mismatch at step {step}: Total ({total}) != sum of categories ({sum})")]
    TotalMismatch { step: usize, total: f64, sum: f64 },

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ForecastError {
    /// Errors a strategy may raise that the engine absorbs by falling back
    /// to a constant forecast instead of failing the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ForecastError::InsufficientData { .. }
                | ForecastError::NumericInstability(_)
                | ForecastError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
