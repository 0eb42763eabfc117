use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum AppError {
    /// Incremental sync requested for a key with no stored bars.
    #[error("Not onboarded: {0} has no stored bars, use a bulk download first")]
    NotOnboarded(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Nothing is missing. A no-op signal, not a failure.
    #[error("Range empty: nothing to fetch")]
    RangeEmpty,

    /// Uniqueness violation raced by a concurrent writer. Benign.
    #[error("Store conflict: {0}")]
    StoreConflict(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl AppError {
    /// True for outcomes callers should treat as a no-op rather than a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, AppError::RangeEmpty | AppError::StoreConflict(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::StoreConflict(db.message().to_string())
            }
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest embeds the request URL in its messages; the URL carries the API key
        AppError::ProviderUnavailable(err.without_url().to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

// Alias for convenience
pub type Error = AppError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_errors() {
        assert!(AppError::RangeEmpty.is_benign());
        assert!(AppError::StoreConflict("dup".to_string()).is_benign());
        assert!(!AppError::NotOnboarded("AAPL 1d".to_string()).is_benign());
        assert!(!AppError::ProviderUnavailable("503".to_string()).is_benign());
    }

    #[test]
    fn test_not_onboarded_message_points_to_bulk_path() {
        let err = AppError::NotOnboarded("AAPL 1m".to_string());
        assert!(err.to_string().contains("bulk download"));
    }
}
