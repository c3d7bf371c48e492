//! Library error type
//!
//! Every fallible operation of the forecasting pipeline returns [`ForecastError`].
//! The binary edge wraps these in `anyhow`, the HTTP edge maps them to `ApiError`.

use thiserror::Error;

use crate::domain::Category;

#[derive(Debug, Error)]
pub enum ForecastError {
    /// Not enough records or windows for the requested lookback
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// No saved model or metadata for the category
    #[error("No saved model for {0}. Train or load a model first.")]
    MissingArtifacts(Category),

    /// A model exists but has not been confirmed and loaded yet
    #[error("The saved {0} model is staged but not loaded")]
    ModelNotActive(Category),

    /// Incompatible tensor shapes or weight buffers
    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    #[error("Training cancelled")]
    Cancelled,

    #[error("Training is already running for {0}")]
    TrainingInProgress(Category),

    #[error("Model package rejected: {0}")]
    InvalidPackage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl ForecastError {
    pub fn insufficient(message: impl Into<String>) -> Self {
        Self::InsufficientData(message.into())
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape(message.into())
    }

    /// Cancellation is a normal early exit, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<tokio::task::JoinError> for ForecastError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_category() {
        let err = ForecastError::MissingArtifacts(Category::CivilStatus);
        assert!(err.to_string().contains("Civil Status"));

        let err = ForecastError::TrainingInProgress(Category::Sex);
        assert_eq!(err.to_string(), "Training is already running for Sex");
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(ForecastError::Cancelled.is_cancelled());
        assert!(!ForecastError::insufficient("x").is_cancelled());
    }
}
