//! Error types for the Kolosal serving runtime

use thiserror::Error;

/// Result type alias for serving operations
pub type Result<T> = std::result::Result<T, ServingError>;

/// Main error type for the serving runtime
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServingError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Version not found: {model_id}@{version}")]
    VersionNotFound { model_id: String, version: String },

    #[error("No model available for: {0}")]
    NoModelAvailable(String),

    #[error("Prediction failed: {0}")]
    PredictionFailed(String),

    #[error("Prediction timed out after {timeout_ms} ms on {model_id}@{version}")]
    Timeout {
        model_id: String,
        version: String,
        timeout_ms: u64,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ServingError {
    fn from(err: serde_json::Error) -> Self {
        ServingError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ServingError {
    fn from(err: ndarray::ShapeError) -> Self {
        ServingError::InvalidInput(err.to_string())
    }
}
