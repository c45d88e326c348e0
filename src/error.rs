use serde::Serialize;
use thiserror::Error;

use crate::recovery::ErrorCategory;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, Serialize)]
pub enum Error {
    #[error("Dataset load failed: {0}")]
    Load(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Persistent store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Data corruption detected: {0}")]
    Corruption(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cache error in {cache}: {reason}")]
    Cache { cache: String, reason: String },

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Memory pressure: {0}")]
    MemoryPressure(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recovery failed: {0}")]
    Recovery(String),

    #[error("Component panicked: {0}")]
    Panic(String),

    #[error("Health alert: {0}")]
    HealthAlert(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Load(_) => -1,
            Error::Network(_) => -2,
            Error::Store(_) => -3,
            Error::Serialization(_) => -4,
            Error::Corruption(_) => -5,
            Error::Validation(_) => -6,
            Error::Cache { .. } => -7,
            Error::CircuitOpen(_) => -8,
            Error::MemoryPressure(_) => -9,
            Error::Initialization(_) => -10,
            Error::Timeout(_) => -11,
            Error::Config(_) => -12,
            Error::Recovery(_) => -13,
            Error::Panic(_) => -14,
            Error::HealthAlert(_) => -15,
            Error::Io(_) => -16,
            Error::Generic(_) => -99,
        }
    }

    /// Transient failures worth retrying with backoff.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Load(_)
                | Error::Network(_)
                | Error::Store(_)
                | Error::Timeout(_)
                | Error::Io(_)
                | Error::Cache { .. }
        )
    }

    /// Direct mapping from typed variants to a recovery category.
    ///
    /// Variants without an unambiguous mapping return `None` and are left to
    /// the message-pattern classifiers.
    pub fn category_hint(&self) -> Option<ErrorCategory> {
        match self {
            Error::Corruption(_) | Error::Serialization(_) => Some(ErrorCategory::DataCorruption),
            Error::Cache { .. } => Some(ErrorCategory::CacheFailure),
            Error::MemoryPressure(_) => Some(ErrorCategory::MemoryPressure),
            Error::Network(_) | Error::Timeout(_) => Some(ErrorCategory::NetworkFailure),
            Error::Initialization(_) | Error::Load(_) => Some(ErrorCategory::InitializationFailure),
            Error::Validation(_) => Some(ErrorCategory::ValidationFailure),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
