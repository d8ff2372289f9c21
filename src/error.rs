//! Error taxonomy shared by every store in the crate.

use thiserror::Error;

/// Core errors
#[derive(Error, Debug)]
pub enum CoreError {
    /// Required setting is missing (e.g. no roster link configured)
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Transport failure or non-success HTTP status
    #[error("Network error: {0}")]
    Network(String),
    /// Remote payload could not be parsed as a roster
    #[error("Data fetch error: {0}")]
    DataFetch(String),
    /// Rejected input (e.g. a dashboard link outside the allow-list)
    #[error("Validation error: {0}")]
    Validation(String),
    /// Disk I/O, serialization or decryption failure
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::Network(e.to_string())
    }
}

impl From<csv::Error> for CoreError {
    fn from(e: csv::Error) -> Self {
        CoreError::DataFetch(e.to_string())
    }
}
