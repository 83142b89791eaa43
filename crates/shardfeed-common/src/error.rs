//! Error types for shardfeed-common

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared types
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid high-water mark: {0}")]
    InvalidWatermark(String),
}
