//! Common error types for HXP

use thiserror::Error;

/// Common result type for HXP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across HXP services
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Feature schema definition is inconsistent
    #[error("Schema error: {0}")]
    Schema(String),
}
