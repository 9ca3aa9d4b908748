//! Error types for the performance tuning workspace.

use thiserror::Error;

/// Main error type for the tuning libraries.
///
/// Trial failures are not errors: a benchmark run that exits non-zero or
/// produces no samples is recorded on the trial itself. This type covers
/// configuration problems and infrastructure failures only.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Execution provider name not recognised
    #[error("Provider {0} is not currently supported. Choose one of cpu_openmp, mklml, dnnl, cpu, tensorrt, ngraph, cuda or nuphar")]
    UnknownProvider(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Child process could not be driven
    #[error("Process error: {0}")]
    Process(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Specialized Result type for tuning operations.
pub type Result<T> = std::result::Result<T, Error>;
