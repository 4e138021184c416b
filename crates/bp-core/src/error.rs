//! Error types for the directionality analysis

use thiserror::Error;

/// Analysis error type
#[derive(Error, Debug)]
pub enum Error {
    /// Validation error (bad configuration, mismatched binning, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Detector topology error (bad exclude list, out-of-grid neighbor query)
    #[error("Topology error: {0}")]
    Topology(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Histogram fit failed
    #[error("Fit error: {0}")]
    Fit(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
