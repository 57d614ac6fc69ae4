//! Error types for hydronet

use thiserror::Error;

/// Main error type for network model operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invariant '{rule}' violated: {message}")]
    InvariantViolation { rule: &'static str, message: String },

    #[error("{kind} {id} is still referenced by links {links:?}")]
    InUse {
        kind: &'static str,
        id: String,
        links: Vec<String>,
    },

    #[error("ambiguous {what}: candidates {candidates:?}")]
    Ambiguous { what: String, candidates: Vec<String> },

    #[error("{quantity} for {kind} {id} could not be inferred")]
    Unassigned {
        quantity: &'static str,
        kind: &'static str,
        id: String,
    },

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("solver did not finish within {seconds} s")]
    Timeout { seconds: u64 },

    #[error("solver failed: {0}")]
    SolverFailure(String),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a missing entity.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for an invariant violation under a named rule.
    pub fn invariant(rule: &'static str, message: impl Into<String>) -> Self {
        Error::InvariantViolation {
            rule,
            message: message.into(),
        }
    }

    /// True for errors that mean "the referenced thing is absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Result type alias for hydronet operations
pub type Result<T> = std::result::Result<T, Error>;
