//! Error types for habitat

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for habitat operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

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

    #[error("Grid mismatch for layer '{layer}': expected {expected}, got {actual}")]
    GridMismatch {
        layer: String,
        expected: String,
        actual: String,
    },

    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid configuration for '{key}': {reason}")]
    Configuration { key: String, reason: String },

    #[error("Water-year range {start}..={end} is outside the supported range {min}..={max}")]
    YearRange { start: i32, end: i32, min: i32, max: i32 },

    #[error("Missing input for {key}: {reason}")]
    MissingInput { key: String, reason: String },

    #[error("Schema mismatch in {context}: missing {missing:?}")]
    SchemaMismatch { context: String, missing: Vec<String> },

    #[error("Geometry error for '{id}': {reason}")]
    Geometry { id: String, reason: String },

    #[error("Output already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("Row count mismatch in {context}: expected {expected}, got {actual}")]
    RowCount {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate key '{key}' in {table}")]
    DuplicateKey { table: String, key: String },

    #[error("Invalid record in {table}: {reason}")]
    InvalidRecord { table: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Coarse classification of errors, used to decide whether a batch run
/// aborts or accumulates the failure into its summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    MissingInput,
    SchemaMismatch,
    Geometry,
    Io,
    Data,
}

impl Error {
    pub fn configuration(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Configuration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_input(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MissingInput {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn geometry(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Geometry {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. }
            | Error::YearRange { .. }
            | Error::UnsupportedCrs(_)
            | Error::OutputExists(_)
            | Error::Cancelled => ErrorKind::Configuration,
            Error::MissingInput { .. } => ErrorKind::MissingInput,
            Error::SchemaMismatch { .. }
            | Error::GridMismatch { .. }
            | Error::RowCount { .. }
            | Error::DuplicateKey { .. } => ErrorKind::SchemaMismatch,
            Error::Geometry { .. } => ErrorKind::Geometry,
            Error::Io(_) => ErrorKind::Io,
            _ => ErrorKind::Data,
        }
    }

    /// Whether a batch run may record this error and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::MissingInput | ErrorKind::Geometry)
    }
}

/// Result type alias for habitat operations
pub type Result<T> = std::result::Result<T, Error>;
