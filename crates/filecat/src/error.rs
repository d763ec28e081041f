//! Error types for the catalog

use std::fmt;
use std::io;
use thiserror::Error;

/// Catalog error type
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Database error: {0}")]
    Database(#[from] filecat_db::BackendError),

    /// Lock contention that outlasted the internal retry budget.
    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl CatalogError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationErrors(vec![msg.into()]))
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// True for errors that a retry might clear.
    pub(crate) fn is_busy(&self) -> bool {
        matches!(self, CatalogError::Database(e) if e.is_busy())
    }
}

impl From<ValidationErrors> for CatalogError {
    fn from(errors: ValidationErrors) -> Self {
        CatalogError::Validation(errors)
    }
}

/// Every problem found while validating one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<String>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}

/// Why a condition tree could not be compiled or evaluated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("malformed expression at {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("unknown field '{field}' at {path}")]
    UnknownField { path: String, field: String },

    #[error("unknown operator '{op}' at {path}")]
    UnknownOperator { path: String, op: String },

    #[error("operator '{op}' is not supported for field '{field}' at {path}")]
    UnsupportedOperator {
        path: String,
        field: String,
        op: String,
    },

    #[error("invalid value for '{field} {op}' at {path}: {reason}")]
    InvalidValue {
        path: String,
        field: String,
        op: String,
        reason: String,
    },

    #[error("expression nested deeper than {max} levels")]
    TooDeep { max: usize },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CatalogError>;
