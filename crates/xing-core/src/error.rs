//! Error types for xing-core

use crate::store::StoreError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in xing-core
#[derive(Debug, Error)]
pub enum Error {
    /// One or more records failed validation; nothing was written
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// The resolution policy declined to pick values for a conflicted crossing
    #[error("conflict resolution aborted at crossing '{crossing}'")]
    ResolutionAborted { crossing: String },

    /// Crossings still hold disagreeing instances
    #[error("{count} crossing(s) still have conflicting instances; resolve them first")]
    Unresolved { count: usize },

    /// The document store failed during a pipeline stage
    #[error("document store failed during {stage}: {source}")]
    Store {
        stage: Stage,
        #[source]
        source: StoreError,
    },

    /// A user-initiated action referenced something that does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to interpret a CSV file
    #[error("failed to parse CSV '{path}': {message}")]
    CsvParse { path: PathBuf, message: String },

    /// CSV error from the csv crate
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Failed to parse the configuration file
    #[error("failed to parse config file '{path}': {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Directory traversal error
    #[error("failed to traverse directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn store(stage: Stage, source: StoreError) -> Self {
        Error::Store { stage, source }
    }
}

/// Pipeline stage at which a store failure surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scan,
    Apply,
    Sync,
    Insert,
    Delete,
    CreateTable,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Scan => "scan",
            Stage::Apply => "apply",
            Stage::Sync => "table sync",
            Stage::Insert => "insert",
            Stage::Delete => "delete",
            Stage::CreateTable => "table creation",
        };
        f.write_str(name)
    }
}

/// Attach a pipeline stage to a raw store result
pub(crate) trait StageExt<T> {
    fn at(self, stage: Stage) -> Result<T>;
}

impl<T> StageExt<T> for std::result::Result<T, StoreError> {
    fn at(self, stage: Stage) -> Result<T> {
        self.map_err(|e| Error::store(stage, e))
    }
}

/// A single validation problem, naming the record that triggered it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// Record at `index` has a blank crossing code
    EmptyCode { index: usize },
    /// Two records share the same crossing key
    DuplicateCode {
        code: String,
        first: usize,
        second: usize,
    },
    /// Lat or Long is neither empty nor a decimal number
    NonNumericCoordinate {
        crossing: String,
        field: &'static str,
        value: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyCode { index } => {
                write!(f, "record {} has an empty crossing code", index + 1)
            }
            ValidationIssue::DuplicateCode {
                code,
                first,
                second,
            } => write!(
                f,
                "duplicate crossing '{}' (records {} and {})",
                code,
                first + 1,
                second + 1
            ),
            ValidationIssue::NonNumericCoordinate {
                crossing,
                field,
                value,
            } => write!(f, "{} of crossing '{}' is not numeric: '{}'", field, crossing, value),
        }
    }
}

/// Every issue found in one validation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationIssue>);

impl ValidationErrors {
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", issue)?;
        }
        Ok(())
    }
}
