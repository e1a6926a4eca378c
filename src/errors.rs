//! Errors
//!
//! Custom error types used throughout the `peatflux` crate.
use thiserror::Error;

/// Errors that can occur while loading data, selecting features or resampling.
#[derive(Debug, Error)]
pub enum PeatfluxError {
    /// A column required by the schema is not in the input table.
    #[error("Column {0} is required by the schema, but it is missing from the input table.")]
    MissingColumn(String),
    /// The input table has a column the schema does not know about.
    #[error("Column {0} is not part of the configured schema.")]
    UnexpectedColumn(String),
    /// A cell could not be interpreted for its column role.
    #[error("Invalid value {value:?} in column {column} at row {row}.")]
    InvalidValue { column: String, row: usize, value: String },
    /// Week number outside of the ISO week range.
    #[error("Week number {week} at row {row} is outside of 1..=53.")]
    InvalidWeek { row: usize, week: i64 },
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// Invalid value parsing.
    #[error("Invalid value {0} passed for {1}, expected one of {2}.")]
    ParseString(String, String, String),
    /// A feature name that is not in the table or the configured universe.
    #[error("Feature {0} is not part of the feature universe.")]
    UnknownFeature(String),
    /// Randomized procedure started without an explicit seed.
    #[error("No seed was provided for {0}, randomized procedures need an explicit seed.")]
    MissingSeed(String),
    /// Unable to read a file.
    #[error("Unable to read {0}")]
    UnableToRead(String),
    /// Unable to write a file.
    #[error("Unable to write {0}")]
    UnableToWrite(String),
    /// A train, test or fold partition has no rows.
    #[error("The {0} partition has no rows.")]
    EmptyPartition(String),
    /// No variance in a feature of the training partition.
    #[error("Feature {0} has no variance in the training partition.")]
    NoVariance(String),
    /// A score or prediction came out as NaN or infinite.
    #[error("Non-finite {0} encountered.")]
    NonFiniteScore(String),
    /// The global stop signal was raised.
    #[error("Run interrupted by the stop signal after {0} completed iterations.")]
    Interrupted(usize),
}

impl PeatfluxError {
    /// Errors that only invalidate the current fold or iteration. Everything
    /// else is a configuration problem and stops the whole run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PeatfluxError::EmptyPartition(_) | PeatfluxError::NoVariance(_) | PeatfluxError::NonFiniteScore(_)
        )
    }
}
