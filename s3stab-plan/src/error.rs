use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or normalizing a test plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plan file or directory could not be read.
    #[error("failed to read test plan {path:?}")]
    Io {
        /// The path that failed to read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        cause: std::io::Error,
    },

    /// The plan is not valid YAML.
    #[error("failed to parse test plan YAML")]
    Yaml(#[from] serde_yaml::Error),

    /// The top level of the plan is not a mapping of test names to tests.
    #[error("test plan must be a mapping of test names to test definitions")]
    NotAMapping,

    /// A test does not define `object_size`.
    #[error("test `{test}`: object_size is compulsory")]
    MissingObjectSize {
        /// Name of the offending test.
        test: String,
    },

    /// A required field other than `object_size` is absent.
    #[error("test `{test}`: missing field `{field}`")]
    MissingField {
        /// Name of the offending test.
        test: String,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A range was given as a mapping without both `start` and `end`.
    #[error("test `{test}`: define `{field}` range using start and end keys")]
    IncompleteRange {
        /// Name of the offending test.
        test: String,
        /// Name of the range field.
        field: &'static str,
    },

    /// A field has a YAML type that cannot be interpreted.
    #[error("test `{test}`: `{field}` must be {expected}")]
    InvalidValue {
        /// Name of the offending test.
        test: String,
        /// Name of the field.
        field: &'static str,
        /// Human readable description of the accepted forms.
        expected: &'static str,
    },

    /// A size expression could not be converted to bytes.
    #[error("invalid size expression `{0}`")]
    InvalidSize(String),

    /// A duration expression could not be converted.
    #[error("invalid duration expression `{0}`")]
    InvalidDuration(String),

    /// A part range allows more parts than S3 multipart uploads support.
    #[error("test `{test}`: part count {parts} exceeds the multipart limit of 10000")]
    TooManyParts {
        /// Name of the offending test.
        test: String,
        /// The largest part count the range allows.
        parts: u64,
    },
}

/// A convenience alias that defaults our [`PlanError`] type.
pub type Result<T, E = PlanError> = std::result::Result<T, E>;
