//! Error types for the NCDB core library.

#[cfg(feature = "python")]
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::PyErr;

/// Top-level error enum for the NCDB core library.
///
/// Codec failures (`TruncatedInput`, `UnsupportedVersion`, `IndexOutOfRange`,
/// `InvalidData`) abort the whole decode; nothing partially decoded is handed
/// back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum NcdbError {
    #[error("Truncated input: {0}")]
    TruncatedInput(String),

    #[error("Unsupported {member} version: {version}")]
    UnsupportedVersion { member: String, version: u64 },

    #[error("Schema mismatch: expected {expected} counts, got {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: u64,
        len: usize,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Missing container member: {0}")]
    MissingMember(String),

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl NcdbError {
    pub(crate) fn truncated(context: &str) -> Self {
        NcdbError::TruncatedInput(context.to_string())
    }

    pub(crate) fn unsupported(member: &str, version: u64) -> Self {
        NcdbError::UnsupportedVersion {
            member: member.to_string(),
            version,
        }
    }
}

#[cfg(feature = "python")]
impl From<NcdbError> for PyErr {
    fn from(err: NcdbError) -> PyErr {
        match &err {
            NcdbError::Sqlite(_) | NcdbError::Merge(_) => PyRuntimeError::new_err(err.to_string()),
            NcdbError::SchemaMismatch { .. } => PyRuntimeError::new_err(err.to_string()),
            NcdbError::Io(_) | NcdbError::Zip(_) => PyIOError::new_err(err.to_string()),
            NcdbError::TruncatedInput(_)
            | NcdbError::UnsupportedVersion { .. }
            | NcdbError::UnknownFormat(_)
            | NcdbError::IndexOutOfRange { .. }
            | NcdbError::InvalidData(_)
            | NcdbError::MissingMember(_)
            | NcdbError::Json(_) => PyValueError::new_err(err.to_string()),
        }
    }
}

pub type NcdbResult<T> = Result<T, NcdbError>;
