//! Error types for the remap core library.

#[cfg(feature = "python")]
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::PyErr;

/// Top-level error enum for the remap core library.
///
/// Only malformed input and configuration problems surface here. Unmatchable
/// or ambiguous symbols are reported as absent entries and warnings instead.
#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error("Descriptor error: {0}")]
    Descriptor(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Config error: {0}")]
    Config(String),

    /// A finished mapping would send two symbols to one target.
    #[error("Mapping collision: {0}")]
    Collision(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[cfg(feature = "python")]
impl From<RemapError> for PyErr {
    fn from(err: RemapError) -> PyErr {
        match &err {
            RemapError::Descriptor(_) | RemapError::Snapshot(_) => {
                PyValueError::new_err(err.to_string())
            }
            RemapError::Config(_) => PyValueError::new_err(err.to_string()),
            RemapError::Collision(_) => PyValueError::new_err(err.to_string()),
            RemapError::Io(_) => PyIOError::new_err(err.to_string()),
            RemapError::Json(_) => PyValueError::new_err(err.to_string()),
            RemapError::ThreadPool(_) => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

pub type RemapResult<T> = Result<T, RemapError>;
