use std::path::PathBuf;

use ndarray_npy::{ReadNpzError, WriteNpzError};
use thiserror::Error;

pub type MotionResult<T> = Result<T, MotionError>;

/// Errors produced while loading, converting or writing motion containers.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MotionError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not read archive: {0}")]
    Archive(#[from] ReadNpzError),
    #[error("could not write archive: {0}")]
    ArchiveWrite(#[from] WriteNpzError),
    #[error("malformed pickle at byte {offset}: {message}")]
    MalformedPickle { offset: u64, message: String },
    #[error("field '{field}' cannot be loaded: {reason}")]
    UnsupportedField { field: String, reason: String },
    #[error("missing required fields {missing:?}; available fields: {available:?}")]
    MissingFields {
        missing: Vec<String>,
        available: Vec<String>,
    },
    #[error("field '{field}' has an unexpected shape: {message}")]
    Shape { field: String, message: String },
    #[error("expected a dictionary at the top level, found {found}")]
    NotADictionary { found: String },
}

impl MotionError {
    pub(crate) fn shape(field: impl Into<String>, message: impl Into<String>) -> Self {
        MotionError::Shape {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Maps a failed `File::open` to `NotFound` when the path does not exist.
    pub(crate) fn open(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            MotionError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            MotionError::Io(err)
        }
    }
}
