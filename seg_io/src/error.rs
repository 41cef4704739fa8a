//! Error types for seg_io operations.

use std::path::PathBuf;

use seg_core::SegCoreError;
use thiserror::Error;

use crate::format::ElementKind;

/// Errors that can occur while reading or writing volumes.
#[derive(Error, Debug)]
pub enum SegIoError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents do not follow the volume format.
    #[error("invalid file format: {message}")]
    InvalidFormat {
        /// Description of the format error.
        message: String,
    },

    /// The file stores a different element type than requested.
    #[error("element kind mismatch: expected {expected:?}, got {got:?}")]
    ElementKindMismatch {
        /// Requested element kind.
        expected: ElementKind,
        /// Element kind found in the header.
        got: ElementKind,
    },

    /// An image has no label file with the same name.
    #[error("no label file for image {image:?} (looked for {label:?})")]
    MissingLabel {
        /// Image path.
        image: PathBuf,
        /// Expected label path.
        label: PathBuf,
    },

    /// A file name does not carry the components the naming rule needs.
    #[error("cannot derive a prediction name from '{name}'")]
    InvalidCaseName {
        /// Offending file name.
        name: String,
    },

    /// Grid construction failed.
    #[error(transparent)]
    Core(#[from] SegCoreError),
}

impl SegIoError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }
}

/// Result type alias for seg_io operations.
pub type Result<T> = std::result::Result<T, SegIoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SegIoError::format("bad magic");
        assert_eq!(err.to_string(), "invalid file format: bad magic");

        let err = SegIoError::ElementKindMismatch {
            expected: ElementKind::U8,
            got: ElementKind::F32,
        };
        assert!(err.to_string().contains("U8"));
    }

    #[test]
    fn test_core_error_is_transparent() {
        let core = SegCoreError::LengthMismatch { expected: 8, got: 7 };
        let err: SegIoError = core.clone().into();
        assert_eq!(err.to_string(), core.to_string());
    }
}
