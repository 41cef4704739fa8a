//! Error types for seg_core operations.

use thiserror::Error;

/// Errors that can occur in tiling, accumulation and volume handling.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SegCoreError {
    /// A voxel was never covered by any patch, so its score cannot be normalized.
    #[error("voxel ({x}, {y}, {z}) was not covered by any patch")]
    Coverage {
        /// Axis 0 index in the padded volume.
        x: usize,
        /// Axis 1 index in the padded volume.
        y: usize,
        /// Axis 2 index in the padded volume.
        z: usize,
    },

    /// A stride component is zero.
    #[error("stride must be positive on every axis, got {stride:?}")]
    InvalidStride {
        /// The rejected strides.
        stride: [usize; 3],
    },

    /// A patch extent is zero.
    #[error("patch extent must be positive on every axis, got {patch:?}")]
    InvalidPatch {
        /// The rejected patch shape.
        patch: [usize; 3],
    },

    /// Two shapes that must agree do not.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// A flat buffer has the wrong number of elements.
    #[error("buffer length mismatch: expected {expected} values, got {got}")]
    LengthMismatch {
        /// Expected element count.
        expected: usize,
        /// Actual element count.
        got: usize,
    },

    /// A label value is outside `[0, num_classes)`.
    #[error("label {label} is out of range for {num_classes} classes")]
    LabelOutOfRange {
        /// Offending label.
        label: u8,
        /// Number of classes.
        num_classes: usize,
    },
}

/// Result type for seg_core operations.
pub type Result<T> = std::result::Result<T, SegCoreError>;
