//! Error types for neural_seg.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during inference, training or checkpointing.
#[derive(Error, Debug)]
pub enum NeuralSegError {
    /// Tiling, accumulation or metric failure.
    #[error(transparent)]
    Core(#[from] seg_core::SegCoreError),

    /// Volume file or dataset layout failure.
    #[error(transparent)]
    Io(#[from] seg_io::SegIoError),

    /// Filesystem failure outside the volume format.
    #[error("filesystem error: {0}")]
    Fs(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// The configured supervised criterion is not known.
    #[error("{name} criterion is not implemented")]
    UnsupportedCriterion {
        /// Requested criterion name.
        name: String,
    },

    /// The model produced an output variant the selector cannot read.
    #[error("output selector {selector} cannot read a {produced} model output")]
    OutputMismatch {
        /// Configured selector.
        selector: String,
        /// Variant the model produced.
        produced: &'static str,
    },

    /// Tensor shape mismatch.
    #[error("tensor shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// Student and teacher do not have the same parameter layout.
    #[error("EMA structure mismatch: {message}")]
    EmaStructureMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A collective operation failed or a peer never arrived.
    #[error("distributed error: {message}")]
    Distributed {
        /// Description of the failure.
        message: String,
    },

    /// No checkpoint exists at the given location.
    #[error("no checkpoint at {path:?}")]
    CheckpointNotFound {
        /// Checkpoint directory.
        path: PathBuf,
    },

    /// A checkpoint exists but cannot be read back.
    #[error("checkpoint at {path:?} is unreadable: {reason}")]
    CheckpointCorrupt {
        /// Checkpoint directory.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Burn recorder failure while writing a checkpoint.
    #[error("recorder error: {message}")]
    Recorder {
        /// Description of the error.
        message: String,
    },

    /// Tensor data could not be converted to host values.
    #[error("tensor data error: {message}")]
    TensorData {
        /// Description of the error.
        message: String,
    },

    /// A data source yielded no batches for an epoch.
    #[error("data source yields no batches per epoch")]
    EmptyEpoch,
}

impl NeuralSegError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub(crate) fn distributed(message: impl Into<String>) -> Self {
        Self::Distributed {
            message: message.into(),
        }
    }

    pub(crate) fn data(err: impl std::fmt::Debug) -> Self {
        Self::TensorData {
            message: format!("{err:?}"),
        }
    }
}

/// Result type alias for neural_seg operations.
pub type Result<T> = std::result::Result<T, NeuralSegError>;
