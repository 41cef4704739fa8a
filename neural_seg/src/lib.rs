//! # neural_seg
//!
//! Mean-teacher semi-supervised volumetric segmentation with Burn.
//!
//! This crate turns the pure tiling and metric code of seg_core and the volume
//! files of seg_io into a working pipeline: sliding-window inference over whole
//! CT scans, consistency training of a student against an EMA teacher, data
//! parallel replicas and resumable checkpoints.
//!
//! ## Features
//!
//! - **Inference**: `VolumetricInferenceEngine` tiles a volume, runs a model on
//!   each patch and stitches averaged probabilities back together
//! - **Model interface**: `SegmentationModel` plus an `OutputSelector` picking
//!   logits from single-head, two-head or keyed outputs
//! - **Losses**: cross entropy, OHEM and confidence-masked consistency
//! - **Training**: `ConsistencyTrainer` with poly learning rate, EMA teacher,
//!   gated evaluation and best-checkpoint tracking
//! - **Distributed**: `DistributedContext` with gradient averaging over a
//!   `Collective` (in-process `ThreadGroup` included)
//!
//! ## Quick Start
//!
//! ```ignore
//! use burn::backend::{Autodiff, NdArray};
//! use neural_seg::prelude::*;
//!
//! type Train = Autodiff<NdArray>;
//!
//! let device = Default::default();
//! let config = TrainingConfig::new(InferenceConfig::new(3)).with_num_classes(3);
//! let student = SegNetConfig::new(3).init::<Train>(&device);
//! let optimizer = config.optimizer().init();
//!
//! let mut trainer = ConsistencyTrainer::new(config, student, optimizer, DistributedContext::single(), &device)?;
//! trainer.fit(&labeled, &unlabeled, &validation, &mut LogScalarSink)?;
//!
//! let engine = VolumetricInferenceEngine::new(InferenceConfig::new(3), &device)?;
//! let (labels, scores) = engine.infer(trainer.teacher(), &volume)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! seg_core (tiling, accumulation, schedules, metrics)
//!     │
//!     ├──────────────────┐
//!     ▼                  ▼
//! seg_io             neural_seg
//! (.svol files)      (inference, training)
//!     │                  ▲
//!     └──────────────────┘
//! ```
//!
//! ## Feature Flags
//!
//! - `ndarray` (default): CPU backend
//! - `wgpu`: GPU backend via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data;
pub mod distributed;
pub mod error;
pub mod inference;
pub mod loss;
pub mod nn;
pub mod training;

pub use config::{CriterionConfig, InferenceConfig, OutputKind, SegNetConfig, TrainingConfig};
pub use distributed::DistributedContext;
pub use error::{NeuralSegError, Result};
pub use inference::VolumetricInferenceEngine;
pub use nn::{ModelOutput, OutputSelector, SegNet3d, SegmentationModel};
pub use training::{CheckpointStore, ConsistencyTrainer, TrainingState};

pub use seg_core::{LabelMap, ScoreMap, Shape3, Volume};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{
        CriterionConfig, InferenceConfig, OutputKind, SegNetConfig, TrainingConfig,
    };
    pub use crate::data::{ShardedSampler, SyntheticConfig, SyntheticVolumes};
    pub use crate::distributed::{
        all_reduce_gradients, broadcast_module, Collective, DistributedContext, SingleProcess,
        ThreadGroup,
    };
    pub use crate::error::{NeuralSegError, Result};
    pub use crate::inference::{evaluate_predictions, predict_cases, VolumetricInferenceEngine};
    pub use crate::loss::{masked_consistency_loss, voxel_cross_entropy, Criterion};
    pub use crate::nn::{ModelOutput, OutputSelector, SegNet3d, SegmentationModel};
    pub use crate::training::{
        BatchSource, CheckpointStore, ConsistencyTrainer, JsonlScalarSink, LabeledBatch,
        LogScalarSink, ScalarSink, StepOutput, TrainingState, UnlabeledBatch, ValidationCase,
    };

    pub use seg_core::{DatasetKind, LabelMap, ScoreMap, Shape3, Volume};
}
