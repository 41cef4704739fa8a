//! # seg_core
//!
//! Pure algorithms for sliding-window volumetric segmentation.
//!
//! Nothing in this crate touches a tensor library or the filesystem. It owns the
//! parts of inference and training that are plain arithmetic over dense grids,
//! so they can be tested exhaustively without a model.
//!
//! ## Modules
//!
//! - [`types`]: Shapes, padding and dense grids (`Volume`, `LabelMap`, `VisitCount`)
//! - [`tiling`]: Deterministic patch placement (`PatchScheduler`)
//! - [`accumulate`]: Overlap-aware probability accumulation and argmax
//! - [`schedule`]: Learning-rate, EMA and ramp-up schedules
//! - [`metrics`]: Dice and HD95 per class
//! - [`classes`]: Dataset class tables
//! - [`error`]: Error types
//!
//! ## Usage
//!
//! ```ignore
//! use seg_core::prelude::*;
//!
//! let scheduler = PatchScheduler::new(volume.shape(), Shape3::cube(96), Strides3::from_xy_z(80, 32))?;
//! let padded = volume.pad(&scheduler.pad(), 0.0);
//! let mut acc = ScoreAccumulator::new(num_classes, scheduler.padded_shape());
//! for patch in scheduler.patches() {
//!     let input = padded.extract(patch.offset, patch.shape);
//!     acc.add_patch(&patch, &softmax(model(&input)))?;
//! }
//! let (labels, scores) = acc.finalize(&scheduler.pad())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulate;
pub mod classes;
pub mod error;
pub mod metrics;
pub mod schedule;
pub mod tiling;
pub mod types;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::accumulate::{ScoreAccumulator, ScoreMap};
    pub use crate::classes::DatasetKind;
    pub use crate::error::{Result, SegCoreError};
    pub use crate::metrics::{CaseMetric, ClassScore, DiceHd95, MetricTotals};
    pub use crate::schedule::{
        consistency_weight, ema_blend, ema_ratio, poly_lr, sigmoid_rampup, DEFAULT_EMA_CEILING,
        DEFAULT_LR_POWER,
    };
    pub use crate::tiling::{Patch, PatchScheduler, Strides3};
    pub use crate::types::{
        Grid3, LabelMap, PadSpec, Shape3, VisitCount, Volume, IGNORE_LABEL,
    };
}

pub use accumulate::{ScoreAccumulator, ScoreMap};
pub use classes::DatasetKind;
pub use error::{Result, SegCoreError};
pub use metrics::{binary_dice, hd95, CaseMetric, ClassScore, DiceHd95, MetricTotals};
pub use schedule::{
    consistency_weight, ema_blend, ema_ratio, poly_lr, sigmoid_rampup, DEFAULT_EMA_CEILING,
    DEFAULT_LR_POWER,
};
pub use tiling::{Patch, PatchIter, PatchScheduler, Strides3};
pub use types::{Grid3, LabelMap, PadSpec, Shape3, VisitCount, Volume, IGNORE_LABEL};
