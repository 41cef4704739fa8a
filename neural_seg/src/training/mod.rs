//! Mean-teacher training: steps, EMA teacher, evaluation and checkpoints.
//!
//! - [`ConsistencyTrainer`]: the training loop
//! - [`CheckpointStore`]: `latest/` and best checkpoints
//! - [`TrainingState`]: resumable counters and best-metric bookkeeping
//! - [`BatchSource`]: epoch-indexed labeled and unlabeled batches
//! - [`ScalarSink`]: where per-step scalars go

mod batch;
mod checkpoint;
mod ema;
mod eval;
mod metrics;
mod state;
mod trainer;

pub use batch::{BatchShape, BatchSource, LabeledBatch, UnlabeledBatch};
pub use checkpoint::{best_checkpoint_name, CheckpointStore};
pub use ema::ema_update;
pub use eval::{evaluate_sharded, EvalSummary, ValidationCase};
pub use metrics::{EpochMeters, JsonlScalarSink, LogScalarSink, RunningMean, ScalarSink, StepOutput};
pub use state::TrainingState;
pub use trainer::ConsistencyTrainer;
