//! Sliding-window inference over whole volumes.

mod engine;
mod predict;

pub use engine::VolumetricInferenceEngine;
pub use predict::{evaluate_predictions, predict_cases, PredictionReport, PREDICTION_EXT};
