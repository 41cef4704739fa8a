//! Configuration types.
//!
//! Every struct derives Burn's `Config`: defaults, `with_*` builders and JSON
//! `save` / `load`.

mod criterion;
mod inference;
mod network;
mod training;

pub use criterion::CriterionConfig;
pub use inference::InferenceConfig;
pub use network::{OutputKind, SegNetConfig};
pub use training::TrainingConfig;
