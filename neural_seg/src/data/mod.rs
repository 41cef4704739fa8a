//! Sampling and synthetic data.

mod sampler;
mod synthetic;

pub use sampler::ShardedSampler;
pub use synthetic::{sphere_case, LabeledSource, SyntheticConfig, SyntheticVolumes, UnlabeledSource};
