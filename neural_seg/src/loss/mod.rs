//! Supervised and consistency losses.
//!
//! - [`voxel_cross_entropy`]: unreduced per-voxel cross entropy
//! - [`Criterion`]: supervised loss selected by name (`CELoss`, `OHEM`)
//! - [`masked_consistency_loss`]: pseudo-label loss gated by teacher confidence

mod consistency;
mod cross_entropy;

pub use consistency::{masked_consistency_loss, ConsistencyLoss};
pub use cross_entropy::{voxel_cross_entropy, Criterion};
pub(crate) use cross_entropy::host_labels;
