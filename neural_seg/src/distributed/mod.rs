//! Data-parallel replicas: rank bookkeeping, collectives and weight sync.
//!
//! A run is one or more replicas, each owning a full student, teacher and
//! optimizer. Replicas stay identical because they start from the same
//! broadcast weights and apply the same averaged gradients every step.

mod collective;
mod context;
mod sync;

pub use collective::{Collective, SingleProcess, ThreadGroup, ThreadMember};
pub use context::DistributedContext;
pub use sync::{all_reduce_gradients, broadcast_module, sync_running_state};
