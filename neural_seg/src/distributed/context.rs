//! Rank and world information for one replica.

use std::sync::Arc;
use std::time::Duration;

use super::collective::{Collective, SingleProcess, ThreadGroup};
use crate::error::{NeuralSegError, Result};

/// Who this replica is and how it talks to its peers.
///
/// Built once at startup and passed explicitly; nothing else reads the
/// process environment.
#[derive(Debug, Clone)]
pub struct DistributedContext {
    rank: usize,
    world_size: usize,
    local_rank: usize,
    port: Option<u16>,
    collective: Arc<dyn Collective>,
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| NeuralSegError::config(format!("{name}={value} is not a non-negative integer"))),
        Err(_) => Ok(None),
    }
}

impl DistributedContext {
    /// Single-replica run.
    pub fn single() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            local_rank: 0,
            port: None,
            collective: Arc::new(SingleProcess),
        }
    }

    /// Context with an explicit collective backend.
    pub fn new(rank: usize, local_rank: usize, port: Option<u16>, collective: Arc<dyn Collective>) -> Result<Self> {
        let world_size = collective.world_size();
        if rank >= world_size {
            return Err(NeuralSegError::config(format!(
                "rank {rank} out of range for world size {world_size}"
            )));
        }
        Ok(Self {
            rank,
            world_size,
            local_rank,
            port,
            collective,
        })
    }

    /// Read `RANK`, `WORLD_SIZE`, `LOCAL_RANK` and `MASTER_PORT`.
    ///
    /// Missing variables mean a single replica. A world size above one needs a
    /// collective backend, see [`DistributedContext::from_env_with`].
    pub fn from_env() -> Result<Self> {
        let world_size = env_usize("WORLD_SIZE")?.unwrap_or(1);
        if world_size > 1 {
            return Err(NeuralSegError::config(format!(
                "WORLD_SIZE={world_size} but no collective backend was supplied"
            )));
        }
        let mut ctx = Self::single();
        ctx.port = env_usize("MASTER_PORT")?.and_then(|p| u16::try_from(p).ok());
        Ok(ctx)
    }

    /// Read the rank variables and attach `collective`, whose world size must
    /// match `WORLD_SIZE`.
    pub fn from_env_with(collective: Arc<dyn Collective>) -> Result<Self> {
        let world_size = env_usize("WORLD_SIZE")?.unwrap_or(1);
        if world_size != collective.world_size() {
            return Err(NeuralSegError::config(format!(
                "WORLD_SIZE={world_size} but the collective spans {} replicas",
                collective.world_size()
            )));
        }
        let rank = env_usize("RANK")?.unwrap_or(0);
        let local_rank = env_usize("LOCAL_RANK")?.unwrap_or(rank);
        let port = env_usize("MASTER_PORT")?.and_then(|p| u16::try_from(p).ok());
        Self::new(rank, local_rank, port, collective)
    }

    /// Contexts for `world_size` replicas running as threads of this process.
    pub fn thread_group(world_size: usize, timeout: Duration) -> Result<Vec<Self>> {
        ThreadGroup::new(world_size, timeout)?
            .members()
            .into_iter()
            .enumerate()
            .map(|(rank, member)| Self::new(rank, rank, None, member))
            .collect()
    }

    /// Global rank.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of replicas.
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Rank within this host.
    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    /// Rendezvous port, if one was configured.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Rank 0 logs, writes scalars and checkpoints.
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    /// Element-wise sum over all replicas, accumulated in f64.
    pub fn all_reduce_sum(&self, buffer: &mut [f32]) -> Result<()> {
        if self.world_size == 1 {
            return Ok(());
        }
        let mut wide: Vec<f64> = buffer.iter().map(|&v| v as f64).collect();
        self.collective.all_reduce_sum(&mut wide)?;
        for (dst, v) in buffer.iter_mut().zip(wide) {
            *dst = v as f32;
        }
        Ok(())
    }

    /// Element-wise sum over all replicas of a double-precision buffer.
    pub fn all_reduce_sum_f64(&self, buffer: &mut [f64]) -> Result<()> {
        if self.world_size == 1 {
            return Ok(());
        }
        self.collective.all_reduce_sum(buffer)
    }

    /// Block until every replica arrives.
    pub fn barrier(&self) -> Result<()> {
        if self.world_size == 1 {
            return Ok(());
        }
        self.collective.barrier()
    }

    /// Items `rank, rank + world, rank + 2 * world, ...`.
    pub fn shard<'a, T>(&self, items: &'a [T]) -> impl Iterator<Item = &'a T> + 'a {
        let (rank, world) = (self.rank, self.world_size);
        items.iter().skip(rank).step_by(world)
    }
}

impl Default for DistributedContext {
    fn default() -> Self {
        Self::single()
    }
}
