//! Per-epoch shuffled, rank-sharded sample order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Splits `len` samples across replicas, reshuffled every epoch.
///
/// The global order is seeded by `seed + epoch`, padded by wrapping around to
/// a multiple of `world_size`, then dealt out round-robin. Every replica
/// therefore sees the same number of samples.
#[derive(Debug, Clone)]
pub struct ShardedSampler {
    len: usize,
    rank: usize,
    world_size: usize,
    seed: u64,
    shuffle: bool,
}

impl ShardedSampler {
    /// Sampler for one replica.
    pub fn new(len: usize, rank: usize, world_size: usize, seed: u64, shuffle: bool) -> Self {
        Self {
            len,
            rank,
            world_size: world_size.max(1),
            seed,
            shuffle,
        }
    }

    /// Samples this replica sees per epoch.
    pub fn num_samples(&self) -> usize {
        self.len.div_ceil(self.world_size)
    }

    /// Full batches per epoch; the remainder is dropped.
    pub fn batches_per_epoch(&self, batch_size: usize) -> usize {
        if batch_size == 0 {
            0
        } else {
            self.num_samples() / batch_size
        }
    }

    /// This replica's sample indices for `epoch`.
    pub fn epoch_indices(&self, epoch: usize) -> Vec<usize> {
        if self.len == 0 {
            return Vec::new();
        }
        let mut order: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        let total = self.num_samples() * self.world_size;
        let padded = order.iter().copied().cycle().take(total);
        padded.skip(self.rank).step_by(self.world_size).collect()
    }

    /// This replica's full batches for `epoch`.
    pub fn epoch_batches(&self, epoch: usize, batch_size: usize) -> Vec<Vec<usize>> {
        if batch_size == 0 {
            return Vec::new();
        }
        self.epoch_indices(epoch)
            .chunks_exact(batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }
}
