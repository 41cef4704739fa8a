//! Deterministic spheres dataset for tests and demos.
//!
//! Each case holds one sphere per foreground class. Intensity rises with the
//! class id, so a small network can learn the task in a few steps.

use burn::config::Config;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seg_core::{LabelMap, Shape3, Volume, IGNORE_LABEL};

use super::ShardedSampler;
use crate::distributed::DistributedContext;
use crate::training::{BatchSource, LabeledBatch, UnlabeledBatch, ValidationCase};

/// Synthetic dataset settings.
#[derive(Config, Debug)]
pub struct SyntheticConfig {
    /// Case extent.
    pub shape: [usize; 3],
    /// Number of classes, background included.
    pub num_classes: usize,
    /// Labeled cases.
    #[config(default = 4)]
    pub labeled: usize,
    /// Unlabeled cases.
    #[config(default = 8)]
    pub unlabeled: usize,
    /// Validation cases.
    #[config(default = 2)]
    pub validation: usize,
    /// Uniform noise amplitude of the clean scans.
    #[config(default = 0.05)]
    pub noise: f32,
    /// Extra noise amplitude of the strong view.
    #[config(default = 0.2)]
    pub strong_noise: f32,
    /// Width of the border marked as ignored in unlabeled batches.
    #[config(default = 1)]
    pub ignore_border: usize,
    /// Seed.
    #[config(default = 0)]
    pub seed: u64,
}

/// Generated cases, split into labeled, unlabeled and validation sets.
#[derive(Debug, Clone)]
pub struct SyntheticVolumes {
    config: SyntheticConfig,
    labeled: Vec<(Volume, LabelMap)>,
    unlabeled: Vec<Volume>,
    validation: Vec<ValidationCase>,
}

/// Sphere phantom: label and intensity.
pub fn sphere_case(shape: Shape3, num_classes: usize, noise: f32, seed: u64) -> (Volume, LabelMap) {
    let mut rng = StdRng::seed_from_u64(seed);
    let min_extent = shape.w.min(shape.h).min(shape.d) as f32;
    let spheres: Vec<([f32; 3], f32)> = (1..num_classes)
        .map(|_| {
            let radius = rng.gen_range(min_extent / 6.0..=min_extent / 4.0).max(1.0);
            let center = [
                rng.gen_range(radius..=(shape.w as f32 - radius).max(radius)),
                rng.gen_range(radius..=(shape.h as f32 - radius).max(radius)),
                rng.gen_range(radius..=(shape.d as f32 - radius).max(radius)),
            ];
            (center, radius)
        })
        .collect();

    // Later classes paint over earlier ones.
    let labels = LabelMap::from_fn(shape, |x, y, z| {
        let mut label = 0u8;
        for (i, (c, r)) in spheres.iter().enumerate() {
            let dx = x as f32 + 0.5 - c[0];
            let dy = y as f32 + 0.5 - c[1];
            let dz = z as f32 + 0.5 - c[2];
            if dx * dx + dy * dy + dz * dz <= r * r {
                label = (i + 1) as u8;
            }
        }
        label
    });

    let scale = (num_classes.max(2) - 1) as f32;
    let image = Volume::from_fn(shape, |x, y, z| {
        labels.get(x, y, z) as f32 / scale + rng.gen_range(-noise..=noise)
    });
    (image, labels)
}

impl SyntheticVolumes {
    /// Generate every case.
    pub fn new(config: SyntheticConfig) -> Self {
        let shape = Shape3::from(config.shape);
        let make = |offset: u64| sphere_case(shape, config.num_classes, config.noise, config.seed.wrapping_add(offset));

        let labeled = (0..config.labeled).map(|i| make(i as u64)).collect();
        let unlabeled = (0..config.unlabeled)
            .map(|i| make(1_000 + i as u64).0)
            .collect();
        let validation = (0..config.validation)
            .map(|i| {
                let (image, label) = make(2_000 + i as u64);
                ValidationCase {
                    name: format!("synthetic_{i:04}"),
                    image,
                    label,
                }
            })
            .collect();

        Self {
            config,
            labeled,
            unlabeled,
            validation,
        }
    }

    /// Held-out cases.
    pub fn validation_cases(&self) -> &[ValidationCase] {
        &self.validation
    }

    /// Labeled batches for one replica, oversampled to `nsample` cases per
    /// epoch (the unlabeled set size keeps both loaders in step).
    pub fn labeled_source(&self, ctx: &DistributedContext, batch_size: usize, nsample: usize) -> LabeledSource<'_> {
        let len = nsample.max(self.labeled.len());
        LabeledSource {
            data: self,
            sampler: ShardedSampler::new(len, ctx.rank(), ctx.world_size(), self.config.seed, true),
            batch_size,
        }
    }

    /// Unlabeled batches for one replica.
    pub fn unlabeled_source(&self, ctx: &DistributedContext, batch_size: usize) -> UnlabeledSource<'_> {
        UnlabeledSource {
            data: self,
            sampler: ShardedSampler::new(
                self.unlabeled.len(),
                ctx.rank(),
                ctx.world_size(),
                self.config.seed.wrapping_add(1),
                true,
            ),
            batch_size,
        }
    }

    fn batch_shape(&self, batch_size: usize) -> [usize; 4] {
        let [w, h, d] = self.config.shape;
        [batch_size, w, h, d]
    }
}

/// Labeled [`BatchSource`] over a [`SyntheticVolumes`].
#[derive(Debug, Clone)]
pub struct LabeledSource<'a> {
    data: &'a SyntheticVolumes,
    sampler: ShardedSampler,
    batch_size: usize,
}

impl BatchSource<LabeledBatch> for LabeledSource<'_> {
    fn batches_per_epoch(&self) -> usize {
        self.sampler.batches_per_epoch(self.batch_size)
    }

    fn epoch_batches(&self, epoch: usize) -> Box<dyn Iterator<Item = crate::error::Result<LabeledBatch>> + '_> {
        let cases = &self.data.labeled;
        let shape = self.data.batch_shape(self.batch_size);
        Box::new(
            self.sampler
                .epoch_batches(epoch, self.batch_size)
                .into_iter()
                .map(move |indices| {
                    let mut image = Vec::new();
                    let mut mask = Vec::new();
                    for i in indices {
                        let (volume, labels) = &cases[i % cases.len()];
                        image.extend_from_slice(volume.data());
                        mask.extend_from_slice(labels.data());
                    }
                    LabeledBatch::new(shape, image, mask)
                }),
        )
    }
}

/// Unlabeled [`BatchSource`] over a [`SyntheticVolumes`].
#[derive(Debug, Clone)]
pub struct UnlabeledSource<'a> {
    data: &'a SyntheticVolumes,
    sampler: ShardedSampler,
    batch_size: usize,
}

impl BatchSource<UnlabeledBatch> for UnlabeledSource<'_> {
    fn batches_per_epoch(&self) -> usize {
        self.sampler.batches_per_epoch(self.batch_size)
    }

    fn epoch_batches(&self, epoch: usize) -> Box<dyn Iterator<Item = crate::error::Result<UnlabeledBatch>> + '_> {
        let config = &self.data.config;
        let shape = Shape3::from(config.shape);
        let batch_shape = self.data.batch_shape(self.batch_size);
        let border = config.ignore_border;
        let ignore = LabelMap::from_fn(shape, |x, y, z| {
            let near = |v: usize, n: usize| v < border || v + border >= n;
            if near(x, shape.w) || near(y, shape.h) || near(z, shape.d) {
                IGNORE_LABEL
            } else {
                0
            }
        });

        Box::new(
            self.sampler
                .epoch_batches(epoch, self.batch_size)
                .into_iter()
                .enumerate()
                .map(move |(b, indices)| {
                    let seed = config
                        .seed
                        .wrapping_add(((epoch as u64) << 32) | b as u64);
                    let mut rng = StdRng::seed_from_u64(seed);
                    let mut weak = Vec::new();
                    let mut strong = Vec::new();
                    let mut ignore_mask = Vec::new();
                    for i in indices {
                        let volume = &self.data.unlabeled[i];
                        let gain = rng.gen_range(0.9..=1.1f32);
                        for &v in volume.data() {
                            weak.push(v);
                            strong.push(v * gain + rng.gen_range(-config.strong_noise..=config.strong_noise));
                        }
                        ignore_mask.extend_from_slice(ignore.data());
                    }
                    UnlabeledBatch::new(batch_shape, weak, strong, ignore_mask)
                }),
        )
    }
}
