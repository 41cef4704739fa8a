//! Host-side training batches and the sources that yield them.
//!
//! Batches stay on the host until the trainer uploads them, so data sources
//! need not know the backend.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::{NeuralSegError, Result};

/// `[batch, W, H, D]` extent of a batch.
pub type BatchShape = [usize; 4];

fn check_len(what: &str, len: usize, shape: BatchShape) -> Result<()> {
    let expected: usize = shape.iter().product();
    if len != expected {
        return Err(NeuralSegError::config(format!(
            "{what} has {len} values, batch shape {shape:?} needs {expected}"
        )));
    }
    Ok(())
}

fn image_tensor<B: Backend>(values: &[f32], shape: BatchShape, device: &B::Device) -> Tensor<B, 5> {
    let [n, w, h, d] = shape;
    Tensor::from_data(TensorData::new(values.to_vec(), [n, 1, w, h, d]), device)
}

/// Labeled crops with their masks.
#[derive(Debug, Clone)]
pub struct LabeledBatch {
    /// Extent.
    pub shape: BatchShape,
    /// Intensities.
    pub image: Vec<f32>,
    /// Class per voxel, 255 for voxels excluded from the loss.
    pub mask: Vec<u8>,
}

impl LabeledBatch {
    /// Check lengths against `shape`.
    pub fn new(shape: BatchShape, image: Vec<f32>, mask: Vec<u8>) -> Result<Self> {
        check_len("image", image.len(), shape)?;
        check_len("mask", mask.len(), shape)?;
        Ok(Self { shape, image, mask })
    }

    /// `[batch, 1, W, H, D]` image tensor.
    pub fn image_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 5> {
        image_tensor(&self.image, self.shape, device)
    }

    /// `[batch, W, H, D]` target tensor.
    pub fn mask_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4, Int> {
        let values: Vec<i64> = self.mask.iter().map(|&m| m as i64).collect();
        Tensor::from_data(TensorData::new(values, self.shape), device)
    }
}

/// Unlabeled crops: a weak view for the teacher, a strong view for the
/// student, and the mask of voxels excluded from the consistency loss.
#[derive(Debug, Clone)]
pub struct UnlabeledBatch {
    /// Extent.
    pub shape: BatchShape,
    /// Weakly augmented view.
    pub weak: Vec<f32>,
    /// Strongly augmented view.
    pub strong: Vec<f32>,
    /// 255 where the voxel is excluded.
    pub ignore: Vec<u8>,
}

impl UnlabeledBatch {
    /// Check lengths against `shape`.
    pub fn new(shape: BatchShape, weak: Vec<f32>, strong: Vec<f32>, ignore: Vec<u8>) -> Result<Self> {
        check_len("weak view", weak.len(), shape)?;
        check_len("strong view", strong.len(), shape)?;
        check_len("ignore mask", ignore.len(), shape)?;
        Ok(Self {
            shape,
            weak,
            strong,
            ignore,
        })
    }

    /// `[batch, 1, W, H, D]` weak view.
    pub fn weak_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 5> {
        image_tensor(&self.weak, self.shape, device)
    }

    /// `[batch, 1, W, H, D]` strong view.
    pub fn strong_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 5> {
        image_tensor(&self.strong, self.shape, device)
    }
}

/// A finite, epoch-indexed stream of batches for one replica.
///
/// `epoch_batches` is reseeded by `epoch` so every replica sees the same
/// global order and its own shard of it.
pub trait BatchSource<T> {
    /// Batches yielded per epoch.
    fn batches_per_epoch(&self) -> usize;

    /// Batches of one epoch.
    fn epoch_batches(&self, epoch: usize) -> Box<dyn Iterator<Item = Result<T>> + '_>;
}
