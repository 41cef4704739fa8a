//! Voxel-wise cross entropy and the supervised criteria built on it.

use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::TensorData;

use crate::config::CriterionConfig;
use crate::error::{NeuralSegError, Result};

/// Unreduced cross entropy of `[B, C, W, H, D]` logits against `[B, W, H, D]`
/// class targets.
///
/// Targets equal to `ignore_index` are read as class 0; callers mask them out.
pub fn voxel_cross_entropy<B: Backend>(
    logits: Tensor<B, 5>,
    target: Tensor<B, 4, Int>,
    ignore_index: u8,
) -> Tensor<B, 4> {
    let ignored = target.clone().equal_elem(ignore_index as i32);
    let target = target.mask_fill(ignored, 0);
    log_softmax(logits, 1)
        .gather(1, target.unsqueeze_dim::<5>(1))
        .squeeze::<4>(1)
        .neg()
}

/// `sum(values * weights) / count`, or zero when `count` is zero.
pub(crate) fn weighted_mean<B: Backend>(values: Tensor<B, 4>, weights: Vec<f32>, count: usize) -> Tensor<B, 1> {
    let device = values.device();
    if count == 0 {
        return Tensor::zeros([1], &device);
    }
    let weights = Tensor::<B, 4>::from_data(TensorData::new(weights, values.dims()), &device);
    (values * weights).sum().div_scalar(count as f32)
}

pub(crate) fn host_labels<B: Backend>(target: Tensor<B, 4, Int>) -> Result<Vec<i64>> {
    target
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(NeuralSegError::data)
}

/// Supervised loss on labeled batches.
#[derive(Debug, Clone)]
pub enum Criterion {
    /// Mean cross entropy over non-ignored voxels.
    CrossEntropy {
        /// Target value excluded from the loss.
        ignore_index: u8,
    },
    /// Cross entropy over the hardest voxels only.
    ///
    /// A voxel is kept when the predicted probability of its target class is
    /// at most `max(thresh, p_k)`, where `p_k` is the k-th smallest such
    /// probability and `k = min_kept`. With fewer valid voxels than
    /// `min_kept`, every valid voxel is kept.
    Ohem {
        /// Target value excluded from the loss.
        ignore_index: u8,
        /// Probability under which a voxel is always kept.
        thresh: f32,
        /// Minimum number of voxels kept.
        min_kept: usize,
    },
}

impl Criterion {
    /// Resolve a criterion by name.
    pub fn from_config(config: &CriterionConfig) -> Result<Self> {
        match config.name.as_str() {
            "CELoss" => Ok(Self::CrossEntropy {
                ignore_index: config.ignore_index,
            }),
            "OHEM" => Ok(Self::Ohem {
                ignore_index: config.ignore_index,
                thresh: config.thresh,
                min_kept: config.min_kept,
            }),
            other => Err(NeuralSegError::UnsupportedCriterion {
                name: other.to_string(),
            }),
        }
    }

    /// Configured name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CrossEntropy { .. } => "CELoss",
            Self::Ohem { .. } => "OHEM",
        }
    }

    /// Scalar loss of `[B, C, W, H, D]` logits against `[B, W, H, D]` targets.
    pub fn loss<B: Backend>(&self, logits: Tensor<B, 5>, target: Tensor<B, 4, Int>) -> Result<Tensor<B, 1>> {
        match *self {
            Self::CrossEntropy { ignore_index } => {
                let labels = host_labels(target.clone())?;
                let weights: Vec<f32> = labels
                    .iter()
                    .map(|&t| if t == ignore_index as i64 { 0.0 } else { 1.0 })
                    .collect();
                let count = weights.iter().filter(|&&w| w > 0.0).count();
                let per_voxel = voxel_cross_entropy(logits, target, ignore_index);
                Ok(weighted_mean(per_voxel, weights, count))
            }
            Self::Ohem {
                ignore_index,
                thresh,
                min_kept,
            } => {
                let weights = ohem_weights(logits.clone(), target.clone(), ignore_index, thresh, min_kept)?;
                let count = weights.iter().filter(|&&w| w > 0.0).count();
                let per_voxel = voxel_cross_entropy(logits, target, ignore_index);
                Ok(weighted_mean(per_voxel, weights, count))
            }
        }
    }
}

/// 0/1 weights of the voxels OHEM keeps.
fn ohem_weights<B: Backend>(
    logits: Tensor<B, 5>,
    target: Tensor<B, 4, Int>,
    ignore_index: u8,
    thresh: f32,
    min_kept: usize,
) -> Result<Vec<f32>> {
    let labels = host_labels(target.clone())?;
    let valid: Vec<bool> = labels.iter().map(|&t| t != ignore_index as i64).collect();
    let num_valid = valid.iter().filter(|&&v| v).count();
    if min_kept > num_valid || num_valid == 0 {
        log::debug!("OHEM keeps all {num_valid} valid voxels");
        return Ok(valid.iter().map(|&v| f32::from(u8::from(v))).collect());
    }

    let ignored = target.clone().equal_elem(ignore_index as i32);
    let safe = target.mask_fill(ignored, 0);
    let target_prob = softmax(logits.detach(), 1)
        .gather(1, safe.unsqueeze_dim::<5>(1))
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(NeuralSegError::data)?;

    // Ignored voxels rank last.
    let probs: Vec<f32> = target_prob
        .iter()
        .zip(&valid)
        .map(|(&p, &v)| if v { p } else { 1.0 })
        .collect();

    let mut threshold = thresh;
    if min_kept > 0 {
        let mut sorted = probs.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let kth = sorted[min_kept.min(sorted.len()) - 1];
        if kth > thresh {
            threshold = kth;
        }
    }

    Ok(probs
        .iter()
        .zip(&valid)
        .map(|(&p, &v)| f32::from(u8::from(v && p <= threshold)))
        .collect())
}
