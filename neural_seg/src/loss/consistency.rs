//! Confidence-masked consistency loss on unlabeled batches.

use burn::prelude::*;
use seg_core::IGNORE_LABEL;

use super::cross_entropy::weighted_mean;
use crate::error::{NeuralSegError, Result};

/// Result of [`masked_consistency_loss`].
#[derive(Debug, Clone)]
pub struct ConsistencyLoss<B: Backend> {
    /// Scalar loss.
    pub loss: Tensor<B, 1>,
    /// Fraction of non-ignored voxels whose pseudo label was trusted.
    pub mask_ratio: f32,
    /// Every voxel was ignored; `loss` is zero and carries no gradient signal.
    pub skipped: bool,
}

/// Average `per_voxel` over voxels the teacher is confident about.
///
/// The numerator sums voxels with `confidence >= thresh` and
/// `ignore != 255`; the denominator counts every voxel with `ignore != 255`,
/// so low-confidence voxels pull the loss towards zero instead of being
/// dropped from the average.
pub fn masked_consistency_loss<B: Backend>(
    per_voxel: Tensor<B, 4>,
    confidence: &[f32],
    ignore: &[u8],
    thresh: f32,
) -> Result<ConsistencyLoss<B>> {
    let n: usize = per_voxel.dims().iter().product();
    if confidence.len() != n || ignore.len() != n {
        return Err(NeuralSegError::ShapeMismatch {
            expected: vec![n],
            got: vec![confidence.len(), ignore.len()],
        });
    }

    let mut weights = Vec::with_capacity(n);
    let mut valid = 0usize;
    let mut trusted = 0usize;
    for (&c, &i) in confidence.iter().zip(ignore) {
        let counted = i != IGNORE_LABEL;
        let keep = counted && c >= thresh;
        valid += usize::from(counted);
        trusted += usize::from(keep);
        weights.push(f32::from(u8::from(keep)));
    }

    if valid == 0 {
        return Ok(ConsistencyLoss {
            loss: Tensor::zeros([1], &per_voxel.device()),
            mask_ratio: 0.0,
            skipped: true,
        });
    }

    Ok(ConsistencyLoss {
        loss: weighted_mean(per_voxel, weights, valid),
        mask_ratio: trusted as f32 / valid as f32,
        skipped: false,
    })
}
