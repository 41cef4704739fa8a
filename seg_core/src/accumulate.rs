//! Overlap-aware accumulation of per-class patch probabilities.

use crate::error::{Result, SegCoreError};
use crate::tiling::Patch;
use crate::types::{LabelMap, PadSpec, Shape3, VisitCount};

/// Per-class scores over a volume, class axis outermost: `(C, W, H, D)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMap {
    num_classes: usize,
    shape: Shape3,
    data: Vec<f32>,
}

impl ScoreMap {
    /// Zero-filled score map.
    pub fn zeros(num_classes: usize, shape: Shape3) -> Self {
        Self {
            num_classes,
            shape,
            data: vec![0.0; num_classes * shape.num_voxels()],
        }
    }

    /// Wrap a flat `(C, W, H, D)` buffer.
    pub fn new(num_classes: usize, shape: Shape3, data: Vec<f32>) -> Result<Self> {
        let expected = num_classes * shape.num_voxels();
        if data.len() != expected {
            return Err(SegCoreError::LengthMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            num_classes,
            shape,
            data,
        })
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Spatial shape.
    pub fn shape(&self) -> Shape3 {
        self.shape
    }

    /// Flat data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Score of class `c` at a voxel.
    #[inline]
    pub fn get(&self, c: usize, x: usize, y: usize, z: usize) -> f32 {
        self.data[c * self.shape.num_voxels() + self.shape.index(x, y, z)]
    }

    /// Class scores at a voxel.
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> Vec<f32> {
        (0..self.num_classes).map(|c| self.get(c, x, y, z)).collect()
    }

    /// Argmax over the class axis. The first maximum wins ties.
    pub fn argmax(&self) -> LabelMap {
        let n = self.shape.num_voxels();
        LabelMap::from_fn(self.shape, |x, y, z| {
            let i = self.shape.index(x, y, z);
            let mut best = self.data[i];
            let mut label = 0u8;
            for c in 1..self.num_classes {
                let v = self.data[c * n + i];
                if v > best {
                    best = v;
                    label = c as u8;
                }
            }
            label
        })
    }

    /// Remove padding on the spatial axes of every class plane.
    pub fn crop(&self, pad: &PadSpec) -> Self {
        if pad.is_noop() {
            return self.clone();
        }
        let inner = Shape3::new(
            self.shape.w - pad.before[0] - pad.after[0],
            self.shape.h - pad.before[1] - pad.after[1],
            self.shape.d - pad.before[2] - pad.after[2],
        );
        let plane = self.shape.num_voxels();
        let mut data = Vec::with_capacity(self.num_classes * inner.num_voxels());
        for c in 0..self.num_classes {
            for x in 0..inner.w {
                for y in 0..inner.h {
                    let src = c * plane
                        + self
                            .shape
                            .index(x + pad.before[0], y + pad.before[1], pad.before[2]);
                    data.extend_from_slice(&self.data[src..src + inner.d]);
                }
            }
        }
        Self {
            num_classes: self.num_classes,
            shape: inner,
            data,
        }
    }
}

/// Sums patch probabilities and visit counts over a padded volume.
#[derive(Debug, Clone)]
pub struct ScoreAccumulator {
    scores: ScoreMap,
    counts: VisitCount,
}

impl ScoreAccumulator {
    /// Zeroed accumulator over the padded shape.
    pub fn new(num_classes: usize, padded: Shape3) -> Self {
        Self {
            scores: ScoreMap::zeros(num_classes, padded),
            counts: VisitCount::zeros(padded),
        }
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.scores.num_classes
    }

    /// Visit counts so far.
    pub fn visit_counts(&self) -> &VisitCount {
        &self.counts
    }

    /// Raw (unnormalized) sums so far.
    pub fn raw_scores(&self) -> &ScoreMap {
        &self.scores
    }

    /// Add one patch of probabilities laid out `(C, pw, ph, pd)`.
    pub fn add_patch(&mut self, patch: &Patch, probabilities: &[f32]) -> Result<()> {
        let ps = patch.shape;
        let plane = ps.num_voxels();
        let expected = self.num_classes() * plane;
        if probabilities.len() != expected {
            return Err(SegCoreError::LengthMismatch {
                expected,
                got: probabilities.len(),
            });
        }
        let full = self.scores.shape;
        let [ox, oy, oz] = patch.offset;
        if ox + ps.w > full.w || oy + ps.h > full.h || oz + ps.d > full.d {
            return Err(SegCoreError::ShapeMismatch {
                expected: full.as_array().to_vec(),
                got: vec![ox + ps.w, oy + ps.h, oz + ps.d],
            });
        }

        let full_plane = full.num_voxels();
        for c in 0..self.num_classes() {
            for x in 0..ps.w {
                for y in 0..ps.h {
                    let src = c * plane + ps.index(x, y, 0);
                    let dst = c * full_plane + full.index(ox + x, oy + y, oz);
                    let src_row = &probabilities[src..src + ps.d];
                    let dst_row = &mut self.scores.data[dst..dst + ps.d];
                    for (d, s) in dst_row.iter_mut().zip(src_row) {
                        *d += *s;
                    }
                }
            }
        }

        for x in 0..ps.w {
            for y in 0..ps.h {
                let dst = full.index(ox + x, oy + y, oz);
                for count in &mut self.counts.data_mut()[dst..dst + ps.d] {
                    *count += 1;
                }
            }
        }
        Ok(())
    }

    /// Divide by visit counts, reduce to labels and crop away the padding.
    ///
    /// Fails with [`SegCoreError::Coverage`] if any voxel was never visited.
    pub fn finalize(self, pad: &PadSpec) -> Result<(LabelMap, ScoreMap)> {
        let Self { mut scores, counts } = self;
        let shape = counts.shape();

        if let Some(idx) = counts.data().iter().position(|&c| c == 0) {
            let d = shape.d;
            let h = shape.h;
            return Err(SegCoreError::Coverage {
                x: idx / (h * d),
                y: (idx / d) % h,
                z: idx % d,
            });
        }

        let n = shape.num_voxels();
        for c in 0..scores.num_classes {
            let plane = &mut scores.data[c * n..(c + 1) * n];
            for (v, &count) in plane.iter_mut().zip(counts.data()) {
                *v /= count as f32;
            }
        }

        let labels = scores.argmax().crop(pad);
        Ok((labels, scores.crop(pad)))
    }
}
