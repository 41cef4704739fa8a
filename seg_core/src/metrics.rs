//! Per-class overlap and boundary-distance metrics.
//!
//! The conventions for empty masks follow the usual evaluation scripts:
//! both masks non-empty gives `(dice, hd95)`, a non-empty prediction against
//! an empty reference gives `(1, 0)`, anything else gives `(0, 0)`.

use crate::error::{Result, SegCoreError};
use crate::types::{LabelMap, Shape3};

/// Dice and 95th-percentile Hausdorff distance for one class of one case.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClassScore {
    /// Dice overlap in `[0, 1]`.
    pub dice: f64,
    /// 95th-percentile symmetric surface distance, in voxels.
    pub hd95: f64,
}

/// Computes per-class scores for a prediction against its reference.
pub trait CaseMetric: Send + Sync {
    /// Scores for foreground classes `1..num_classes`, in class order.
    fn evaluate(
        &self,
        prediction: &LabelMap,
        reference: &LabelMap,
        num_classes: usize,
    ) -> Result<Vec<ClassScore>>;
}

/// Dice plus HD95 from a Euclidean distance transform of the boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiceHd95;

impl CaseMetric for DiceHd95 {
    fn evaluate(
        &self,
        prediction: &LabelMap,
        reference: &LabelMap,
        num_classes: usize,
    ) -> Result<Vec<ClassScore>> {
        if prediction.shape() != reference.shape() {
            return Err(SegCoreError::ShapeMismatch {
                expected: reference.shape().as_array().to_vec(),
                got: prediction.shape().as_array().to_vec(),
            });
        }
        let shape = prediction.shape();
        Ok((1..num_classes)
            .map(|class| {
                let pred: Vec<bool> = prediction.data().iter().map(|&l| l as usize == class).collect();
                let gt: Vec<bool> = reference.data().iter().map(|&l| l as usize == class).collect();
                class_score(shape, &pred, &gt)
            })
            .collect())
    }
}

fn class_score(shape: Shape3, pred: &[bool], gt: &[bool]) -> ClassScore {
    let pred_any = pred.iter().any(|&p| p);
    let gt_any = gt.iter().any(|&g| g);
    match (pred_any, gt_any) {
        (true, true) => ClassScore {
            dice: binary_dice(pred, gt),
            hd95: hd95(shape, pred, gt),
        },
        (true, false) => ClassScore { dice: 1.0, hd95: 0.0 },
        _ => ClassScore::default(),
    }
}

/// `2 |A ∩ B| / (|A| + |B|)`; 0 when both masks are empty.
pub fn binary_dice(pred: &[bool], gt: &[bool]) -> f64 {
    let mut inter = 0usize;
    let mut total = 0usize;
    for (&p, &g) in pred.iter().zip(gt) {
        inter += usize::from(p && g);
        total += usize::from(p) + usize::from(g);
    }
    if total == 0 {
        0.0
    } else {
        2.0 * inter as f64 / total as f64
    }
}

/// Mask voxels with at least one face neighbour outside the mask.
fn boundary(shape: Shape3, mask: &[bool]) -> Vec<bool> {
    let dims = [shape.w as i64, shape.h as i64, shape.d as i64];
    let inside = |x: i64, y: i64, z: i64| {
        x >= 0
            && y >= 0
            && z >= 0
            && x < dims[0]
            && y < dims[1]
            && z < dims[2]
            && mask[shape.index(x as usize, y as usize, z as usize)]
    };
    const FACES: [[i64; 3]; 6] = [
        [1, 0, 0],
        [-1, 0, 0],
        [0, 1, 0],
        [0, -1, 0],
        [0, 0, 1],
        [0, 0, -1],
    ];

    let mut out = vec![false; mask.len()];
    for x in 0..dims[0] {
        for y in 0..dims[1] {
            for z in 0..dims[2] {
                if inside(x, y, z) && FACES.iter().any(|f| !inside(x + f[0], y + f[1], z + f[2])) {
                    out[shape.index(x as usize, y as usize, z as usize)] = true;
                }
            }
        }
    }
    out
}

/// Stand-in for "no site on this line"; far above any squared distance in a
/// real grid while keeping the parabola intersections finite.
const FAR: f64 = 1e20;

/// Lower envelope of parabolas `(q - p)^2 + f[p]` over one line.
fn transform_line(f: &[f64], out: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    let intersect = |p: usize, q: usize| {
        let (pf, qf) = (p as f64, q as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * (qf - pf))
    };

    let mut k = 0;
    v[0] = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;
    for q in 1..n {
        let mut s = intersect(v[k], q);
        while s <= z[k] {
            k -= 1;
            s = intersect(v[k], q);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, o) in out.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let d = q as f64 - v[k] as f64;
        *o = d * d + f[v[k]];
    }
}

/// Exact squared Euclidean distance from every voxel to the nearest site,
/// one separable pass per axis.
fn squared_distance_field(shape: Shape3, sites: &[bool]) -> Vec<f64> {
    let mut field: Vec<f64> = sites.iter().map(|&s| if s { 0.0 } else { FAR }).collect();
    let dims = [shape.w, shape.h, shape.d];
    let strides = [shape.h * shape.d, shape.d, 1];

    for axis in 0..3 {
        let (n, stride) = (dims[axis], strides[axis]);
        if n == 0 {
            return field;
        }
        let mut line = vec![0.0; n];
        let mut out = vec![0.0; n];
        let mut v = vec![0usize; n];
        let mut z = vec![0.0; n + 1];
        for start in 0..field.len() {
            if (start / stride) % n != 0 {
                continue;
            }
            for (i, l) in line.iter_mut().enumerate() {
                *l = field[start + i * stride];
            }
            transform_line(&line, &mut out, &mut v, &mut z);
            for (i, &o) in out.iter().enumerate() {
                field[start + i * stride] = o;
            }
        }
    }
    field
}

/// Distance from each `from` voxel to the nearest `to` voxel.
fn directed_distances<'a>(shape: Shape3, from: &'a [bool], to: &[bool]) -> impl Iterator<Item = f64> + 'a {
    let field = squared_distance_field(shape, to);
    from.iter()
        .zip(field)
        .filter(|&(&f, _)| f)
        .map(|(_, d)| d.sqrt())
}

/// Linear-interpolated percentile of unsorted samples.
fn percentile(mut values: Vec<f64>, q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = q / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let t = rank - lo as f64;
    values[lo] * (1.0 - t) + values[hi] * t
}

/// 95th percentile of the symmetric boundary distances, in voxel units.
pub fn hd95(shape: Shape3, pred: &[bool], gt: &[bool]) -> f64 {
    let pb = boundary(shape, pred);
    let gb = boundary(shape, gt);
    if !pb.iter().any(|&b| b) || !gb.iter().any(|&b| b) {
        return 0.0;
    }
    let mut all: Vec<f64> = directed_distances(shape, &pb, &gb).collect();
    all.extend(directed_distances(shape, &gb, &pb));
    percentile(all, 95.0)
}

/// Running per-class sums, so shards can be reduced before averaging.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTotals {
    /// Sum of Dice per foreground class.
    pub dice: Vec<f64>,
    /// Sum of HD95 per foreground class.
    pub hd95: Vec<f64>,
    /// Number of cases folded in.
    pub cases: usize,
}

impl MetricTotals {
    /// Empty totals for `num_classes` classes (background excluded).
    pub fn new(num_classes: usize) -> Self {
        let n = num_classes.saturating_sub(1);
        Self {
            dice: vec![0.0; n],
            hd95: vec![0.0; n],
            cases: 0,
        }
    }

    /// Fold one case in.
    pub fn add_case(&mut self, scores: &[ClassScore]) {
        for (i, s) in scores.iter().enumerate().take(self.dice.len()) {
            self.dice[i] += s.dice;
            self.hd95[i] += s.hd95;
        }
        self.cases += 1;
    }

    /// Flatten for an all-reduce: dice sums, hd95 sums, then the case count.
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = self.dice.clone();
        flat.extend(&self.hd95);
        flat.push(self.cases as f64);
        flat
    }

    /// Inverse of [`MetricTotals::to_flat`].
    pub fn from_flat(flat: &[f64]) -> Result<Self> {
        if flat.is_empty() || flat.len() % 2 == 0 {
            return Err(SegCoreError::LengthMismatch {
                expected: 2 * (flat.len() / 2) + 1,
                got: flat.len(),
            });
        }
        let n = flat.len() / 2;
        Ok(Self {
            dice: flat[..n].to_vec(),
            hd95: flat[n..2 * n].to_vec(),
            cases: flat[2 * n].round() as usize,
        })
    }

    /// Per-class mean Dice.
    pub fn mean_dice_per_class(&self) -> Vec<f64> {
        let n = self.cases.max(1) as f64;
        self.dice.iter().map(|d| d / n).collect()
    }

    /// Mean Dice over classes and cases.
    pub fn mean_dice(&self) -> f64 {
        mean(&self.mean_dice_per_class())
    }

    /// Mean HD95 over classes and cases.
    pub fn mean_hd95(&self) -> f64 {
        let n = self.cases.max(1) as f64;
        mean(&self.hd95.iter().map(|h| h / n).collect::<Vec<_>>())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
