//! Deterministic sliding-window tiling of a volume into overlapping patches.
//!
//! The scheduler pads any axis that is shorter than the patch, then places
//! `ceil((padded - patch) / stride) + 1` windows per axis. Window `i` starts at
//! `min(i * stride, padded - patch)`, so the last window always ends flush with
//! the far boundary and no window walks off the array.

use crate::error::{Result, SegCoreError};
use crate::types::{PadSpec, Shape3};

/// Per-axis step between consecutive patch offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strides3(pub [usize; 3]);

impl Strides3 {
    /// Same stride on every axis.
    pub const fn uniform(stride: usize) -> Self {
        Self([stride; 3])
    }

    /// Slice-axis convention: axis 0 uses `z`, axes 1 and 2 use `xy`.
    pub const fn from_xy_z(xy: usize, z: usize) -> Self {
        Self([z, xy, xy])
    }

    /// Strides as an array.
    pub const fn as_array(&self) -> [usize; 3] {
        self.0
    }
}

impl From<[usize; 3]> for Strides3 {
    fn from(arr: [usize; 3]) -> Self {
        Self(arr)
    }
}

/// A window into the padded volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    /// Start index on each axis.
    pub offset: [usize; 3],
    /// Window extent.
    pub shape: Shape3,
}

impl Patch {
    /// Half-open index range on each axis.
    pub fn ranges(&self) -> [std::ops::Range<usize>; 3] {
        let [w, h, d] = self.shape.as_array();
        [
            self.offset[0]..self.offset[0] + w,
            self.offset[1]..self.offset[1] + h,
            self.offset[2]..self.offset[2] + d,
        ]
    }

    /// Whether the voxel lies inside this window.
    pub fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        let [rx, ry, rz] = self.ranges();
        rx.contains(&x) && ry.contains(&y) && rz.contains(&z)
    }
}

/// Computes the tiling for one `(volume, patch, stride)` combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchScheduler {
    volume: Shape3,
    patch: Shape3,
    strides: Strides3,
    pad: PadSpec,
    padded: Shape3,
    counts: [usize; 3],
}

impl PatchScheduler {
    /// Plan the tiling. Zero strides and empty patches are rejected.
    pub fn new(volume: Shape3, patch: Shape3, strides: Strides3) -> Result<Self> {
        if strides.0.iter().any(|&s| s == 0) {
            return Err(SegCoreError::InvalidStride { stride: strides.0 });
        }
        if patch.is_empty() {
            return Err(SegCoreError::InvalidPatch {
                patch: patch.as_array(),
            });
        }

        let pad = PadSpec::for_patch(volume, patch);
        let padded = pad.padded(volume);
        let p = padded.as_array();
        let k = patch.as_array();
        let mut counts = [0; 3];
        for axis in 0..3 {
            counts[axis] = (p[axis] - k[axis]).div_ceil(strides.0[axis]) + 1;
        }

        Ok(Self {
            volume,
            patch,
            strides,
            pad,
            padded,
            counts,
        })
    }

    /// Original volume shape.
    pub fn volume_shape(&self) -> Shape3 {
        self.volume
    }

    /// Patch shape.
    pub fn patch_shape(&self) -> Shape3 {
        self.patch
    }

    /// Padding applied before tiling.
    pub fn pad(&self) -> PadSpec {
        self.pad
    }

    /// Shape of the padded volume the patches index into.
    pub fn padded_shape(&self) -> Shape3 {
        self.padded
    }

    /// Number of windows on each axis.
    pub fn counts(&self) -> [usize; 3] {
        self.counts
    }

    /// Total number of windows.
    pub fn len(&self) -> usize {
        self.counts.iter().product()
    }

    /// Always false: every valid plan has at least one window.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of window `i` on `axis`.
    #[inline]
    pub fn axis_offset(&self, axis: usize, i: usize) -> usize {
        let last = self.padded.as_array()[axis] - self.patch.as_array()[axis];
        (i * self.strides.0[axis]).min(last)
    }

    /// Lazily iterate windows, axis 0 outermost and axis 2 innermost.
    pub fn patches(&self) -> PatchIter<'_> {
        PatchIter {
            scheduler: self,
            next: 0,
        }
    }
}

/// Iterator over the windows of a [`PatchScheduler`].
#[derive(Debug, Clone)]
pub struct PatchIter<'a> {
    scheduler: &'a PatchScheduler,
    next: usize,
}

impl Iterator for PatchIter<'_> {
    type Item = Patch;

    fn next(&mut self) -> Option<Patch> {
        let s = self.scheduler;
        if self.next >= s.len() {
            return None;
        }
        let [_, cy, cz] = s.counts;
        let i = self.next / (cy * cz);
        let j = (self.next / cz) % cy;
        let k = self.next % cz;
        self.next += 1;

        Some(Patch {
            offset: [s.axis_offset(0, i), s.axis_offset(1, j), s.axis_offset(2, k)],
            shape: s.patch,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.scheduler.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PatchIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_last_offset() {
        let s = PatchScheduler::new(
            Shape3::cube(64),
            Shape3::cube(32),
            Strides3::uniform(16),
        )
        .unwrap();
        assert_eq!(s.counts(), [3, 3, 3]);
        assert_eq!(s.len(), 27);
        let last = s.patches().last().unwrap();
        assert_eq!(last.offset, [32, 32, 32]);
    }

    #[test]
    fn test_offsets_clamped_to_far_edge() {
        // (70 - 32) / 16 = 2.375 -> 4 windows, last one clamped to 38
        let s = PatchScheduler::new(
            Shape3::new(70, 32, 32),
            Shape3::cube(32),
            Strides3::uniform(16),
        )
        .unwrap();
        assert_eq!(s.counts(), [4, 1, 1]);
        let xs: Vec<usize> = s.patches().map(|p| p.offset[0]).collect();
        assert_eq!(xs, vec![0, 16, 32, 38]);
    }

    #[test]
    fn test_iteration_order() {
        let s = PatchScheduler::new(
            Shape3::new(4, 4, 4),
            Shape3::new(2, 2, 2),
            Strides3::uniform(2),
        )
        .unwrap();
        let offsets: Vec<[usize; 3]> = s.patches().map(|p| p.offset).take(3).collect();
        assert_eq!(offsets, vec![[0, 0, 0], [0, 0, 2], [0, 2, 0]]);
    }

    #[test]
    fn test_small_volume_is_padded() {
        let s = PatchScheduler::new(
            Shape3::new(10, 40, 5),
            Shape3::new(16, 16, 16),
            Strides3::uniform(8),
        )
        .unwrap();
        assert_eq!(s.padded_shape(), Shape3::new(16, 40, 16));
        assert_eq!(s.pad().before, [3, 0, 5]);
        assert_eq!(s.pad().after, [3, 0, 6]);
        assert_eq!(s.counts(), [1, 4, 1]);
    }

    #[test]
    fn test_xy_z_convention() {
        assert_eq!(Strides3::from_xy_z(80, 32).as_array(), [32, 80, 80]);
    }

    #[test]
    fn test_rejects_zero_stride() {
        let err = PatchScheduler::new(Shape3::cube(8), Shape3::cube(4), Strides3([4, 0, 4]));
        assert!(matches!(err, Err(SegCoreError::InvalidStride { .. })));
    }

    #[test]
    fn test_rejects_empty_patch() {
        let err = PatchScheduler::new(Shape3::cube(8), Shape3::new(4, 0, 4), Strides3::uniform(1));
        assert!(matches!(err, Err(SegCoreError::InvalidPatch { .. })));
    }

    #[test]
    fn test_deterministic() {
        let make = || {
            PatchScheduler::new(Shape3::new(50, 37, 61), Shape3::new(16, 20, 24), Strides3([7, 9, 11]))
                .unwrap()
                .patches()
                .collect::<Vec<_>>()
        };
        assert_eq!(make(), make());
    }
}
