//! Core volumetric types.
//!
//! All dense arrays are stored row-major with the last axis fastest:
//! `index = (x * h + y) * d + z`.

use crate::error::{Result, SegCoreError};

/// Label value marking voxels that must not contribute to any loss.
pub const IGNORE_LABEL: u8 = 255;

/// Extent of a 3D array along its three axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shape3 {
    /// Axis 0 extent.
    pub w: usize,
    /// Axis 1 extent.
    pub h: usize,
    /// Axis 2 extent.
    pub d: usize,
}

impl Shape3 {
    /// Create a new shape.
    #[inline]
    pub const fn new(w: usize, h: usize, d: usize) -> Self {
        Self { w, h, d }
    }

    /// Cube shape with the same extent on every axis.
    #[inline]
    pub const fn cube(n: usize) -> Self {
        Self { w: n, h: n, d: n }
    }

    /// Extents as an array.
    #[inline]
    pub const fn as_array(&self) -> [usize; 3] {
        [self.w, self.h, self.d]
    }

    /// Total number of voxels.
    #[inline]
    pub const fn num_voxels(&self) -> usize {
        self.w * self.h * self.d
    }

    /// Flat index of a voxel.
    #[inline]
    pub const fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (x * self.h + y) * self.d + z
    }

    /// Whether any axis has zero extent.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0 || self.d == 0
    }
}

impl From<[usize; 3]> for Shape3 {
    #[inline]
    fn from(arr: [usize; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }
}

impl From<Shape3> for [usize; 3] {
    #[inline]
    fn from(shape: Shape3) -> Self {
        shape.as_array()
    }
}

/// Symmetric constant padding applied to a volume smaller than the patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PadSpec {
    /// Voxels added before the data on each axis.
    pub before: [usize; 3],
    /// Voxels added after the data on each axis.
    pub after: [usize; 3],
}

impl PadSpec {
    /// Compute the padding needed so every axis is at least as large as the patch.
    ///
    /// The total pad on an axis is split `floor/ceil` between the two sides.
    pub fn for_patch(volume: Shape3, patch: Shape3) -> Self {
        let mut before = [0; 3];
        let mut after = [0; 3];
        let v = volume.as_array();
        let p = patch.as_array();
        for axis in 0..3 {
            let total = p[axis].saturating_sub(v[axis]);
            before[axis] = total / 2;
            after[axis] = total - total / 2;
        }
        Self { before, after }
    }

    /// Whether this pad adds anything.
    pub fn is_noop(&self) -> bool {
        self.before == [0; 3] && self.after == [0; 3]
    }

    /// Shape after padding `shape`.
    pub fn padded(&self, shape: Shape3) -> Shape3 {
        Shape3::new(
            shape.w + self.before[0] + self.after[0],
            shape.h + self.before[1] + self.after[1],
            shape.d + self.before[2] + self.after[2],
        )
    }
}

/// Dense 3D array.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid3<T> {
    shape: Shape3,
    data: Vec<T>,
}

/// Scalar intensity volume.
pub type Volume = Grid3<f32>;

/// Per-voxel class ids.
pub type LabelMap = Grid3<u8>;

/// Per-voxel count of covering patches.
pub type VisitCount = Grid3<u32>;

impl<T: Copy + Default> Grid3<T> {
    /// Wrap a flat buffer, checking its length against the shape.
    pub fn new(shape: Shape3, data: Vec<T>) -> Result<Self> {
        if data.len() != shape.num_voxels() {
            return Err(SegCoreError::LengthMismatch {
                expected: shape.num_voxels(),
                got: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Grid filled with a single value.
    pub fn filled(shape: Shape3, value: T) -> Self {
        Self {
            shape,
            data: vec![value; shape.num_voxels()],
        }
    }

    /// Grid filled with `T::default()`.
    pub fn zeros(shape: Shape3) -> Self {
        Self::filled(shape, T::default())
    }

    /// Build a grid by evaluating `f(x, y, z)` at every voxel.
    pub fn from_fn(shape: Shape3, mut f: impl FnMut(usize, usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(shape.num_voxels());
        for x in 0..shape.w {
            for y in 0..shape.h {
                for z in 0..shape.d {
                    data.push(f(x, y, z));
                }
            }
        }
        Self { shape, data }
    }

    /// Shape of the grid.
    #[inline]
    pub fn shape(&self) -> Shape3 {
        self.shape
    }

    /// Flat data.
    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Mutable flat data.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume the grid and return its buffer.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Value at a voxel.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.data[self.shape.index(x, y, z)]
    }

    /// Set the value at a voxel.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) {
        let idx = self.shape.index(x, y, z);
        self.data[idx] = value;
    }

    /// Pad with a constant fill value.
    pub fn pad(&self, pad: &PadSpec, fill: T) -> Self {
        if pad.is_noop() {
            return self.clone();
        }
        let padded = pad.padded(self.shape);
        let mut out = Self::filled(padded, fill);
        for x in 0..self.shape.w {
            for y in 0..self.shape.h {
                let src = self.shape.index(x, y, 0);
                let dst = padded.index(x + pad.before[0], y + pad.before[1], pad.before[2]);
                out.data[dst..dst + self.shape.d]
                    .copy_from_slice(&self.data[src..src + self.shape.d]);
            }
        }
        out
    }

    /// Remove a padding previously applied with [`Grid3::pad`].
    pub fn crop(&self, pad: &PadSpec) -> Self {
        if pad.is_noop() {
            return self.clone();
        }
        let inner = Shape3::new(
            self.shape.w - pad.before[0] - pad.after[0],
            self.shape.h - pad.before[1] - pad.after[1],
            self.shape.d - pad.before[2] - pad.after[2],
        );
        let mut data = Vec::with_capacity(inner.num_voxels());
        for x in 0..inner.w {
            for y in 0..inner.h {
                let src = self
                    .shape
                    .index(x + pad.before[0], y + pad.before[1], pad.before[2]);
                data.extend_from_slice(&self.data[src..src + inner.d]);
            }
        }
        Self { shape: inner, data }
    }

    /// Copy out a sub-volume starting at `offset`.
    pub fn extract(&self, offset: [usize; 3], extent: Shape3) -> Vec<T> {
        let mut out = Vec::with_capacity(extent.num_voxels());
        for x in 0..extent.w {
            for y in 0..extent.h {
                let src = self.shape.index(offset[0] + x, offset[1] + y, offset[2]);
                out.extend_from_slice(&self.data[src..src + extent.d]);
            }
        }
        out
    }
}

impl LabelMap {
    /// Check every voxel is a valid class id.
    pub fn validate_classes(&self, num_classes: usize) -> Result<()> {
        match self.data.iter().find(|&&l| (l as usize) >= num_classes) {
            Some(&label) => Err(SegCoreError::LabelOutOfRange { label, num_classes }),
            None => Ok(()),
        }
    }

    /// Sorted set of class ids that appear in the map.
    pub fn present_classes(&self) -> Vec<u8> {
        let mut seen = [false; 256];
        for &l in &self.data {
            seen[l as usize] = true;
        }
        (0..=255u8).filter(|&l| seen[l as usize]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_layout() {
        let shape = Shape3::new(2, 3, 4);
        assert_eq!(shape.index(0, 0, 1), 1);
        assert_eq!(shape.index(0, 1, 0), 4);
        assert_eq!(shape.index(1, 0, 0), 12);
        assert_eq!(shape.num_voxels(), 24);
    }

    #[test]
    fn test_pad_spec_floor_ceil_split() {
        let pad = PadSpec::for_patch(Shape3::new(5, 10, 3), Shape3::new(8, 8, 8));
        assert_eq!(pad.before, [1, 0, 2]);
        assert_eq!(pad.after, [2, 0, 3]);
        assert_eq!(pad.padded(Shape3::new(5, 10, 3)), Shape3::new(8, 10, 8));
    }

    #[test]
    fn test_pad_then_crop_restores() {
        let shape = Shape3::new(3, 2, 5);
        let vol = Volume::from_fn(shape, |x, y, z| (x * 100 + y * 10 + z) as f32);
        let pad = PadSpec::for_patch(shape, Shape3::new(6, 6, 6));
        let padded = vol.pad(&pad, 0.0);
        assert_eq!(padded.shape(), Shape3::new(6, 6, 6));
        assert_eq!(padded.get(pad.before[0], pad.before[1], pad.before[2]), 0.0);
        assert_eq!(padded.get(pad.before[0] + 1, pad.before[1], pad.before[2] + 2), 102.0);
        assert_eq!(padded.crop(&pad), vol);
    }

    #[test]
    fn test_extract() {
        let shape = Shape3::new(4, 4, 4);
        let vol = Volume::from_fn(shape, |x, y, z| shape.index(x, y, z) as f32);
        let patch = vol.extract([1, 2, 3], Shape3::new(1, 1, 1));
        assert_eq!(patch, vec![shape.index(1, 2, 3) as f32]);
        assert_eq!(vol.extract([0, 0, 0], Shape3::new(2, 2, 2)).len(), 8);
    }

    #[test]
    fn test_length_check() {
        assert!(Volume::new(Shape3::cube(2), vec![0.0; 7]).is_err());
        assert!(Volume::new(Shape3::cube(2), vec![0.0; 8]).is_ok());
    }

    #[test]
    fn test_label_validation() {
        let labels = LabelMap::new(Shape3::new(1, 1, 3), vec![0, 2, 1]).unwrap();
        assert!(labels.validate_classes(3).is_ok());
        assert!(labels.validate_classes(2).is_err());
        assert_eq!(labels.present_classes(), vec![0, 1, 2]);
    }
}
