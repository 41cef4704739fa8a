//! `.svol` read/write implementation.
//!
//! # Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ HEADER (192 bytes, see `SvolHeader`)                               │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ VOXEL DATA                                                         │
//! │  For each x, for each y, for each z (z fastest):                   │
//! │    f32 LE (images) or u8 (label maps)                              │
//! └────────────────────────────────────────────────────────────────────┘
//! ```

use std::io::{Read, Write};
use std::path::Path;

use seg_core::{Grid3, LabelMap, Volume};

use super::header::{ElementKind, SpatialMeta, SvolHeader, HEADER_SIZE};
use crate::error::{Result, SegIoError};

/// Voxel types that can be stored in a `.svol` file.
pub trait VoxelElement: Copy + Default {
    /// Element kind tag written to the header.
    const KIND: ElementKind;

    /// Append the little-endian encoding of `self`.
    fn write_le(&self, out: &mut Vec<u8>);

    /// Decode from exactly `KIND.size()` bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

impl VoxelElement for f32 {
    const KIND: ElementKind = ElementKind::F32;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl VoxelElement for u8 {
    const KIND: ElementKind = ElementKind::U8;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

/// A dense grid together with its physical placement.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialVolume<T> {
    /// Voxel data.
    pub grid: Grid3<T>,
    /// Spacing, origin and direction.
    pub meta: SpatialMeta,
}

/// Scan intensities with placement.
pub type ImageVolume = SpatialVolume<f32>;

/// Label map with placement.
pub type LabelVolume = SpatialVolume<u8>;

impl<T: VoxelElement> SpatialVolume<T> {
    /// Pair a grid with its placement.
    pub fn new(grid: Grid3<T>, meta: SpatialMeta) -> Self {
        Self { grid, meta }
    }

    /// Replace the data while keeping the placement, as when writing a
    /// prediction next to its source scan.
    pub fn with_grid<U: VoxelElement>(&self, grid: Grid3<U>) -> SpatialVolume<U> {
        SpatialVolume {
            grid,
            meta: self.meta,
        }
    }
}

/// Write a grid with placement in `.svol` format.
pub fn save_grid<T: VoxelElement, W: Write>(volume: &SpatialVolume<T>, writer: &mut W) -> Result<()> {
    let header = SvolHeader::new(T::KIND, volume.grid.shape(), volume.meta);
    writer.write_all(&header.to_bytes())?;

    let mut bytes = Vec::with_capacity(T::KIND.size() * volume.grid.data().len());
    for v in volume.grid.data() {
        v.write_le(&mut bytes);
    }
    writer.write_all(&bytes)?;
    Ok(())
}

/// Read a `.svol` grid. The stored element kind must match `T`.
pub fn load_grid<T: VoxelElement, R: Read>(reader: &mut R) -> Result<SpatialVolume<T>> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = SvolHeader::from_bytes(&header_bytes);

    if !header.is_valid() {
        return Err(SegIoError::format(format!(
            "bad magic or version (magic {:?}, version {})",
            header.magic, header.version
        )));
    }
    let kind = header
        .element_kind()
        .ok_or_else(|| SegIoError::format(format!("unknown element kind {}", header.kind)))?;
    if kind != T::KIND {
        return Err(SegIoError::ElementKindMismatch {
            expected: T::KIND,
            got: kind,
        });
    }

    let shape = header.shape();
    let size = kind.size();
    let mut bytes = vec![0u8; size * shape.num_voxels()];
    reader.read_exact(&mut bytes)?;
    let data: Vec<T> = bytes.chunks_exact(size).map(T::read_le).collect();

    Ok(SpatialVolume {
        grid: Grid3::new(shape, data)?,
        meta: header.meta,
    })
}

/// Write an intensity volume.
pub fn save_volume<W: Write>(volume: &Volume, meta: SpatialMeta, writer: &mut W) -> Result<()> {
    save_grid(&SpatialVolume::new(volume.clone(), meta), writer)
}

/// Read an intensity volume.
pub fn load_volume<R: Read>(reader: &mut R) -> Result<ImageVolume> {
    load_grid(reader)
}

/// Write a label map.
pub fn save_labels<W: Write>(labels: &LabelMap, meta: SpatialMeta, writer: &mut W) -> Result<()> {
    save_grid(&SpatialVolume::new(labels.clone(), meta), writer)
}

/// Read a label map.
pub fn load_labels<R: Read>(reader: &mut R) -> Result<LabelVolume> {
    load_grid(reader)
}

/// Save a grid to a file path.
pub fn save_to_file<T: VoxelElement, P: AsRef<Path>>(volume: &SpatialVolume<T>, path: P) -> Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    save_grid(volume, &mut file)?;
    file.flush()?;
    Ok(())
}

/// Load a grid from a file path.
pub fn load_from_file<T: VoxelElement, P: AsRef<Path>>(path: P) -> Result<SpatialVolume<T>> {
    let mut file = std::io::BufReader::new(std::fs::File::open(path)?);
    load_grid(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seg_core::Shape3;
    use std::io::Cursor;

    fn ramp(shape: Shape3) -> Volume {
        Volume::from_fn(shape, |x, y, z| x as f32 * 0.5 - y as f32 + z as f32 * 2.0)
    }

    #[test]
    fn test_volume_roundtrip_keeps_meta() {
        let meta = SpatialMeta {
            spacing: [0.7, 0.7, 3.0],
            origin: [10.0, -4.0, 2.0],
            ..SpatialMeta::default()
        };
        let vol = ramp(Shape3::new(3, 4, 5));

        let mut buf = Vec::new();
        save_volume(&vol, meta, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 4 * 60);

        let loaded = load_volume(&mut Cursor::new(buf)).unwrap();
        assert_eq!(loaded.grid, vol);
        assert_eq!(loaded.meta, meta);
    }

    #[test]
    fn test_label_roundtrip() {
        let labels = LabelMap::from_fn(Shape3::cube(4), |x, y, z| ((x + y + z) % 3) as u8);
        let mut buf = Vec::new();
        save_labels(&labels, SpatialMeta::default(), &mut buf).unwrap();
        let loaded = load_labels(&mut Cursor::new(buf)).unwrap();
        assert_eq!(loaded.grid, labels);
    }

    #[test]
    fn test_kind_mismatch() {
        let mut buf = Vec::new();
        save_volume(&ramp(Shape3::cube(2)), SpatialMeta::default(), &mut buf).unwrap();
        let err = load_labels(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(
            err,
            SegIoError::ElementKindMismatch {
                expected: ElementKind::U8,
                got: ElementKind::F32
            }
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = vec![0u8; HEADER_SIZE + 8];
        buf[0..4].copy_from_slice(b"NOPE");
        let err = load_labels(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, SegIoError::InvalidFormat { .. }));
    }

    #[test]
    fn test_truncated_data() {
        let mut buf = Vec::new();
        save_volume(&ramp(Shape3::cube(3)), SpatialMeta::default(), &mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(matches!(load_volume(&mut Cursor::new(buf)), Err(SegIoError::Io(_))));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.svol");
        let vol = SpatialVolume::new(ramp(Shape3::new(2, 3, 4)), SpatialMeta::default());
        save_to_file(&vol, &path).unwrap();
        let loaded: ImageVolume = load_from_file(&path).unwrap();
        assert_eq!(loaded, vol);
    }

    #[test]
    fn test_with_grid_keeps_meta() {
        let meta = SpatialMeta {
            origin: [1.0, 2.0, 3.0],
            ..SpatialMeta::default()
        };
        let image = SpatialVolume::new(ramp(Shape3::cube(2)), meta);
        let pred = image.with_grid(LabelMap::zeros(Shape3::cube(2)));
        assert_eq!(pred.meta, meta);
    }
}
