//! `.svol` header definition.

use seg_core::Shape3;

/// Magic bytes for the `.svol` format.
pub const SVOL_MAGIC: [u8; 4] = *b"SVOL";

/// Current format version.
pub const SVOL_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 192;

/// Voxel element type stored after the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// 32-bit float intensities.
    F32,
    /// 8-bit class ids.
    U8,
}

impl ElementKind {
    /// Bytes per voxel.
    pub const fn size(&self) -> usize {
        match self {
            Self::F32 => 4,
            Self::U8 => 1,
        }
    }

    const fn code(&self) -> u16 {
        match self {
            Self::F32 => 0,
            Self::U8 => 1,
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::F32),
            1 => Some(Self::U8),
            _ => None,
        }
    }
}

/// Physical placement of a volume: voxel spacing, world origin and axis directions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialMeta {
    /// Voxel size along each axis.
    pub spacing: [f64; 3],
    /// World position of voxel `(0, 0, 0)`.
    pub origin: [f64; 3],
    /// Row-major 3x3 direction cosines.
    pub direction: [f64; 9],
}

impl Default for SpatialMeta {
    fn default() -> Self {
        Self {
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// `.svol` file header.
///
/// Layout (192 bytes total, little-endian):
/// - Bytes 0-3: Magic "SVOL"
/// - Bytes 4-5: version (u16)
/// - Bytes 6-7: element kind (u16, 0 = f32, 1 = u8)
/// - Bytes 8-19: shape (3 x u32)
/// - Bytes 20-23: flags (u32)
/// - Bytes 24-47: spacing (3 x f64)
/// - Bytes 48-71: origin (3 x f64)
/// - Bytes 72-143: direction (9 x f64)
/// - Bytes 144-191: reserved
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvolHeader {
    /// Magic bytes "SVOL".
    pub magic: [u8; 4],
    /// Format version.
    pub version: u16,
    /// Raw element kind code.
    pub kind: u16,
    /// Volume extent.
    pub shape: [u32; 3],
    /// Flags (reserved for future use).
    pub flags: u32,
    /// Spatial placement.
    pub meta: SpatialMeta,
}

impl SvolHeader {
    /// Create a header for a volume of the given kind and shape.
    pub fn new(kind: ElementKind, shape: Shape3, meta: SpatialMeta) -> Self {
        Self {
            magic: SVOL_MAGIC,
            version: SVOL_VERSION,
            kind: kind.code(),
            shape: [shape.w as u32, shape.h as u32, shape.d as u32],
            flags: 0,
            meta,
        }
    }

    /// Validate magic and version.
    pub fn is_valid(&self) -> bool {
        self.magic == SVOL_MAGIC && self.version == SVOL_VERSION
    }

    /// Decoded element kind, if the code is known.
    pub fn element_kind(&self) -> Option<ElementKind> {
        ElementKind::from_code(self.kind)
    }

    /// Volume extent.
    pub fn shape(&self) -> Shape3 {
        Shape3::new(
            self.shape[0] as usize,
            self.shape[1] as usize,
            self.shape[2] as usize,
        )
    }

    /// Serialize the header to a byte array.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.kind.to_le_bytes());
        for (i, s) in self.shape.iter().enumerate() {
            bytes[8 + 4 * i..12 + 4 * i].copy_from_slice(&s.to_le_bytes());
        }
        bytes[20..24].copy_from_slice(&self.flags.to_le_bytes());

        let floats = self
            .meta
            .spacing
            .iter()
            .chain(&self.meta.origin)
            .chain(&self.meta.direction);
        for (i, v) in floats.enumerate() {
            bytes[24 + 8 * i..32 + 8 * i].copy_from_slice(&v.to_le_bytes());
        }

        bytes
    }

    /// Deserialize a header from a byte array.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        let f64_at = |o: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[o..o + 8]);
            f64::from_le_bytes(raw)
        };

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);

        let mut meta = SpatialMeta::default();
        for i in 0..3 {
            meta.spacing[i] = f64_at(24 + 8 * i);
            meta.origin[i] = f64_at(48 + 8 * i);
        }
        for i in 0..9 {
            meta.direction[i] = f64_at(72 + 8 * i);
        }

        Self {
            magic,
            version: u16::from_le_bytes([bytes[4], bytes[5]]),
            kind: u16::from_le_bytes([bytes[6], bytes[7]]),
            shape: [u32_at(8), u32_at(12), u32_at(16)],
            flags: u32_at(20),
            meta,
        }
    }
}

/// Expected file size for a volume.
pub fn compute_file_size(kind: ElementKind, shape: Shape3) -> usize {
    HEADER_SIZE + kind.size() * shape.num_voxels()
}
