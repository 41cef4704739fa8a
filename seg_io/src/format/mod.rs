//! `.svol` file format support.
//!
//! A `.svol` file stores one dense 3D grid (f32 intensities or u8 labels)
//! together with its voxel spacing, world origin and axis directions, so a
//! prediction can be written back with exactly the placement of its scan.
//!
//! # Example
//!
//! ```ignore
//! use seg_io::{load_from_file, save_to_file, ImageVolume};
//!
//! let scan: ImageVolume = load_from_file("imagesTs/case_0001_0000.svol")?;
//! let prediction = scan.with_grid(labels);
//! save_to_file(&prediction, "preds/case_0001.svol")?;
//! ```

pub mod header;
pub mod volume;

pub use header::{
    compute_file_size, ElementKind, SpatialMeta, SvolHeader, HEADER_SIZE, SVOL_MAGIC, SVOL_VERSION,
};
pub use volume::{
    load_from_file, load_grid, load_labels, load_volume, save_grid, save_labels, save_to_file,
    save_volume, ImageVolume, LabelVolume, SpatialVolume, VoxelElement,
};
