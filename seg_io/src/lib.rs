//! seg_io - volume files and dataset layout for volumetric segmentation.
//!
//! This crate is the storage layer under the inference and training code:
//!
//! - [`format`]: the `.svol` binary format, one dense grid plus its spacing,
//!   origin and direction
//! - [`dataset`]: pairing scans with labels on disk and naming predictions
//!
//! # Example
//!
//! ```ignore
//! use seg_io::{discover_cases, load_from_file, prediction_file_name, ImageVolume};
//!
//! for case in discover_cases("test/".as_ref(), "test_label/".as_ref())? {
//!     let scan: ImageVolume = load_from_file(&case.image)?;
//!     let out = prediction_file_name(&case.name, "svol")?;
//!     // ...
//! }
//! ```

#![warn(missing_docs)]

pub mod dataset;
pub mod error;
pub mod format;

pub use seg_core::{Grid3, LabelMap, Shape3, Volume};

pub use dataset::{discover_cases, list_files, prediction_file_name, CasePaths};
pub use error::{Result, SegIoError};
pub use format::{
    compute_file_size, load_from_file, load_grid, load_labels, load_volume, save_grid,
    save_labels, save_to_file, save_volume, ElementKind, ImageVolume, LabelVolume, SpatialMeta,
    SpatialVolume, SvolHeader, VoxelElement, HEADER_SIZE, SVOL_MAGIC,
};
