//! Sliding-window inference configuration.

use burn::config::Config;
use seg_core::{Shape3, Strides3};

use crate::nn::OutputSelector;

/// Configuration for [`VolumetricInferenceEngine`](crate::inference::VolumetricInferenceEngine).
///
/// Axis 0 is the slice axis: it steps by `stride_z`, axes 1 and 2 step by
/// `stride_xy`, unless `strides` overrides all three.
#[derive(Config, Debug)]
pub struct InferenceConfig {
    /// Number of classes the model predicts, background included.
    pub num_classes: usize,

    /// Patch extent on each axis.
    #[config(default = "[64, 160, 160]")]
    pub patch_size: [usize; 3],

    /// In-plane stride.
    #[config(default = 80)]
    pub stride_xy: usize,

    /// Slice-axis stride.
    #[config(default = 32)]
    pub stride_z: usize,

    /// Explicit per-axis strides, overriding `stride_xy` / `stride_z`.
    #[config(default = "None")]
    pub strides: Option<[usize; 3]>,

    /// Which model output to segment with.
    #[config(default = "OutputSelector::Logits")]
    pub selector: OutputSelector,
}

impl InferenceConfig {
    /// Patch extent as a shape.
    pub fn patch_shape(&self) -> Shape3 {
        Shape3::from(self.patch_size)
    }

    /// Effective per-axis strides.
    pub fn strides(&self) -> Strides3 {
        match self.strides {
            Some(strides) => Strides3(strides),
            None => Strides3::from_xy_z(self.stride_xy, self.stride_z),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_classes < 2 {
            return Err("num_classes must be at least 2".to_string());
        }
        if self.num_classes > 255 {
            return Err("num_classes must fit in a u8 label".to_string());
        }
        if self.patch_size.iter().any(|&p| p == 0) {
            return Err("patch_size must be positive on every axis".to_string());
        }
        if self.strides().as_array().iter().any(|&s| s == 0) {
            return Err("strides must be positive on every axis".to_string());
        }
        Ok(())
    }
}
