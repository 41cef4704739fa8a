//! Reference network configuration.

use burn::config::Config;
use serde::{Deserialize, Serialize};

/// Which [`ModelOutput`](crate::nn::ModelOutput) variant the reference network returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputKind {
    /// Plain logits.
    #[default]
    Logits,
    /// `(auxiliary, logits)` pair.
    WithAuxiliary,
    /// Map with `"pred"` and `"aux"` entries.
    Keyed,
}

/// Configuration for [`SegNet3d`](crate::nn::SegNet3d).
#[derive(Config, Debug)]
pub struct SegNetConfig {
    /// Number of output classes, background included.
    pub num_classes: usize,

    /// Input channels.
    #[config(default = 1)]
    pub in_channels: usize,

    /// Channels of each conv/batch-norm/relu block.
    #[config(default = "vec![8, 16]")]
    pub features: Vec<usize>,

    /// Output variant.
    #[config(default = "OutputKind::Logits")]
    pub output: OutputKind,
}

impl SegNetConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_classes < 2 {
            return Err("num_classes must be at least 2".to_string());
        }
        if self.in_channels == 0 {
            return Err("in_channels must be positive".to_string());
        }
        if self.features.iter().any(|&f| f == 0) {
            return Err("feature widths must be positive".to_string());
        }
        Ok(())
    }
}
