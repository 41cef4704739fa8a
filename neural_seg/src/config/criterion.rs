//! Supervised criterion configuration.

use burn::config::Config;

/// Configuration of the supervised loss on labeled batches.
///
/// `name` selects the criterion: `"CELoss"` or `"OHEM"`.
#[derive(Config, Debug)]
pub struct CriterionConfig {
    /// Criterion name.
    #[config(default = "String::from(\"CELoss\")")]
    pub name: String,

    /// Target value excluded from the loss.
    #[config(default = 255)]
    pub ignore_index: u8,

    /// OHEM: voxels whose target probability is below this are always kept.
    #[config(default = 0.7)]
    pub thresh: f32,

    /// OHEM: minimum number of hardest voxels kept per batch.
    #[config(default = 200000)]
    pub min_kept: usize,
}

impl Default for CriterionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CriterionConfig::default();
        assert_eq!(config.name, "CELoss");
        assert_eq!(config.ignore_index, 255);
    }
}
