//! Mean-teacher training configuration.

use burn::config::Config;
use burn::optim::AdamWConfig;
use seg_core::{DatasetKind, DEFAULT_EMA_CEILING, DEFAULT_LR_POWER};

use super::{CriterionConfig, InferenceConfig};

/// Configuration for [`ConsistencyTrainer`](crate::training::ConsistencyTrainer).
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Validation sliding-window settings. Its `num_classes` must match ours.
    pub validation: InferenceConfig,

    /// Number of epochs.
    #[config(default = 100)]
    pub epochs: usize,

    /// Batch size per replica.
    #[config(default = 2)]
    pub batch_size: usize,

    /// Training crop extent.
    #[config(default = "[64, 160, 160]")]
    pub crop_size: [usize; 3],

    /// Number of classes, background included.
    #[config(default = 14)]
    pub num_classes: usize,

    /// Dataset name, used for class names in evaluation logs.
    #[config(default = "String::from(\"flare22\")")]
    pub dataset: String,

    /// Teacher confidence at or above which a pseudo label is trusted.
    #[config(default = 0.95)]
    pub conf_thresh: f32,

    /// Base learning rate.
    #[config(default = 0.001)]
    pub base_lr: f64,

    /// AdamW weight decay.
    #[config(default = 0.01)]
    pub weight_decay: f32,

    /// AdamW first moment decay.
    #[config(default = 0.9)]
    pub beta_1: f32,

    /// AdamW second moment decay.
    #[config(default = 0.999)]
    pub beta_2: f32,

    /// Exponent of the polynomial learning-rate decay.
    #[config(default = "DEFAULT_LR_POWER")]
    pub lr_power: f64,

    /// Upper bound of the teacher EMA ratio.
    #[config(default = "DEFAULT_EMA_CEILING")]
    pub ema_ceiling: f64,

    /// Maximum consistency weight.
    #[config(default = 0.1)]
    pub consistency: f64,

    /// Ramp-up length, in units of `rampup_interval` iterations.
    #[config(default = 200.0)]
    pub consistency_rampup: f64,

    /// Iterations per ramp-up unit.
    #[config(default = 200)]
    pub rampup_interval: usize,

    /// Scale the unsupervised term by the ramped consistency weight.
    /// Off by default: the weight is computed and reported only.
    #[config(default = false)]
    pub apply_consistency_weight: bool,

    /// Fraction of total iterations after which evaluation may run.
    #[config(default = 0.7)]
    pub eval_start_fraction: f64,

    /// Evaluate on epochs divisible by this.
    #[config(default = 5)]
    pub eval_every: usize,

    /// Best mean Dice assumed before the first evaluation.
    #[config(default = 0.0)]
    pub initial_best_dice: f64,

    /// Progress log lines per epoch.
    #[config(default = 3)]
    pub log_per_epoch: usize,

    /// Supervised criterion.
    #[config(default = "CriterionConfig::new()")]
    pub criterion: CriterionConfig,

    /// Directory holding `latest/` and best checkpoints.
    #[config(default = "String::from(\"checkpoints\")")]
    pub checkpoint_dir: String,

    /// Optional checkpoint directory to initialize the teacher from.
    #[config(default = "None")]
    pub teacher_init: Option<String>,

    /// Seed for samplers and synthetic data.
    #[config(default = 42)]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new(InferenceConfig::new(14))
    }
}

impl TrainingConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.validation.validate()?;

        if self.validation.num_classes != self.num_classes {
            return Err(format!(
                "validation.num_classes ({}) differs from num_classes ({})",
                self.validation.num_classes, self.num_classes
            ));
        }
        if self.epochs == 0 {
            return Err("epochs must be positive".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be positive".to_string());
        }
        if self.crop_size.iter().any(|&c| c == 0) {
            return Err("crop_size must be positive on every axis".to_string());
        }
        if self.base_lr <= 0.0 {
            return Err("base_lr must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.conf_thresh) {
            return Err("conf_thresh must lie in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.ema_ceiling) {
            return Err("ema_ceiling must lie in [0, 1]".to_string());
        }
        if self.rampup_interval == 0 {
            return Err("rampup_interval must be positive".to_string());
        }
        if self.eval_every == 0 {
            return Err("eval_every must be positive".to_string());
        }
        if self.log_per_epoch == 0 {
            return Err("log_per_epoch must be positive".to_string());
        }
        self.dataset_kind()?;
        Ok(())
    }

    /// Parsed dataset.
    pub fn dataset_kind(&self) -> Result<DatasetKind, String> {
        self.dataset.parse()
    }

    /// AdamW optimizer settings.
    pub fn optimizer(&self) -> AdamWConfig {
        AdamWConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_weight_decay(self.weight_decay)
    }
}
