//! Example: segment a directory of scans with a trained checkpoint and score
//! the predictions against reference labels.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p neural_seg --release --example predict -- \
//!     --dataset flare22 \
//!     --image-dir data/test_image --label-dir data/test_label \
//!     --output-dir output/pred --checkpoint checkpoints/latest --ema
//! ```
//!
//! With `--features wgpu` the model runs on GPU `--gpu`.

use std::path::PathBuf;

use burn::config::Config;
use burn::tensor::backend::Backend;
use clap::Parser;

use neural_seg::{
    config::{InferenceConfig, SegNetConfig},
    inference::{evaluate_predictions, predict_cases, VolumetricInferenceEngine},
    nn::OutputSelector,
    training::CheckpointStore,
    NeuralSegError, Result,
};
use seg_core::{DatasetKind, DiceHd95};
use seg_io::discover_cases;

#[cfg(feature = "wgpu")]
type MyBackend = burn::backend::Wgpu;
#[cfg(not(feature = "wgpu"))]
type MyBackend = burn::backend::NdArray;

#[derive(Parser, Debug)]
#[command(about = "Sliding-window prediction and Dice evaluation")]
struct Args {
    /// GPU index (used with the wgpu backend).
    #[arg(long, default_value_t = 0)]
    gpu: usize,

    /// Labeled-data ratio of the checkpoint, used to tag the log.
    #[arg(long, default_value_t = 10)]
    ratio: usize,

    /// Dataset: flare22 or amos.
    #[arg(long, default_value = "flare22")]
    dataset: DatasetKind,

    /// Number of classes; defaults to the dataset's class table.
    #[arg(long)]
    num_classes: Option<usize>,

    /// Number of test volumes to process; defaults to the dataset's test split.
    #[arg(long)]
    test_num: Option<usize>,

    /// Directory of scans.
    #[arg(long, default_value = "test_image")]
    image_dir: PathBuf,

    /// Directory of reference labels, named like the scans.
    #[arg(long, default_value = "test_label")]
    label_dir: PathBuf,

    /// Where predictions are written.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Checkpoint directory holding `model.mpk` / `model_ema.mpk`.
    #[arg(long)]
    checkpoint: PathBuf,

    /// Load the EMA teacher instead of the student.
    #[arg(long)]
    ema: bool,

    /// Network configuration JSON; defaults to `SegNetConfig::new(num_classes)`.
    #[arg(long)]
    model_config: Option<PathBuf>,

    /// Patch extent per axis.
    #[arg(long, num_args = 3, default_values_t = [64, 160, 160])]
    patch_size: Vec<usize>,

    /// In-plane stride.
    #[arg(long, default_value_t = 80)]
    stride_xy: usize,

    /// Slice-axis stride.
    #[arg(long, default_value_t = 32)]
    stride_z: usize,

    /// Output selector: logits, primary, auxiliary or key:<name>.
    #[arg(long, default_value = "logits")]
    selector: OutputSelector,
}

fn device(gpu: usize) -> <MyBackend as Backend>::Device {
    #[cfg(feature = "wgpu")]
    {
        burn::backend::wgpu::WgpuDevice::DiscreteGpu(gpu)
    }
    #[cfg(not(feature = "wgpu"))]
    {
        if gpu != 0 {
            log::warn!("built without the wgpu feature, ignoring --gpu {gpu}");
        }
        Default::default()
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let num_classes = args.num_classes.unwrap_or_else(|| args.dataset.num_classes());
    let test_num = args.test_num.unwrap_or_else(|| args.dataset.default_test_num());
    let device = device(args.gpu);
    log::info!("run tag {}_{}", args.ratio, args.dataset);

    let model_config = match &args.model_config {
        Some(path) => SegNetConfig::load(path).map_err(|e| NeuralSegError::InvalidConfig {
            message: format!("{}: {e}", path.display()),
        })?,
        None => SegNetConfig::new(num_classes),
    };
    let model = model_config.init::<MyBackend>(&device);
    let model = if args.ema {
        CheckpointStore::load_teacher_weights(&args.checkpoint, model, &device)?
    } else {
        CheckpointStore::load_student_weights(&args.checkpoint, model, &device)?
    };
    log::info!("### init weight from {}", args.checkpoint.display());

    let patch: [usize; 3] = [args.patch_size[0], args.patch_size[1], args.patch_size[2]];
    let config = InferenceConfig::new(num_classes)
        .with_patch_size(patch)
        .with_stride_xy(args.stride_xy)
        .with_stride_z(args.stride_z)
        .with_selector(args.selector);
    let engine = VolumetricInferenceEngine::<MyBackend>::new(config, &device)?;

    let mut cases = discover_cases(&args.image_dir, &args.label_dir)?;
    if cases.len() > test_num {
        cases.truncate(test_num);
    } else if cases.len() < test_num {
        log::warn!("expected {test_num} test volumes, found {}", cases.len());
    }

    let written = predict_cases(&engine, &model, &cases, &args.output_dir)?;
    log::info!("wrote {} predictions to {}", written.len(), args.output_dir.display());

    let report = evaluate_predictions(&args.output_dir, &args.label_dir, num_classes, &DiceHd95)?;
    report.log(args.dataset);
    println!("checkpoints from: {}", args.checkpoint.display());
    Ok(())
}
