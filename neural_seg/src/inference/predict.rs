//! Whole-directory prediction and offline scoring of written predictions.

use std::path::Path;

use burn::prelude::*;
use seg_core::{CaseMetric, DatasetKind, MetricTotals};
use seg_io::{
    list_files, load_from_file, prediction_file_name, save_to_file, CasePaths, ImageVolume,
    LabelVolume,
};

use super::VolumetricInferenceEngine;
use crate::error::Result;
use crate::nn::SegmentationModel;

/// File extension of written predictions.
pub const PREDICTION_EXT: &str = "svol";

/// Segment every case and write `u8` predictions into `output_dir`.
///
/// Each prediction keeps the spacing, origin and direction of its scan and is
/// named by [`prediction_file_name`]. Returns the written paths in case order.
pub fn predict_cases<B: Backend, M: SegmentationModel<B>>(
    engine: &VolumetricInferenceEngine<B>,
    model: &M,
    cases: &[CasePaths],
    output_dir: &Path,
) -> Result<Vec<std::path::PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    let mut written = Vec::with_capacity(cases.len());

    for (i, case) in cases.iter().enumerate() {
        log::info!("processing {} ({}/{})", case.case_id(), i + 1, cases.len());
        let scan: ImageVolume = load_from_file(&case.image)?;
        let (labels, _) = engine.infer(model, &scan.grid)?;
        log::info!("{} classes present: {:?}", case.case_id(), labels.present_classes());

        let path = output_dir.join(prediction_file_name(&case.name, PREDICTION_EXT)?);
        save_to_file(&scan.with_grid(labels), &path)?;
        written.push(path);
    }
    Ok(written)
}

/// Scores of a prediction directory against its references.
#[derive(Debug, Clone)]
pub struct PredictionReport {
    /// Mean Dice per foreground class.
    pub per_class_dice: Vec<f64>,
    /// Mean Dice over classes.
    pub mean_dice: f64,
    /// Mean Jaccard over cases and classes, `J = D / (2 - D)` per pair.
    pub mean_jaccard: f64,
    /// Number of scored cases.
    pub cases: usize,
}

impl PredictionReport {
    /// Log per-class Dice with class names, then the averages.
    pub fn log(&self, dataset: DatasetKind) {
        for (i, dice) in self.per_class_dice.iter().enumerate() {
            let name = dataset.class_name(i + 1).unwrap_or("?");
            log::info!("{i}class {name} dice:{dice}");
        }
        log::info!("dataset_{dataset} avg_jaccard:{}", self.mean_jaccard);
        log::info!("avg_dice:{}", self.mean_dice);
    }
}

/// Score every prediction in `pred_dir` against `label_dir`.
///
/// References are listed from `label_dir` and paired with the prediction named
/// by [`prediction_file_name`]. References without a prediction are skipped
/// with a warning.
pub fn evaluate_predictions(
    pred_dir: &Path,
    label_dir: &Path,
    num_classes: usize,
    metric: &dyn CaseMetric,
) -> Result<PredictionReport> {
    let mut totals = MetricTotals::new(num_classes);
    let mut jaccard_sum = 0.0;
    let mut jaccard_count = 0usize;

    for name in list_files(label_dir)? {
        let pred_path = pred_dir.join(prediction_file_name(&name, PREDICTION_EXT)?);
        if !pred_path.is_file() {
            log::warn!("no prediction for {name} at {}", pred_path.display());
            continue;
        }
        let reference: LabelVolume = load_from_file(label_dir.join(&name))?;
        let prediction: LabelVolume = load_from_file(&pred_path)?;

        let scores = metric.evaluate(&prediction.grid, &reference.grid, num_classes)?;
        for s in &scores {
            jaccard_sum += s.dice / (2.0 - s.dice);
            jaccard_count += 1;
        }
        totals.add_case(&scores);
    }

    Ok(PredictionReport {
        per_class_dice: totals.mean_dice_per_class(),
        mean_dice: totals.mean_dice(),
        mean_jaccard: if jaccard_count == 0 {
            0.0
        } else {
            jaccard_sum / jaccard_count as f64
        },
        cases: totals.cases,
    })
}
