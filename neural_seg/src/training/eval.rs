//! Validation during training, sharded across replicas.

use burn::prelude::*;
use seg_core::{CaseMetric, DatasetKind, LabelMap, MetricTotals, Volume};

use crate::distributed::DistributedContext;
use crate::error::Result;
use crate::inference::VolumetricInferenceEngine;
use crate::nn::SegmentationModel;

/// One held-out volume with its reference labels.
#[derive(Debug, Clone)]
pub struct ValidationCase {
    /// Case identifier.
    pub name: String,
    /// Scan intensities.
    pub image: Volume,
    /// Reference labels.
    pub label: LabelMap,
}

/// Metric sums of this replica's shard, reduced over all replicas.
pub fn evaluate_sharded<B: Backend, M: SegmentationModel<B>>(
    engine: &VolumetricInferenceEngine<B>,
    model: &M,
    cases: &[ValidationCase],
    metric: &dyn CaseMetric,
    ctx: &DistributedContext,
) -> Result<MetricTotals> {
    let num_classes = engine.config().num_classes;
    let mut totals = MetricTotals::new(num_classes);
    for case in ctx.shard(cases) {
        let (labels, _) = engine.infer(model, &case.image)?;
        totals.add_case(&metric.evaluate(&labels, &case.label, num_classes)?);
        log::debug!("rank {} evaluated {}", ctx.rank(), case.name);
    }

    let mut flat = totals.to_flat();
    ctx.all_reduce_sum_f64(&mut flat)?;
    Ok(MetricTotals::from_flat(&flat)?)
}

/// Student and teacher scores of one evaluation.
#[derive(Debug, Clone)]
pub struct EvalSummary {
    /// Student totals.
    pub student: MetricTotals,
    /// Teacher totals.
    pub teacher: MetricTotals,
}

impl EvalSummary {
    /// Mean Dice of student and teacher.
    pub fn mean_dice(&self) -> (f64, f64) {
        (self.student.mean_dice(), self.teacher.mean_dice())
    }

    /// Mean HD95 of student and teacher.
    pub fn mean_hd95(&self) -> (f64, f64) {
        (self.student.mean_hd95(), self.teacher.mean_hd95())
    }

    /// Log per-class Dice with class names.
    pub fn log(&self, dataset: DatasetKind) {
        let (hd1, hd2) = self.mean_hd95();
        log::info!(">>>>>> Evaluation <<<<<< model mhd95: {hd1:.3}, ema mhd95: {hd2:.3}");
        let student = self.student.mean_dice_per_class();
        let teacher = self.teacher.mean_dice_per_class();
        for (i, (d1, d2)) in student.iter().zip(&teacher).enumerate() {
            let class = i + 1;
            let name = dataset.class_name(class).unwrap_or("?");
            log::info!("*** Evaluation: Class [{class} {name}] Dice model: {d1:.3}, ema: {d2:.3}");
        }
        let (m1, m2) = self.mean_dice();
        log::info!("*** Evaluation: MeanDice model: {m1:.3}, ema: {m2:.3}");
    }
}
