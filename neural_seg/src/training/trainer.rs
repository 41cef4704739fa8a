//! Mean-teacher consistency trainer.

use std::path::Path;

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::tensor::backend::AutodiffBackend;
use seg_core::{consistency_weight, ema_ratio, poly_lr, CaseMetric, DatasetKind, DiceHd95, IGNORE_LABEL};

use super::batch::{BatchSource, LabeledBatch, UnlabeledBatch};
use super::checkpoint::CheckpointStore;
use super::ema::ema_update;
use super::eval::{evaluate_sharded, EvalSummary, ValidationCase};
use super::metrics::{EpochMeters, ScalarSink, StepOutput};
use super::state::TrainingState;
use crate::config::TrainingConfig;
use crate::distributed::{all_reduce_gradients, broadcast_module, sync_running_state, DistributedContext};
use crate::error::{NeuralSegError, Result};
use crate::inference::VolumetricInferenceEngine;
use crate::loss::{masked_consistency_loss, voxel_cross_entropy, Criterion};
use crate::nn::SegmentationModel;

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f32> {
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(NeuralSegError::data)?;
    values.first().copied().ok_or_else(|| NeuralSegError::TensorData {
        message: "empty scalar tensor".to_string(),
    })
}

/// Trains a student on labeled and unlabeled batches while an EMA teacher
/// supplies pseudo labels.
///
/// The teacher lives on the inner (non-autodiff) backend, so its forward pass
/// never records a graph. Student and teacher are distinct values; the teacher
/// only changes through [`ema_update`].
pub struct ConsistencyTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    config: TrainingConfig,
    criterion: Criterion,
    dataset: DatasetKind,
    student: M,
    teacher: M::InnerModule,
    optimizer: O,
    state: TrainingState,
    ctx: DistributedContext,
    device: B::Device,
    store: CheckpointStore,
    engine: VolumetricInferenceEngine<B::InnerBackend>,
    metric: Box<dyn CaseMetric>,
}

impl<B, M, O> ConsistencyTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    /// Build a trainer.
    ///
    /// Validates the configuration and resolves the criterion. Every replica
    /// adopts the coordinator's student weights and the teacher starts as a
    /// copy of the student, or from `teacher_init` when set. If
    /// `checkpoint_dir` holds a latest checkpoint, student, teacher,
    /// optimizer and counters are restored from it; an unreadable checkpoint
    /// is an error.
    ///
    /// Clones of a module share its batch-norm running state, so `student`
    /// must not be a clone of a module that is trained elsewhere.
    pub fn new(config: TrainingConfig, student: M, optimizer: O, ctx: DistributedContext, device: &B::Device) -> Result<Self> {
        config.validate().map_err(NeuralSegError::config)?;
        let criterion = Criterion::from_config(&config.criterion)?;
        let dataset = config.dataset_kind().map_err(NeuralSegError::config)?;
        let engine = VolumetricInferenceEngine::new(config.validation.clone(), device)?;

        let student = broadcast_module(student, &ctx)?;
        let teacher = student.valid();
        let state = TrainingState::new(config.initial_best_dice, config.base_lr);
        let store = CheckpointStore::new(&config.checkpoint_dir);

        let mut trainer = Self {
            config,
            criterion,
            dataset,
            student,
            teacher,
            optimizer,
            state,
            ctx,
            device: device.clone(),
            store,
            engine,
            metric: Box::new(DiceHd95),
        };
        if let Some(dir) = trainer.config.teacher_init.clone() {
            trainer.load_teacher(Path::new(&dir))?;
        }
        trainer.resume()
    }

    fn resume(mut self) -> Result<Self> {
        let (dir, state) = match self.store.load_latest_state() {
            Ok(found) => found,
            Err(NeuralSegError::CheckpointNotFound { .. }) => {
                if self.ctx.is_coordinator() {
                    log::info!("no checkpoint in {}, starting fresh", self.store.root().display());
                }
                return Ok(self);
            }
            Err(err) => return Err(err),
        };

        let (student, teacher, optimizer) =
            CheckpointStore::restore::<B, M, O>(&dir, self.student, self.teacher, self.optimizer, &self.device)?;
        self.student = student;
        self.teacher = teacher;
        self.optimizer = optimizer;
        self.state = state;
        if self.ctx.is_coordinator() {
            log::info!(
                "************ Load from checkpoint at epoch {}",
                self.state.epoch.map_or(-1, |e| e as i64)
            );
        }
        Ok(self)
    }

    /// Replace the per-case validation metric.
    pub fn with_metric(mut self, metric: Box<dyn CaseMetric>) -> Self {
        self.metric = metric;
        self
    }

    /// Overwrite the teacher with the student weights stored in a checkpoint.
    pub fn load_teacher(&mut self, dir: &Path) -> Result<()> {
        self.teacher = CheckpointStore::load_student_weights(dir, self.teacher.clone(), &self.device)?;
        if self.ctx.is_coordinator() {
            log::info!("### init teacher weight from {}", dir.display());
        }
        Ok(())
    }

    /// Configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Current progress.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// The student.
    pub fn student(&self) -> &M {
        &self.student
    }

    /// The teacher.
    pub fn teacher(&self) -> &M::InnerModule {
        &self.teacher
    }

    /// This replica's context.
    pub fn context(&self) -> &DistributedContext {
        &self.ctx
    }

    /// One optimizer step on a labeled and an unlabeled batch.
    ///
    /// `iters` is `epoch * batches_per_epoch + i`; it drives the learning
    /// rate of the next step and the EMA ratio applied after this one.
    pub fn train_step(
        &mut self,
        labeled: &LabeledBatch,
        unlabeled: &UnlabeledBatch,
        iters: usize,
        total_iters: usize,
    ) -> Result<StepOutput> {
        let device = self.device.clone();
        let selector = &self.config.validation.selector;

        let teacher_logits = selector.select(self.teacher.forward(unlabeled.weak_tensor::<B::InnerBackend>(&device)))?;
        let (confidence, pseudo) = softmax(teacher_logits, 1).max_dim_with_indices(1);
        let confidence = confidence
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(NeuralSegError::data)?;
        let pseudo = Tensor::<B, 4, Int>::from_inner(pseudo.squeeze::<4>(1));

        let pred_x = selector.select(self.student.forward(labeled.image_tensor::<B>(&device)))?;
        let loss_x = self.criterion.loss(pred_x, labeled.mask_tensor::<B>(&device))?;

        let pred_s = selector.select(self.student.forward(unlabeled.strong_tensor::<B>(&device)))?;
        let per_voxel = voxel_cross_entropy(pred_s, pseudo, IGNORE_LABEL);
        let consistency = masked_consistency_loss(per_voxel, &confidence, &unlabeled.ignore, self.config.conf_thresh)?;
        if consistency.skipped && self.ctx.is_coordinator() {
            log::warn!("unlabeled batch at iter {} is fully ignored, consistency term is zero", self.state.iter_num);
        }

        let weight = consistency_weight(
            self.config.consistency,
            (self.state.iter_num / self.config.rampup_interval) as f64,
            self.config.consistency_rampup,
        );
        let loss_u = if self.config.apply_consistency_weight {
            consistency.loss.mul_scalar(weight as f32)
        } else {
            consistency.loss
        };
        let loss = (loss_x.clone() + loss_u.clone()).div_scalar(2.0);

        let loss_value = scalar(loss.clone())?;
        let loss_x_value = scalar(loss_x)?;
        let loss_u_value = scalar(loss_u)?;

        self.state.iter_num += 1;
        let grads = GradientsParams::from_grads(loss.backward(), &self.student);
        let grads = all_reduce_gradients(&self.student, grads, &self.ctx)?;
        let student = self.optimizer.step(self.state.lr, self.student.clone(), grads);
        self.student = sync_running_state(student, &self.ctx)?;

        self.state.lr = poly_lr(self.config.base_lr, iters, total_iters, self.config.lr_power);
        let ratio = ema_ratio(iters, self.config.ema_ceiling);
        self.teacher = ema_update(self.teacher.clone(), &self.student.valid(), ratio)?;

        Ok(StepOutput {
            loss: loss_value,
            loss_x: loss_x_value,
            loss_u: loss_u_value,
            mask_ratio: consistency.mask_ratio,
            consistency_weight: weight,
            lr: self.state.lr,
            skipped: consistency.skipped,
        })
    }

    fn evaluation_due(&self, epoch: usize, total_iters: usize) -> bool {
        self.state.iter_num as f64 >= self.config.eval_start_fraction * total_iters as f64
            && epoch % self.config.eval_every == 0
    }

    /// Score student and teacher on the validation cases.
    pub fn evaluate(&self, cases: &[ValidationCase]) -> Result<EvalSummary> {
        let student = evaluate_sharded(&self.engine, &self.student.valid(), cases, self.metric.as_ref(), &self.ctx)?;
        let teacher = evaluate_sharded(&self.engine, &self.teacher, cases, self.metric.as_ref(), &self.ctx)?;
        Ok(EvalSummary { student, teacher })
    }

    /// Run one epoch: steps, optional evaluation, checkpoints.
    pub fn train_epoch(
        &mut self,
        epoch: usize,
        labeled: &dyn BatchSource<LabeledBatch>,
        unlabeled: &dyn BatchSource<UnlabeledBatch>,
        validation: &[ValidationCase],
        sink: &mut dyn ScalarSink,
    ) -> Result<()> {
        let len_u = unlabeled.batches_per_epoch();
        if len_u == 0 {
            return Err(NeuralSegError::EmptyEpoch);
        }
        let total_iters = len_u * self.config.epochs;
        let coordinator = self.ctx.is_coordinator();
        let log_every = (len_u / self.config.log_per_epoch).max(1);

        if coordinator {
            log::info!(
                "===========> Epoch: {}/{}, Previous best mdice model: {:.4} @epoch: {}, ema: {:.4} @epoch: {}",
                epoch,
                self.config.epochs,
                self.state.previous_best_1,
                self.state.best_epoch,
                self.state.previous_best_2,
                self.state.best_epoch_ema
            );
        }

        let mut meters = EpochMeters::default();
        let batches = labeled.epoch_batches(epoch).zip(unlabeled.epoch_batches(epoch));
        for (i, (batch_x, batch_u)) in batches.enumerate() {
            let iters = epoch * len_u + i;
            let step = self.train_step(&batch_x?, &batch_u?, iters, total_iters)?;
            meters.update(&step);

            if coordinator {
                sink.add_scalar("consistency_weight/consistency_weight", step.consistency_weight, self.state.iter_num)?;
                sink.add_scalar("train/loss_all", step.loss as f64, iters)?;
                sink.add_scalar("train/lr", step.lr, iters)?;
                sink.add_scalar("train/loss_x", step.loss_x as f64, iters)?;
                sink.add_scalar("train/loss_s", step.loss_u as f64, iters)?;
                sink.add_scalar("train/mask_ratio", step.mask_ratio as f64, iters)?;
                if i % log_every == 0 {
                    log::info!(
                        "Iters: {}/{}, LR: {:.7}, Total loss: {:.3}, Loss x: {:.3}, Loss s: {:.3}, consistency_weight: {:.5}, Mask ratio: {:.3}",
                        self.state.iter_num,
                        total_iters,
                        step.lr,
                        meters.loss.avg(),
                        meters.loss_x.avg(),
                        meters.loss_u.avg(),
                        step.consistency_weight,
                        meters.mask_ratio.avg()
                    );
                }
            }
        }

        let mut best = None;
        if self.evaluation_due(epoch, total_iters) {
            let summary = self.evaluate(validation)?;
            let (d1, d2) = summary.mean_dice();
            if coordinator {
                summary.log(self.dataset);
                let student = summary.student.mean_dice_per_class();
                let teacher = summary.teacher.mean_dice_per_class();
                for (i, (s, t)) in student.iter().zip(&teacher).enumerate() {
                    let name = self.dataset.class_name(i + 1).unwrap_or("?");
                    sink.add_scalar(&format!("eval/{name}model_DICE"), *s, epoch)?;
                    sink.add_scalar(&format!("eval/{name}model_ema_DICE"), *t, epoch)?;
                }
                sink.add_scalar("eval/mDice", d1, epoch)?;
                sink.add_scalar("eval/mDICE_ema", d2, epoch)?;
            }
            if self.state.record_evaluation(epoch, d1, d2) {
                best = Some((d1, d2));
            }
        }

        self.state.epoch = Some(epoch);
        if coordinator {
            self.store
                .save_latest::<B, M, O>(&self.student, &self.teacher, &self.optimizer, &self.state)?;
            if let Some(scores) = best {
                self.store.save_best::<B, M, O>(
                    &self.student,
                    &self.teacher,
                    &self.optimizer,
                    &self.state,
                    self.config.batch_size,
                    scores,
                )?;
            }
            sink.flush()?;
        }
        self.ctx.barrier()
    }

    /// Train from the next unfinished epoch to the configured end.
    ///
    /// Returns the final state.
    pub fn fit(
        &mut self,
        labeled: &dyn BatchSource<LabeledBatch>,
        unlabeled: &dyn BatchSource<UnlabeledBatch>,
        validation: &[ValidationCase],
        sink: &mut dyn ScalarSink,
    ) -> Result<TrainingState> {
        let start = std::time::Instant::now();
        if self.ctx.is_coordinator() {
            log::info!(
                "Total iters: {}, criterion {}, {} replica(s)",
                unlabeled.batches_per_epoch() * self.config.epochs,
                self.criterion.name(),
                self.ctx.world_size()
            );
        }
        for epoch in self.state.next_epoch()..self.config.epochs {
            self.train_epoch(epoch, labeled, unlabeled, validation, sink)?;
        }
        if self.ctx.is_coordinator() {
            log::info!("Training time: {:.2}s", start.elapsed().as_secs_f64());
        }
        Ok(self.state.clone())
    }
}
