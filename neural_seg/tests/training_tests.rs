//! End-to-end mean-teacher training tests.

use std::path::Path;
use std::time::Duration;

use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::optim::Optimizer;

use neural_seg::{
    config::{CriterionConfig, InferenceConfig, SegNetConfig, TrainingConfig},
    data::{sphere_case, SyntheticConfig, SyntheticVolumes},
    distributed::DistributedContext,
    nn::{module_from_host, module_to_host, HostParams, SegNet3d},
    training::{
        BatchSource, CheckpointStore, ConsistencyTrainer, JsonlScalarSink, LabeledBatch,
        LogScalarSink, UnlabeledBatch,
    },
    NeuralSegError, Result,
};
use seg_core::{Shape3, IGNORE_LABEL};

type TestBackend = Autodiff<NdArray>;
type Net = SegNet3d<TestBackend>;

const EXTENT: usize = 8;

fn base_config(checkpoint_dir: &Path) -> TrainingConfig {
    let validation = InferenceConfig::new(3)
        .with_patch_size([EXTENT; 3])
        .with_strides(Some([EXTENT; 3]));
    TrainingConfig::new(validation)
        .with_num_classes(3)
        .with_epochs(2)
        .with_batch_size(2)
        .with_crop_size([EXTENT; 3])
        .with_base_lr(0.01)
        .with_checkpoint_dir(checkpoint_dir.to_string_lossy().into_owned())
}

fn network() -> Net {
    SegNetConfig::new(3)
        .with_features(vec![2])
        .init::<TestBackend>(&Default::default())
}

/// Same weights and statistics as `net`, sharing no state with it.
///
/// `Clone` shares batch-norm running state between the copies.
fn copy_of(net: &Net) -> Net {
    module_from_host(network(), &module_to_host(net).unwrap()).unwrap()
}

fn synthetic() -> SyntheticVolumes {
    SyntheticVolumes::new(
        SyntheticConfig::new([EXTENT; 3], 3)
            .with_labeled(2)
            .with_unlabeled(4)
            .with_validation(1)
            .with_seed(3),
    )
}

fn trainer(
    config: TrainingConfig,
    student: Net,
    ctx: DistributedContext,
) -> Result<ConsistencyTrainer<TestBackend, Net, impl Optimizer<Net, TestBackend>>> {
    let optimizer = config.optimizer().init::<TestBackend, Net>();
    ConsistencyTrainer::new(config, student, optimizer, ctx, &Default::default())
}

fn batches(ignore_all: bool) -> (LabeledBatch, UnlabeledBatch) {
    scaled_batches(ignore_all, 1.0)
}

fn scaled_batches(ignore_all: bool, scale: f32) -> (LabeledBatch, UnlabeledBatch) {
    let shape = Shape3::cube(EXTENT);
    let (a, la) = sphere_case(shape, 3, 0.05, 1);
    let (b, lb) = sphere_case(shape, 3, 0.05, 2);
    let batch_shape = [2, EXTENT, EXTENT, EXTENT];

    let image: Vec<f32> = a.data().iter().chain(b.data()).map(|v| v * scale).collect();
    let mask: Vec<u8> = la.data().iter().chain(lb.data()).copied().collect();
    let labeled = LabeledBatch::new(batch_shape, image.clone(), mask).unwrap();

    let strong = image.iter().map(|v| v * 1.05).collect();
    let ignore = vec![if ignore_all { IGNORE_LABEL } else { 0 }; image.len()];
    let unlabeled = UnlabeledBatch::new(batch_shape, image, strong, ignore).unwrap();
    (labeled, unlabeled)
}

fn assert_close(a: &HostParams, b: &HostParams, tol: f32) {
    assert_eq!(a.shapes, b.shapes);
    for (i, (x, y)) in a.values.iter().zip(&b.values).enumerate() {
        assert!((x - y).abs() <= tol, "value {i} differs: {x} vs {y}");
    }
}

#[test]
fn test_train_step_updates_student_teacher_and_counters() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer = trainer(base_config(dir.path()), network(), DistributedContext::single()).unwrap();
    let student_before = module_to_host(trainer.student()).unwrap();
    let teacher_before = module_to_host(trainer.teacher()).unwrap();
    assert_close(&student_before, &teacher_before, 0.0);

    let (labeled, unlabeled) = batches(false);
    let step = trainer.train_step(&labeled, &unlabeled, 5, 10).unwrap();

    assert!(step.loss.is_finite() && step.loss > 0.0);
    assert!(((step.loss_x + step.loss_u) / 2.0 - step.loss).abs() < 1e-5);
    assert!((0.0..=1.0).contains(&step.mask_ratio));
    assert!(!step.skipped);
    assert_eq!(trainer.state().iter_num, 1);
    assert!(step.lr < 0.01);
    assert_eq!(trainer.state().lr, step.lr);

    let student_after = module_to_host(trainer.student()).unwrap();
    let teacher_after = module_to_host(trainer.teacher()).unwrap();
    assert_ne!(student_before.values, student_after.values);
    assert_ne!(teacher_before.values, teacher_after.values);
}

#[test]
fn test_fully_ignored_unlabeled_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer = trainer(base_config(dir.path()), network(), DistributedContext::single()).unwrap();

    let (labeled, unlabeled) = batches(true);
    let step = trainer.train_step(&labeled, &unlabeled, 0, 10).unwrap();

    assert!(step.skipped);
    assert_eq!(step.loss_u, 0.0);
    assert_eq!(step.mask_ratio, 0.0);
    assert!((step.loss - step.loss_x / 2.0).abs() < 1e-6);
    assert!(step.loss.is_finite());
}

#[test]
fn test_ohem_criterion_trains() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path()).with_criterion(
        CriterionConfig::new()
            .with_name("OHEM".into())
            .with_min_kept(64),
    );
    let mut trainer = trainer(config, network(), DistributedContext::single()).unwrap();
    let (labeled, unlabeled) = batches(false);
    let step = trainer.train_step(&labeled, &unlabeled, 0, 10).unwrap();
    assert!(step.loss_x.is_finite() && step.loss_x > 0.0);
}

#[test]
fn test_unsupported_criterion_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path()).with_criterion(CriterionConfig::new().with_name("Dice".into()));
    let err = trainer(config, network(), DistributedContext::single()).err().unwrap();
    assert!(matches!(err, NeuralSegError::UnsupportedCriterion { ref name } if name == "Dice"));
}

#[test]
fn test_corrupt_checkpoint_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let latest = CheckpointStore::new(dir.path()).latest_dir();
    std::fs::create_dir_all(&latest).unwrap();
    std::fs::write(latest.join("state.json"), b"{ not json").unwrap();

    let err = trainer(base_config(dir.path()), network(), DistributedContext::single()).err().unwrap();
    assert!(matches!(err, NeuralSegError::CheckpointCorrupt { .. }));
}

#[test]
fn test_missing_checkpoint_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = trainer(base_config(dir.path()), network(), DistributedContext::single()).unwrap();
    assert_eq!(trainer.state().epoch, None);
    assert_eq!(trainer.state().iter_num, 0);
    assert_eq!(trainer.state().next_epoch(), 0);
}

#[test]
fn test_resume_matches_uninterrupted_run() {
    let data = synthetic();
    let initial = network();

    let straight_dir = tempfile::tempdir().unwrap();
    let ctx = DistributedContext::single();
    let labeled = data.labeled_source(&ctx, 2, 4);
    let unlabeled = data.unlabeled_source(&ctx, 2);
    assert_eq!(unlabeled.batches_per_epoch(), 2);

    let mut straight = trainer(base_config(straight_dir.path()), copy_of(&initial), ctx.clone()).unwrap();
    let straight_state = straight
        .fit(&labeled, &unlabeled, data.validation_cases(), &mut LogScalarSink)
        .unwrap();
    assert_eq!(straight_state.epoch, Some(1));
    assert_eq!(straight_state.iter_num, 4);

    let resumed_dir = tempfile::tempdir().unwrap();
    {
        let mut first = trainer(base_config(resumed_dir.path()), copy_of(&initial), ctx.clone()).unwrap();
        first
            .train_epoch(0, &labeled, &unlabeled, data.validation_cases(), &mut LogScalarSink)
            .unwrap();
        assert_eq!(first.state().epoch, Some(0));
    }

    let mut resumed = trainer(base_config(resumed_dir.path()), copy_of(&initial), ctx).unwrap();
    assert_eq!(resumed.state().next_epoch(), 1);
    assert_eq!(resumed.state().iter_num, 2);
    let resumed_state = resumed
        .fit(&labeled, &unlabeled, data.validation_cases(), &mut LogScalarSink)
        .unwrap();

    assert_eq!(resumed_state.iter_num, straight_state.iter_num);
    assert!((resumed_state.lr - straight_state.lr).abs() < 1e-12);
    assert_close(
        &module_to_host(&straight.student().valid()).unwrap(),
        &module_to_host(&resumed.student().valid()).unwrap(),
        1e-5,
    );
    assert_close(
        &module_to_host(straight.teacher()).unwrap(),
        &module_to_host(resumed.teacher()).unwrap(),
        1e-5,
    );
}

#[test]
fn test_evaluation_writes_best_checkpoint_and_scalars() {
    let data = synthetic();
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path())
        .with_epochs(1)
        .with_eval_every(1)
        .with_eval_start_fraction(0.0);
    let ctx = DistributedContext::single();
    let labeled = data.labeled_source(&ctx, 2, 4);
    let unlabeled = data.unlabeled_source(&ctx, 2);

    let scalars = dir.path().join("scalars.jsonl");
    let mut sink = JsonlScalarSink::create(&scalars).unwrap();
    let mut trainer = trainer(config, network(), ctx).unwrap();
    let state = trainer
        .fit(&labeled, &unlabeled, data.validation_cases(), &mut sink)
        .unwrap();

    // Ties with the initial best of zero still count as a new best.
    assert_eq!(state.best_epoch, 0);
    assert!(state.previous_best_1 >= 0.0);

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n == "latest"));
    assert!(names.iter().any(|n| n.starts_with("ep0_bs2mdice")));
    assert!(!names.iter().any(|n| n.starts_with("latest.")));

    let written = std::fs::read_to_string(&scalars).unwrap();
    assert!(written.contains("\"train/loss_all\""));
    assert!(written.contains("\"eval/mDice\""));
}

#[test]
fn test_replicas_stay_identical_on_different_data() {
    let dir = tempfile::tempdir().unwrap();
    let contexts = DistributedContext::thread_group(2, Duration::from_secs(60)).unwrap();

    let handles: Vec<_> = contexts
        .into_iter()
        .map(|ctx| {
            let root = dir.path().to_path_buf();
            std::thread::spawn(move || {
                // Each replica starts from its own random weights and sees
                // its own intensity scale, so local batch statistics differ.
                let scale = 1.0 + 2.0 * ctx.rank() as f32;
                let mut trainer = trainer(base_config(&root), network(), ctx).unwrap();
                for iters in 0..2 {
                    let (labeled, unlabeled) = scaled_batches(false, scale);
                    trainer.train_step(&labeled, &unlabeled, iters, 4).unwrap();
                }
                (
                    module_to_host(&trainer.student().valid()).unwrap(),
                    module_to_host(trainer.student()).unwrap(),
                    module_to_host(trainer.teacher()).unwrap(),
                )
            })
        })
        .collect();

    let results: Vec<(HostParams, HostParams, HostParams)> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_close(&results[0].0, &results[1].0, 1e-6);
    assert_close(&results[0].1, &results[1].1, 1e-6);
    assert_close(&results[0].2, &results[1].2, 1e-6);
    assert_close(&results[0].0, &results[0].1, 0.0);
}

#[test]
fn test_replicas_fit_to_the_same_weights() {
    let dir = tempfile::tempdir().unwrap();
    let contexts = DistributedContext::thread_group(2, Duration::from_secs(60)).unwrap();

    let handles: Vec<_> = contexts
        .into_iter()
        .map(|ctx| {
            let root = dir.path().to_path_buf();
            std::thread::spawn(move || {
                let data = synthetic();
                let labeled = data.labeled_source(&ctx, 1, 4);
                let unlabeled = data.unlabeled_source(&ctx, 1);
                let config = base_config(&root).with_epochs(1).with_batch_size(1);
                let mut trainer = trainer(config, network(), ctx).unwrap();
                trainer
                    .fit(&labeled, &unlabeled, data.validation_cases(), &mut LogScalarSink)
                    .unwrap();
                (
                    module_to_host(&trainer.student().valid()).unwrap(),
                    module_to_host(trainer.teacher()).unwrap(),
                )
            })
        })
        .collect();

    let results: Vec<(HostParams, HostParams)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_close(&results[0].0, &results[1].0, 1e-6);
    assert_close(&results[0].1, &results[1].1, 1e-6);
}
