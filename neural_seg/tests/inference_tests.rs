//! End-to-end sliding-window inference tests.

use burn::backend::NdArray;
use burn::prelude::*;

use neural_seg::{
    config::{InferenceConfig, OutputKind, SegNetConfig},
    data::sphere_case,
    inference::{evaluate_predictions, predict_cases, VolumetricInferenceEngine},
    nn::{ModelOutput, OutputSelector, SegmentationModel},
    NeuralSegError,
};
use seg_core::{DiceHd95, LabelMap, Shape3, Volume};
use seg_io::{discover_cases, load_from_file, save_to_file, LabelVolume, SpatialMeta, SpatialVolume};

type TestBackend = NdArray;

/// Scores class `c` by how close the intensity is to `c / (C - 1)`.
struct IntensityModel {
    num_classes: usize,
}

impl SegmentationModel<TestBackend> for IntensityModel {
    fn forward(&self, input: Tensor<TestBackend, 5>) -> ModelOutput<TestBackend> {
        let scaled = input.mul_scalar((self.num_classes - 1) as f32);
        let channels = (0..self.num_classes)
            .map(|c| {
                scaled
                    .clone()
                    .sub_scalar(c as f32)
                    .powf_scalar(2.0)
                    .neg()
                    .mul_scalar(10.0)
            })
            .collect();
        ModelOutput::Logits(Tensor::cat(channels, 1))
    }
}

/// Class 1 below `split` on the first axis, class 2 in the far corner.
fn block_labels(shape: Shape3, split: usize) -> LabelMap {
    LabelMap::from_fn(shape, |x, y, z| {
        if x < split {
            1
        } else if x >= shape.w - 4 && y >= shape.h - 4 && z >= shape.d - 4 {
            2
        } else {
            0
        }
    })
}

fn engine(num_classes: usize, patch: usize, stride: usize) -> VolumetricInferenceEngine<TestBackend> {
    let config = InferenceConfig::new(num_classes)
        .with_patch_size([patch; 3])
        .with_strides(Some([stride; 3]));
    VolumetricInferenceEngine::new(config, &Default::default()).unwrap()
}

#[test]
fn test_three_class_volume_is_recovered() {
    let shape = Shape3::cube(64);
    let (image, labels) = sphere_case(shape, 3, 0.0, 7);
    assert!(labels.present_classes().len() >= 2);

    let (pred, scores) = engine(3, 32, 16)
        .infer(&IntensityModel { num_classes: 3 }, &image)
        .unwrap();

    assert_eq!(pred.shape(), shape);
    assert_eq!(scores.shape(), shape);
    assert_eq!(scores.num_classes(), 3);
    assert_eq!(pred, labels);

    for (x, y, z) in [(0, 0, 0), (31, 17, 63), (63, 63, 63)] {
        let sum: f32 = scores.voxel(x, y, z).iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "probabilities at ({x},{y},{z}) sum to {sum}");
    }
}

#[test]
fn test_volume_smaller_than_patch_is_padded_and_cropped() {
    let shape = Shape3::new(40, 37, 20);
    let (image, labels) = sphere_case(shape, 3, 0.0, 11);

    let (pred, scores) = engine(3, 32, 16)
        .infer(&IntensityModel { num_classes: 3 }, &image)
        .unwrap();

    assert_eq!(pred.shape(), shape);
    assert_eq!(scores.shape(), shape);
    assert_eq!(pred, labels);
}

#[test]
fn test_segnet_with_keyed_output() {
    let device = Default::default();
    let net = SegNetConfig::new(2)
        .with_features(vec![2])
        .with_output(OutputKind::Keyed)
        .init::<TestBackend>(&device);
    let config = InferenceConfig::new(2)
        .with_patch_size([8, 8, 8])
        .with_strides(Some([4, 4, 4]))
        .with_selector(OutputSelector::Key("pred".into()));
    let engine = VolumetricInferenceEngine::<TestBackend>::new(config, &device).unwrap();

    let volume = Volume::from_fn(Shape3::new(10, 9, 6), |x, _, _| x as f32 / 10.0);
    let (pred, scores) = engine.infer(&net, &volume).unwrap();
    assert_eq!(pred.shape(), volume.shape());
    assert!(pred.data().iter().all(|&l| l < 2));
    assert!(scores.data().iter().all(|p| p.is_finite()));
}

#[test]
fn test_selector_mismatch_is_fatal() {
    let config = InferenceConfig::new(3)
        .with_patch_size([8, 8, 8])
        .with_strides(Some([8, 8, 8]))
        .with_selector(OutputSelector::Primary);
    let engine = VolumetricInferenceEngine::<TestBackend>::new(config, &Default::default()).unwrap();

    let err = engine
        .infer(&IntensityModel { num_classes: 3 }, &Volume::zeros(Shape3::cube(8)))
        .unwrap_err();
    assert!(matches!(err, NeuralSegError::OutputMismatch { .. }));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = InferenceConfig::new(3).with_strides(Some([0, 4, 4]));
    assert!(VolumetricInferenceEngine::<TestBackend>::new(config, &Default::default()).is_err());
}

#[test]
fn test_predict_then_evaluate_directory() {
    let root = tempfile::tempdir().unwrap();
    let images = root.path().join("images");
    let labels = root.path().join("labels");
    let preds = root.path().join("preds");
    std::fs::create_dir_all(&images).unwrap();
    std::fs::create_dir_all(&labels).unwrap();

    let meta = SpatialMeta {
        spacing: [0.8, 0.8, 2.5],
        ..SpatialMeta::default()
    };
    let shape = Shape3::new(20, 18, 12);
    for (i, name) in ["toy_0001_0000.svol", "toy_0002_0000.svol"].iter().enumerate() {
        let label = block_labels(shape, 3 + i);
        let image = Volume::from_fn(shape, |x, y, z| label.get(x, y, z) as f32 / 2.0);
        save_to_file(&SpatialVolume::new(image, meta), images.join(name)).unwrap();
        save_to_file(&SpatialVolume::new(label, meta), labels.join(name)).unwrap();
    }

    let cases = discover_cases(&images, &labels).unwrap();
    let written = predict_cases(&engine(3, 16, 8), &IntensityModel { num_classes: 3 }, &cases, &preds).unwrap();
    assert_eq!(written.len(), 2);
    assert!(written[0].ends_with("toy_0001.svol"));

    let pred: LabelVolume = load_from_file(&written[0]).unwrap();
    assert_eq!(pred.meta, meta);
    assert_eq!(pred.grid.shape(), shape);

    let report = evaluate_predictions(&preds, &labels, 3, &DiceHd95).unwrap();
    assert_eq!(report.cases, 2);
    assert_eq!(report.per_class_dice.len(), 2);
    assert!((report.mean_dice - 1.0).abs() < 1e-9);
    assert!((report.mean_jaccard - 1.0).abs() < 1e-9);
}

#[test]
fn test_evaluate_skips_missing_predictions() {
    let root = tempfile::tempdir().unwrap();
    let labels = root.path().join("labels");
    let preds = root.path().join("preds");
    std::fs::create_dir_all(&labels).unwrap();
    std::fs::create_dir_all(&preds).unwrap();

    let label = LabelMap::from_fn(Shape3::cube(6), |x, _, _| u8::from(x > 2));
    save_to_file(&SpatialVolume::new(label.clone(), SpatialMeta::default()), labels.join("a_0001_0000.svol")).unwrap();
    save_to_file(&SpatialVolume::new(label.clone(), SpatialMeta::default()), labels.join("a_0002_0000.svol")).unwrap();
    save_to_file(&SpatialVolume::new(label, SpatialMeta::default()), preds.join("a_0001.svol")).unwrap();

    let report = evaluate_predictions(&preds, &labels, 2, &DiceHd95).unwrap();
    assert_eq!(report.cases, 1);
}
