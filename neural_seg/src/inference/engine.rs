//! Sliding-window volumetric inference.

use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::tensor::TensorData;
use seg_core::{LabelMap, PatchScheduler, ScoreAccumulator, ScoreMap, Volume};

use crate::config::InferenceConfig;
use crate::error::{NeuralSegError, Result};
use crate::nn::SegmentationModel;

/// Runs a model over a whole volume patch by patch and stitches the result.
///
/// Use it with a non-autodiff backend (e.g. the `valid()` copy of a training
/// model) so no gradient graph is recorded.
#[derive(Debug, Clone)]
pub struct VolumetricInferenceEngine<B: Backend> {
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> VolumetricInferenceEngine<B> {
    /// Create an engine after validating the configuration.
    pub fn new(config: InferenceConfig, device: &B::Device) -> Result<Self> {
        config.validate().map_err(NeuralSegError::config)?;
        Ok(Self {
            config,
            device: device.clone(),
        })
    }

    /// The engine configuration.
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Segment a volume.
    ///
    /// Returns the label map (original extent, values `< num_classes`) and the
    /// normalized per-class probabilities. Any failing patch aborts the call.
    pub fn infer<M: SegmentationModel<B>>(&self, model: &M, volume: &Volume) -> Result<(LabelMap, ScoreMap)> {
        let num_classes = self.config.num_classes;
        let scheduler = PatchScheduler::new(
            volume.shape(),
            self.config.patch_shape(),
            self.config.strides(),
        )?;
        let [sx, sy, sz] = scheduler.counts();
        log::debug!(
            "volume {:?} padded to {:?}: {} x {} x {} patches",
            volume.shape().as_array(),
            scheduler.padded_shape().as_array(),
            sx,
            sy,
            sz
        );

        let padded = volume.pad(&scheduler.pad(), 0.0);
        let mut acc = ScoreAccumulator::new(num_classes, scheduler.padded_shape());

        for patch in scheduler.patches() {
            let [pw, ph, pd] = patch.shape.as_array();
            let values = padded.extract(patch.offset, patch.shape);
            let input = Tensor::<B, 5>::from_data(TensorData::new(values, [1, 1, pw, ph, pd]), &self.device);

            let logits = self.config.selector.select(model.forward(input))?;
            let expected = [1, num_classes, pw, ph, pd];
            if logits.dims() != expected {
                return Err(NeuralSegError::ShapeMismatch {
                    expected: expected.to_vec(),
                    got: logits.dims().to_vec(),
                });
            }

            let probs = softmax(logits, 1)
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(NeuralSegError::data)?;
            acc.add_patch(&patch, &probs)?;
        }

        let (labels, scores) = acc.finalize(&scheduler.pad())?;
        log::info!(
            "segmented volume {:?} with {} patches, classes present: {:?}",
            volume.shape().as_array(),
            scheduler.len(),
            labels.present_classes()
        );
        Ok((labels, scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{ModelOutput, OutputSelector};
    use burn::backend::NdArray;
    use seg_core::Shape3;

    type B = NdArray;

    /// Logits favour class 1 wherever the intensity is positive.
    struct SignModel;

    impl SegmentationModel<B> for SignModel {
        fn forward(&self, input: Tensor<B, 5>) -> ModelOutput<B> {
            let background = input.clone().neg();
            ModelOutput::Logits(Tensor::cat(vec![background, input], 1).mul_scalar(10.0))
        }
    }

    /// Emits the wrong number of channels.
    struct OneChannelModel;

    impl SegmentationModel<B> for OneChannelModel {
        fn forward(&self, input: Tensor<B, 5>) -> ModelOutput<B> {
            ModelOutput::Logits(input)
        }
    }

    fn config() -> InferenceConfig {
        InferenceConfig::new(2)
            .with_patch_size([8, 8, 8])
            .with_strides(Some([4, 4, 4]))
    }

    #[test]
    fn test_small_volume_is_padded_and_cropped() {
        let device = Default::default();
        let engine = VolumetricInferenceEngine::<B>::new(config(), &device).unwrap();
        let shape = Shape3::new(5, 12, 3);
        let volume = Volume::from_fn(shape, |x, _, _| if x >= 2 { 1.0 } else { -1.0 });

        let (labels, scores) = engine.infer(&SignModel, &volume).unwrap();
        assert_eq!(labels.shape(), shape);
        assert_eq!(scores.shape(), shape);
        assert_eq!(labels.get(0, 5, 1), 0);
        assert_eq!(labels.get(4, 5, 1), 1);

        for x in 0..shape.w {
            let sum: f32 = scores.voxel(x, 0, 0).iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_wrong_channel_count_aborts() {
        let device = Default::default();
        let engine = VolumetricInferenceEngine::<B>::new(config(), &device).unwrap();
        let volume = Volume::zeros(Shape3::cube(8));
        let err = engine.infer(&OneChannelModel, &volume).unwrap_err();
        assert!(matches!(err, NeuralSegError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_selector_mismatch_aborts() {
        let device = Default::default();
        let engine = VolumetricInferenceEngine::<B>::new(
            config().with_selector(OutputSelector::Primary),
            &device,
        )
        .unwrap();
        let err = engine
            .infer(&SignModel, &Volume::zeros(Shape3::cube(8)))
            .unwrap_err();
        assert!(matches!(err, NeuralSegError::OutputMismatch { .. }));
    }
}
