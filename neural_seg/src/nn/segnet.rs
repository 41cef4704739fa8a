//! Small 3D convolutional segmentation network.
//!
//! Not a competitive architecture. It exists so inference and training can run
//! end to end, and its batch-norm running statistics exercise the buffer half
//! of the teacher EMA.

use std::collections::HashMap;

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig3d, Relu};
use burn::prelude::*;
use burn::tensor::activation::tanh;

use super::output::{ModelOutput, SegmentationModel};
use crate::config::{OutputKind, SegNetConfig};

/// Conv, batch norm, relu.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv3d<B>,
    norm: BatchNorm<B, 3>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv3dConfig::new([in_channels, out_channels], [3, 3, 3])
                .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                .init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.activation.forward(self.norm.forward(self.conv.forward(x)))
    }
}

/// Reference segmentation network.
#[derive(Module, Debug)]
pub struct SegNet3d<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    head: Conv3d<B>,
    aux_head: Conv3d<B>,
    output: Ignored<OutputKind>,
}

impl SegNetConfig {
    /// Initialize the network.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SegNet3d<B> {
        let mut blocks = Vec::with_capacity(self.features.len());
        let mut channels = self.in_channels;
        for &width in &self.features {
            blocks.push(ConvBlock::new(channels, width, device));
            channels = width;
        }

        SegNet3d {
            blocks,
            head: Conv3dConfig::new([channels, self.num_classes], [1, 1, 1]).init(device),
            aux_head: Conv3dConfig::new([channels, self.num_classes], [1, 1, 1]).init(device),
            output: Ignored(self.output),
        }
    }
}

impl<B: Backend> SegNet3d<B> {
    /// Output variant this network produces.
    pub fn output_kind(&self) -> OutputKind {
        self.output.0
    }
}

impl<B: Backend> SegmentationModel<B> for SegNet3d<B> {
    fn forward(&self, input: Tensor<B, 5>) -> ModelOutput<B> {
        let features = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));
        let logits = self.head.forward(features.clone());

        match self.output.0 {
            OutputKind::Logits => ModelOutput::Logits(logits),
            OutputKind::WithAuxiliary => ModelOutput::WithAuxiliary {
                auxiliary: tanh(self.aux_head.forward(features)),
                logits,
            },
            OutputKind::Keyed => {
                let mut map = HashMap::with_capacity(2);
                map.insert("aux".to_string(), tanh(self.aux_head.forward(features)));
                map.insert("pred".to_string(), logits);
                ModelOutput::Keyed(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::OutputSelector;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn test_output_shapes() {
        let device = Default::default();
        let net = SegNetConfig::new(3).with_features(vec![4]).init::<B>(&device);
        let input = Tensor::<B, 5>::zeros([2, 1, 6, 5, 4], &device);
        match net.forward(input) {
            ModelOutput::Logits(logits) => assert_eq!(logits.dims(), [2, 3, 6, 5, 4]),
            other => panic!("unexpected variant {}", other.variant_name()),
        }
    }

    #[test]
    fn test_output_variants_follow_config() {
        let device = Default::default();
        let input = Tensor::<B, 5>::zeros([1, 1, 4, 4, 4], &device);

        let net = SegNetConfig::new(2)
            .with_features(vec![2])
            .with_output(OutputKind::WithAuxiliary)
            .init::<B>(&device);
        let aux = OutputSelector::Auxiliary.select(net.forward(input.clone())).unwrap();
        assert_eq!(aux.dims(), [1, 2, 4, 4, 4]);

        let net = SegNetConfig::new(2)
            .with_features(vec![2])
            .with_output(OutputKind::Keyed)
            .init::<B>(&device);
        let pred = OutputSelector::Key("pred".into()).select(net.forward(input)).unwrap();
        assert_eq!(pred.dims(), [1, 2, 4, 4, 4]);
    }
}
