//! Keeping replica weights identical: gradient averaging, running-state
//! averaging and the initial broadcast.

use std::marker::PhantomData;

use burn::module::{AutodiffModule, Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;

use super::DistributedContext;
use crate::error::{NeuralSegError, Result};
use crate::nn::params::flush_running_state;
use crate::nn::{module_from_host, module_to_host};

struct GradientGather<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    values: Vec<f32>,
    error: Option<String>,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientGather<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if self.error.is_some() {
            return;
        }
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            match grad.into_data().convert::<f32>().to_vec::<f32>() {
                Ok(v) => self.values.extend(v),
                Err(e) => self.error = Some(format!("{e:?}")),
            }
        }
    }
}

struct GradientScatter<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    values: &'a [f32],
    offset: usize,
    scale: f32,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientScatter<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) else {
            return;
        };
        let dims = grad.dims();
        let n: usize = dims.iter().product();
        let averaged: Vec<f32> = self.values[self.offset..self.offset + n]
            .iter()
            .map(|v| v * self.scale)
            .collect();
        self.offset += n;
        let tensor = Tensor::<B::InnerBackend, D>::from_data(TensorData::new(averaged, dims), &grad.device());
        self.grads.register::<B::InnerBackend, D>(id, tensor);
    }
}

/// Average every parameter gradient across replicas.
///
/// Called after backward and before the optimizer step. All gradients travel
/// in one flat buffer, in parameter order.
pub fn all_reduce_gradients<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    mut grads: GradientsParams,
    ctx: &DistributedContext,
) -> Result<GradientsParams> {
    if ctx.world_size() == 1 {
        return Ok(grads);
    }

    let mut gather = GradientGather::<B> {
        grads: &grads,
        values: Vec::new(),
        error: None,
        _backend: PhantomData,
    };
    module.visit(&mut gather);
    if let Some(message) = gather.error {
        return Err(NeuralSegError::TensorData { message });
    }
    let mut values = gather.values;
    ctx.all_reduce_sum(&mut values)?;

    let mut scatter = GradientScatter::<B> {
        grads: &mut grads,
        values: &values,
        offset: 0,
        scale: 1.0 / ctx.world_size() as f32,
        _backend: PhantomData,
    };
    module.visit(&mut scatter);
    Ok(grads)
}

struct RunningStateGather<B: Backend> {
    values: Vec<f32>,
    error: Option<String>,
    _backend: PhantomData<B>,
}

impl<B: Backend> ModuleVisitor<B> for RunningStateGather<B> {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        if tensor.is_require_grad() || self.error.is_some() {
            return;
        }
        match tensor.clone().into_data().convert::<f32>().to_vec::<f32>() {
            Ok(v) => self.values.extend(v),
            Err(e) => self.error = Some(format!("{e:?}")),
        }
    }
}

struct RunningStateScatter<'a> {
    values: &'a [f32],
    offset: usize,
    scale: f32,
}

impl<B: Backend> ModuleMapper<B> for RunningStateScatter<'_> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        if tensor.is_require_grad() {
            return tensor;
        }
        let dims = tensor.dims();
        let n: usize = dims.iter().product();
        let averaged: Vec<f32> = self.values[self.offset..self.offset + n]
            .iter()
            .map(|v| v * self.scale)
            .collect();
        self.offset += n;
        Tensor::from_data(TensorData::new(averaged, dims), &tensor.device())
    }
}

/// Average running-state buffers (e.g. batch-norm statistics) across
/// replicas. Trainable parameters are left alone.
///
/// Statistics parked by this thread's last forward are flushed first, so the
/// average covers the current step and nothing stale is merged back later.
pub fn sync_running_state<B: Backend, M: Module<B>>(module: M, ctx: &DistributedContext) -> Result<M> {
    if ctx.world_size() == 1 {
        return Ok(module);
    }
    flush_running_state(&module);
    let mut gather = RunningStateGather::<B> {
        values: Vec::new(),
        error: None,
        _backend: PhantomData,
    };
    module.visit(&mut gather);
    if let Some(message) = gather.error {
        return Err(NeuralSegError::TensorData { message });
    }
    let mut values = gather.values;
    ctx.all_reduce_sum(&mut values)?;

    let mut scatter = RunningStateScatter {
        values: &values,
        offset: 0,
        scale: 1.0 / ctx.world_size() as f32,
    };
    Ok(module.map(&mut scatter))
}

/// Replace every float tensor with the coordinator's copy.
pub fn broadcast_module<B: Backend, M: Module<B>>(module: M, ctx: &DistributedContext) -> Result<M> {
    if ctx.world_size() == 1 {
        return Ok(module);
    }
    let mut host = module_to_host(&module)?;
    if !ctx.is_coordinator() {
        host.values.iter_mut().for_each(|v| *v = 0.0);
    }
    ctx.all_reduce_sum(&mut host.values)?;
    module_from_host(module, &host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegNetConfig;
    use burn::backend::{Autodiff, NdArray};
    use std::thread;
    use std::time::Duration;

    type B = Autodiff<NdArray>;

    #[test]
    fn test_broadcast_makes_replicas_equal() {
        let contexts = DistributedContext::thread_group(2, Duration::from_secs(30)).unwrap();
        let handles: Vec<_> = contexts
            .into_iter()
            .map(|ctx| {
                thread::spawn(move || {
                    let device = Default::default();
                    let model = SegNetConfig::new(2).with_features(vec![2]).init::<NdArray>(&device);
                    let model = broadcast_module(model, &ctx).unwrap();
                    module_to_host(&model).unwrap()
                })
            })
            .collect();
        let hosts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(hosts[0], hosts[1]);
    }

    #[test]
    fn test_running_state_is_averaged_after_forward() {
        let contexts = DistributedContext::thread_group(2, Duration::from_secs(30)).unwrap();
        let handles: Vec<_> = contexts
            .into_iter()
            .map(|ctx| {
                thread::spawn(move || {
                    let device = Default::default();
                    let model = SegNetConfig::new(2).with_features(vec![2]).init::<B>(&device);
                    let model = broadcast_module(model, &ctx).unwrap();
                    let before = module_to_host(&model.valid()).unwrap();

                    let input = Tensor::<B, 5>::random([1, 1, 4, 4, 4], burn::tensor::Distribution::Default, &device)
                        .mul_scalar(ctx.rank() as f32 * 3.0 + 1.0);
                    let _ = crate::nn::SegmentationModel::forward(&model, input);
                    let model = sync_running_state(model, &ctx).unwrap();
                    (before, module_to_host(&model.valid()).unwrap())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_ne!(results[0].0, results[0].1, "forward did not move the running statistics");
        assert_eq!(results[0].1, results[1].1);
    }

    #[test]
    fn test_gradients_are_averaged() {
        let contexts = DistributedContext::thread_group(2, Duration::from_secs(30)).unwrap();
        let handles: Vec<_> = contexts
            .into_iter()
            .map(|ctx| {
                thread::spawn(move || {
                    let device = Default::default();
                    let model = SegNetConfig::new(2).with_features(vec![2]).init::<B>(&device);
                    let model = broadcast_module(model, &ctx).unwrap();
                    // Each rank sees a different input, so local gradients differ.
                    let input = Tensor::<B, 5>::ones([1, 1, 2, 2, 2], &device).mul_scalar(ctx.rank() as f32 + 1.0);
                    let out = crate::nn::SegmentationModel::forward(&model, input);
                    let logits = crate::nn::OutputSelector::Logits.select(out).unwrap();
                    let grads = GradientsParams::from_grads(logits.powf_scalar(2.0).sum().backward(), &model);
                    let grads = all_reduce_gradients(&model, grads, &ctx).unwrap();

                    let mut gather = GradientGather::<B> {
                        grads: &grads,
                        values: Vec::new(),
                        error: None,
                        _backend: PhantomData,
                    };
                    model.visit(&mut gather);
                    gather.values
                })
            })
            .collect();
        let grads: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(!grads[0].is_empty());
        assert_eq!(grads[0], grads[1]);
    }
}
