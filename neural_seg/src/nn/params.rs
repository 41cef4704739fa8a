//! Ordered access to every float tensor of a module.
//!
//! Parameters and running-state buffers are visited in declaration order, so
//! two modules built from the same config line up entry by entry.

use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::{NeuralSegError, Result};

/// Every float tensor of a module, flattened, with its original dims.
pub(crate) struct FloatCollector<B: Backend> {
    pub(crate) entries: Vec<(Vec<usize>, Tensor<B, 1>)>,
}

impl<B: Backend> ModuleVisitor<B> for FloatCollector<B> {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        let dims = tensor.dims().to_vec();
        let n: usize = dims.iter().product();
        self.entries.push((dims, tensor.clone().reshape([n])));
    }
}

/// Fold pending per-thread running statistics into the shared value of every
/// running-state buffer.
///
/// Training forwards park new batch-norm statistics per thread; `visit` and
/// `map` only see the shared value until the next sync.
pub(crate) fn flush_running_state<B: Backend, M: Module<B>>(module: &M) {
    // Recording a module syncs each `RunningState` it holds.
    let _ = module.clone().into_record();
}

/// Flattened float tensors of `module` in visit order.
pub(crate) fn collect_floats<B: Backend, M: Module<B>>(module: &M) -> Vec<(Vec<usize>, Tensor<B, 1>)> {
    flush_running_state(module);
    let mut collector = FloatCollector {
        entries: Vec::new(),
    };
    module.visit(&mut collector);
    collector.entries
}

/// All float values of a module copied to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostParams {
    /// Dims of each tensor in visit order.
    pub shapes: Vec<Vec<usize>>,
    /// Concatenated values.
    pub values: Vec<f32>,
}

/// Copy every float tensor of `module` to the host.
pub fn module_to_host<B: Backend, M: Module<B>>(module: &M) -> Result<HostParams> {
    let mut shapes = Vec::new();
    let mut values = Vec::new();
    for (dims, tensor) in collect_floats(module) {
        let data = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(NeuralSegError::data)?;
        values.extend(data);
        shapes.push(dims);
    }
    Ok(HostParams { shapes, values })
}

struct HostLoader<'a> {
    params: &'a HostParams,
    index: usize,
    offset: usize,
    error: Option<String>,
}

impl<B: Backend> ModuleMapper<B> for HostLoader<'_> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        if self.error.is_some() {
            return tensor;
        }
        let dims = tensor.dims().to_vec();
        match self.params.shapes.get(self.index) {
            Some(expected) if *expected == dims => {}
            other => {
                self.error = Some(format!(
                    "tensor {} has dims {:?}, host copy has {:?}",
                    self.index, dims, other
                ));
                return tensor;
            }
        }
        let n: usize = dims.iter().product();
        let slice = &self.params.values[self.offset..self.offset + n];
        self.index += 1;
        self.offset += n;

        let require_grad = tensor.is_require_grad();
        let loaded = Tensor::<B, D>::from_data(TensorData::new(slice.to_vec(), dims), &tensor.device());
        if require_grad {
            loaded.require_grad()
        } else {
            loaded
        }
    }
}

/// Overwrite every float tensor of `module` with host values.
pub fn module_from_host<B: Backend, M: Module<B>>(module: M, params: &HostParams) -> Result<M> {
    let total: usize = params.shapes.iter().map(|s| s.iter().product::<usize>()).sum();
    if total != params.values.len() {
        return Err(NeuralSegError::ShapeMismatch {
            expected: vec![total],
            got: vec![params.values.len()],
        });
    }
    flush_running_state(&module);
    let mut loader = HostLoader {
        params,
        index: 0,
        offset: 0,
        error: None,
    };
    let module = module.map(&mut loader);
    if let Some(message) = loader.error {
        return Err(NeuralSegError::EmaStructureMismatch { message });
    }
    if loader.index != params.shapes.len() {
        return Err(NeuralSegError::EmaStructureMismatch {
            message: format!(
                "module has {} float tensors, host copy has {}",
                loader.index,
                params.shapes.len()
            ),
        });
    }
    Ok(module)
}
