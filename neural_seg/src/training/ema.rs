//! Exponential moving average of student weights into the teacher.

use burn::module::{Module, ModuleMapper, ParamId};
use burn::prelude::*;

use crate::error::{NeuralSegError, Result};
use crate::nn::params::{collect_floats, flush_running_state};

struct EmaMapper<B: Backend> {
    student: Vec<(Vec<usize>, Tensor<B, 1>)>,
    index: usize,
    ratio: f32,
    error: Option<String>,
}

impl<B: Backend> ModuleMapper<B> for EmaMapper<B> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        if self.error.is_some() {
            return tensor;
        }
        let index = self.index;
        self.index += 1;

        let dims = tensor.dims();
        let Some((student_dims, student)) = self.student.get(index) else {
            self.error = Some(format!("teacher has more float tensors than the student ({index}+)"));
            return tensor;
        };
        if student_dims.as_slice() != dims.as_slice() {
            self.error = Some(format!(
                "tensor {index}: teacher dims {dims:?}, student dims {student_dims:?}"
            ));
            return tensor;
        }

        let student = student.clone().reshape(dims);
        tensor.mul_scalar(self.ratio) + student.mul_scalar(1.0 - self.ratio)
    }
}

/// Blend every parameter and running-state buffer of `student` into
/// `teacher`: `teacher * ratio + student * (1 - ratio)`.
///
/// Both modules are walked in declaration order; any difference in tensor
/// count or dims is an [`NeuralSegError::EmaStructureMismatch`].
pub fn ema_update<B: Backend, M: Module<B>>(teacher: M, student: &M, ratio: f64) -> Result<M> {
    let mut mapper = EmaMapper {
        student: collect_floats(student),
        index: 0,
        ratio: ratio as f32,
        error: None,
    };
    flush_running_state(&teacher);
    let teacher = teacher.map(&mut mapper);

    if let Some(message) = mapper.error {
        return Err(NeuralSegError::EmaStructureMismatch { message });
    }
    if mapper.index != mapper.student.len() {
        return Err(NeuralSegError::EmaStructureMismatch {
            message: format!(
                "teacher has {} float tensors, student has {}",
                mapper.index,
                mapper.student.len()
            ),
        });
    }
    Ok(teacher)
}
