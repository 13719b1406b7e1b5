use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::{expect_inputs, expect_params, KernelFactory, OpKernel, TensorSlice};
use crate::tensor::TensorInfo;

/// Softmax over the innermost (channel) axis.
struct Softmax;

impl OpKernel for Softmax {
    fn prepare(&self, inputs: &[&TensorInfo], output: &TensorInfo) -> Result<()> {
        expect_inputs("SOFTMAX", inputs, 1)?;
        if output.shape != inputs[0].shape {
            return Err(anyhow!(
                "SOFTMAX output shape {:?} differs from input {:?}",
                output.shape,
                inputs[0].shape
            ));
        }
        if inputs[0].shape.last().copied().unwrap_or(0) == 0 {
            return Err(anyhow!("SOFTMAX needs a non-empty last axis"));
        }
        Ok(())
    }

    fn eval(&self, inputs: &[TensorSlice<'_>], output: &mut [f32], _: &[usize]) -> Result<()> {
        let input = inputs[0];
        let depth = input.shape.last().copied().unwrap_or(1);
        for (out_row, in_row) in output
            .chunks_exact_mut(depth)
            .zip(input.data.chunks_exact(depth))
        {
            let max = in_row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for (out, x) in out_row.iter_mut().zip(in_row) {
                *out = (x - max).exp();
                sum += *out;
            }
            for out in out_row.iter_mut() {
                *out /= sum;
            }
        }
        Ok(())
    }
}

pub fn register_softmax() -> KernelFactory {
    Arc::new(|params: &[i32]| {
        expect_params("SOFTMAX", params, 0)?;
        Ok(Box::new(Softmax) as Box<dyn OpKernel>)
    })
}
