use anyhow::{anyhow, Result};

use super::{expect_inputs, expect_params, KernelFactory, OpKernel, TensorSlice};
use crate::tensor::{numel, TensorInfo};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Broadcast {
    Same,
    Scalar,
    Channel,
}

fn broadcast_kind(op: &str, lhs: &[usize], rhs: &[usize]) -> Result<Broadcast> {
    if lhs == rhs {
        return Ok(Broadcast::Same);
    }
    let rhs_len = numel(rhs);
    if rhs_len == 1 {
        return Ok(Broadcast::Scalar);
    }
    if lhs.last() == Some(&rhs_len) {
        return Ok(Broadcast::Channel);
    }
    Err(anyhow!(
        "{} cannot broadcast {:?} against {:?}",
        op,
        rhs,
        lhs
    ))
}

struct BinaryKernel {
    name: &'static str,
    apply: fn(f32, f32) -> f32,
}

impl OpKernel for BinaryKernel {
    fn prepare(&self, inputs: &[&TensorInfo], output: &TensorInfo) -> Result<()> {
        expect_inputs(self.name, inputs, 2)?;
        broadcast_kind(self.name, &inputs[0].shape, &inputs[1].shape)?;
        if output.shape != inputs[0].shape {
            return Err(anyhow!(
                "{} output shape {:?} differs from input {:?}",
                self.name,
                output.shape,
                inputs[0].shape
            ));
        }
        Ok(())
    }

    fn eval(&self, inputs: &[TensorSlice<'_>], output: &mut [f32], _: &[usize]) -> Result<()> {
        expect_inputs(self.name, inputs, 2)?;
        let (lhs, rhs) = (inputs[0], inputs[1]);
        match broadcast_kind(self.name, lhs.shape, rhs.shape)? {
            Broadcast::Same => {
                for ((out, a), b) in output.iter_mut().zip(lhs.data).zip(rhs.data) {
                    *out = (self.apply)(*a, *b);
                }
            }
            Broadcast::Scalar => {
                let b = rhs.data[0];
                for (out, a) in output.iter_mut().zip(lhs.data) {
                    *out = (self.apply)(*a, b);
                }
            }
            Broadcast::Channel => {
                let channels = rhs.data.len();
                for (out_row, in_row) in output
                    .chunks_exact_mut(channels)
                    .zip(lhs.data.chunks_exact(channels))
                {
                    for ((out, a), b) in out_row.iter_mut().zip(in_row).zip(rhs.data) {
                        *out = (self.apply)(*a, *b);
                    }
                }
            }
        }
        Ok(())
    }
}

struct UnaryKernel {
    name: &'static str,
    apply: fn(f32) -> f32,
}

impl OpKernel for UnaryKernel {
    fn prepare(&self, inputs: &[&TensorInfo], output: &TensorInfo) -> Result<()> {
        expect_inputs(self.name, inputs, 1)?;
        if output.shape != inputs[0].shape {
            return Err(anyhow!(
                "{} output shape {:?} differs from input {:?}",
                self.name,
                output.shape,
                inputs[0].shape
            ));
        }
        Ok(())
    }

    fn eval(&self, inputs: &[TensorSlice<'_>], output: &mut [f32], _: &[usize]) -> Result<()> {
        expect_inputs(self.name, inputs, 1)?;
        for (out, x) in output.iter_mut().zip(inputs[0].data) {
            *out = (self.apply)(*x);
        }
        Ok(())
    }
}

fn binary(name: &'static str, apply: fn(f32, f32) -> f32) -> KernelFactory {
    Arc::new(move |params: &[i32]| {
        expect_params(name, params, 0)?;
        Ok(Box::new(BinaryKernel { name, apply }) as Box<dyn OpKernel>)
    })
}

fn unary(name: &'static str, apply: fn(f32) -> f32) -> KernelFactory {
    Arc::new(move |params: &[i32]| {
        expect_params(name, params, 0)?;
        Ok(Box::new(UnaryKernel { name, apply }) as Box<dyn OpKernel>)
    })
}

pub fn register_add() -> KernelFactory {
    binary("ADD", |a, b| a + b)
}

pub fn register_mul() -> KernelFactory {
    binary("MUL", |a, b| a * b)
}

pub fn register_relu() -> KernelFactory {
    unary("RELU", |x| x.max(0.0))
}

pub fn register_logistic() -> KernelFactory {
    unary("LOGISTIC", |x| 1.0 / (1.0 + (-x).exp()))
}
