//! CPU kernels for the graph engine.
//!
//! Every kernel works on NHWC `f32` tensors. A kernel is created from its
//! node parameters by a [`KernelFactory`], checks shapes in
//! [`OpKernel::prepare`] once storage is allocated, and runs in
//! [`OpKernel::eval`] on every invoke.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::tensor::TensorInfo;

pub mod conv_2d;
pub mod elementwise;
pub mod softmax;
pub mod transpose_conv_bias;

/// Read-only view of one kernel input.
#[derive(Debug, Clone, Copy)]
pub struct TensorSlice<'a> {
    pub data: &'a [f32],
    pub shape: &'a [usize],
}

pub trait OpKernel: Send {
    fn prepare(&self, inputs: &[&TensorInfo], output: &TensorInfo) -> Result<()>;

    fn eval(
        &self,
        inputs: &[TensorSlice<'_>],
        output: &mut [f32],
        output_shape: &[usize],
    ) -> Result<()>;
}

pub type KernelFactory = Arc<dyn Fn(&[i32]) -> Result<Box<dyn OpKernel>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Same,
    Valid,
}

impl Padding {
    pub fn from_param(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Padding::Same),
            1 => Ok(Padding::Valid),
            other => Err(anyhow!("unknown padding mode {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    None,
    Relu,
    Relu6,
}

impl Activation {
    pub fn from_param(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Activation::None),
            1 => Ok(Activation::Relu),
            2 => Ok(Activation::Relu6),
            other => Err(anyhow!("unknown fused activation {}", other)),
        }
    }

    #[inline]
    pub fn apply(self, value: f32) -> f32 {
        match self {
            Activation::None => value,
            Activation::Relu => value.max(0.0),
            Activation::Relu6 => value.clamp(0.0, 6.0),
        }
    }
}

pub(crate) fn expect_params(op: &str, params: &[i32], count: usize) -> Result<()> {
    if params.len() != count {
        return Err(anyhow!(
            "{} expects {} parameters, got {}",
            op,
            count,
            params.len()
        ));
    }
    Ok(())
}

pub(crate) fn expect_inputs<T>(op: &str, inputs: &[T], count: usize) -> Result<()> {
    if inputs.len() != count {
        return Err(anyhow!(
            "{} expects {} inputs, got {}",
            op,
            count,
            inputs.len()
        ));
    }
    Ok(())
}

pub(crate) fn positive_stride(op: &str, raw: i32) -> Result<usize> {
    if raw <= 0 {
        return Err(anyhow!("{} stride must be positive, got {}", op, raw));
    }
    Ok(raw as usize)
}

pub(crate) fn nhwc(op: &str, shape: &[usize]) -> Result<[usize; 4]> {
    match shape {
        [n, h, w, c] => Ok([*n, *h, *w, *c]),
        _ => Err(anyhow!("{} expects a rank-4 tensor, got {:?}", op, shape)),
    }
}

/// Convolution weights laid out as `[out_channels, kernel_h, kernel_w, in_channels]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FilterShape {
    pub out_channels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub in_channels: usize,
}

impl FilterShape {
    pub fn check(op: &str, input: &TensorInfo, filter: &TensorInfo, bias: &TensorInfo) -> Result<Self> {
        let [_, _, _, in_c] = nhwc(op, &input.shape)?;
        let [out_c, kh, kw, filter_in] = match filter.shape.as_slice() {
            [o, h, w, i] => [*o, *h, *w, *i],
            other => return Err(anyhow!("{} expects OHWI weights, got {:?}", op, other)),
        };
        if filter_in != in_c {
            return Err(anyhow!(
                "{} weights expect {} input channels, input has {}",
                op,
                filter_in,
                in_c
            ));
        }
        if bias.shape != [out_c] {
            return Err(anyhow!(
                "{} bias shape {:?} does not match {} output channels",
                op,
                bias.shape,
                out_c
            ));
        }
        Ok(Self {
            out_channels: out_c,
            kernel_h: kh,
            kernel_w: kw,
            in_channels: in_c,
        })
    }

    pub fn from_shape(shape: &[usize]) -> Self {
        Self {
            out_channels: shape[0],
            kernel_h: shape[1],
            kernel_w: shape[2],
            in_channels: shape[3],
        }
    }

    #[inline]
    pub fn offset(&self, out_c: usize, ky: usize, kx: usize) -> usize {
        ((out_c * self.kernel_h + ky) * self.kernel_w + kx) * self.in_channels
    }
}

#[inline]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
pub(crate) fn info(shape: &[usize]) -> TensorInfo {
    TensorInfo {
        name: String::new(),
        shape: shape.to_vec(),
        element_type: crate::tensor::ElementType::F32,
    }
}
