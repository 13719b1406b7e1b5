//! `Convolution2DTransposeBias`: a transposed convolution with a fused bias,
//! registered as a custom operator rather than a builtin.
//!
//! Inputs are the NHWC activation, OHWI weights and a bias vector. The node
//! parameters are `[stride_h, stride_w, padding]`. The output extent is taken
//! from the declared output tensor and validated against the upsampling
//! geometry during `prepare`.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::{
    expect_inputs, expect_params, nhwc, positive_stride, FilterShape, KernelFactory, OpKernel,
    Padding, TensorSlice,
};
use crate::tensor::TensorInfo;

pub const CONVOLUTION_2D_TRANSPOSE_BIAS: &str = "Convolution2DTransposeBias";

#[derive(Debug, Clone, Copy)]
struct TransposeConvBias {
    stride_h: usize,
    stride_w: usize,
    padding: Padding,
}

fn transposed_extent(input: usize, kernel: usize, stride: usize, padding: Padding) -> usize {
    match padding {
        Padding::Same => input * stride,
        Padding::Valid => (input.saturating_sub(1)) * stride + kernel,
    }
}

fn leading_pad(input: usize, output: usize, kernel: usize, stride: usize) -> usize {
    let covered = input.saturating_sub(1) * stride + kernel;
    covered.saturating_sub(output) / 2
}

impl OpKernel for TransposeConvBias {
    fn prepare(&self, inputs: &[&TensorInfo], output: &TensorInfo) -> Result<()> {
        expect_inputs(CONVOLUTION_2D_TRANSPOSE_BIAS, inputs, 3)?;
        let filter =
            FilterShape::check(CONVOLUTION_2D_TRANSPOSE_BIAS, inputs[0], inputs[1], inputs[2])?;
        let [n, h, w, _] = nhwc(CONVOLUTION_2D_TRANSPOSE_BIAS, &inputs[0].shape)?;
        let expected = [
            n,
            transposed_extent(h, filter.kernel_h, self.stride_h, self.padding),
            transposed_extent(w, filter.kernel_w, self.stride_w, self.padding),
            filter.out_channels,
        ];
        if output.shape != expected {
            return Err(anyhow!(
                "{} output shape {:?}, expected {:?}",
                CONVOLUTION_2D_TRANSPOSE_BIAS,
                output.shape,
                expected
            ));
        }
        Ok(())
    }

    fn eval(
        &self,
        inputs: &[TensorSlice<'_>],
        output: &mut [f32],
        output_shape: &[usize],
    ) -> Result<()> {
        expect_inputs(CONVOLUTION_2D_TRANSPOSE_BIAS, inputs, 3)?;
        let (input, weights, bias) = (inputs[0], inputs[1], inputs[2]);
        let [batch, in_h, in_w, in_c] = nhwc(CONVOLUTION_2D_TRANSPOSE_BIAS, input.shape)?;
        let [_, out_h, out_w, out_c] = nhwc(CONVOLUTION_2D_TRANSPOSE_BIAS, output_shape)?;
        let filter = FilterShape::from_shape(weights.shape);
        let pad_top = leading_pad(in_h, out_h, filter.kernel_h, self.stride_h);
        let pad_left = leading_pad(in_w, out_w, filter.kernel_w, self.stride_w);

        for pixel in output.chunks_exact_mut(out_c) {
            pixel.copy_from_slice(&bias.data[..out_c]);
        }

        // Scatter every input pixel through the kernel window.
        for b in 0..batch {
            for iy in 0..in_h {
                for ix in 0..in_w {
                    let in_base = ((b * in_h + iy) * in_w + ix) * in_c;
                    let pixel = &input.data[in_base..in_base + in_c];
                    for ky in 0..filter.kernel_h {
                        let Some(oy) = (iy * self.stride_h + ky).checked_sub(pad_top) else {
                            continue;
                        };
                        if oy >= out_h {
                            continue;
                        }
                        for kx in 0..filter.kernel_w {
                            let Some(ox) = (ix * self.stride_w + kx).checked_sub(pad_left) else {
                                continue;
                            };
                            if ox >= out_w {
                                continue;
                            }
                            let out_base = ((b * out_h + oy) * out_w + ox) * out_c;
                            for co in 0..out_c {
                                let w_base = filter.offset(co, ky, kx);
                                output[out_base + co] +=
                                    super::dot(pixel, &weights.data[w_base..w_base + in_c]);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Factory bound to [`CONVOLUTION_2D_TRANSPOSE_BIAS`] in the default registry.
pub fn register_convolution_2d_transpose_bias() -> KernelFactory {
    Arc::new(|params: &[i32]| {
        expect_params(CONVOLUTION_2D_TRANSPOSE_BIAS, params, 3)?;
        Ok(Box::new(TransposeConvBias {
            stride_h: positive_stride(CONVOLUTION_2D_TRANSPOSE_BIAS, params[0])?,
            stride_w: positive_stride(CONVOLUTION_2D_TRANSPOSE_BIAS, params[1])?,
            padding: Padding::from_param(params[2])?,
        }) as Box<dyn OpKernel>)
    })
}
