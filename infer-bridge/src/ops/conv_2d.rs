use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::{
    dot, expect_inputs, expect_params, nhwc, positive_stride, Activation, FilterShape,
    KernelFactory, OpKernel, Padding, TensorSlice,
};
use crate::tensor::TensorInfo;

/// NHWC convolution with OHWI weights and a per-channel bias.
///
/// Parameters: `[stride_h, stride_w, padding, fused_activation]`.
#[derive(Debug, Clone, Copy)]
struct Conv2d {
    stride_h: usize,
    stride_w: usize,
    padding: Padding,
    activation: Activation,
}

/// Output extent and leading pad for one spatial axis.
pub(crate) fn conv_output_extent(
    input: usize,
    kernel: usize,
    stride: usize,
    padding: Padding,
) -> Option<(usize, usize)> {
    match padding {
        Padding::Same => {
            let out = input.div_ceil(stride);
            let needed = (out.checked_sub(1)? * stride + kernel).saturating_sub(input);
            Some((out, needed / 2))
        }
        Padding::Valid => {
            let span = input.checked_sub(kernel)?;
            Some((span / stride + 1, 0))
        }
    }
}

impl OpKernel for Conv2d {
    fn prepare(&self, inputs: &[&TensorInfo], output: &TensorInfo) -> Result<()> {
        expect_inputs("CONV_2D", inputs, 3)?;
        let filter = FilterShape::check("CONV_2D", inputs[0], inputs[1], inputs[2])?;
        let [n, h, w, _] = nhwc("CONV_2D", &inputs[0].shape)?;
        let (out_h, _) = conv_output_extent(h, filter.kernel_h, self.stride_h, self.padding)
            .ok_or_else(|| anyhow!("CONV_2D kernel taller than input"))?;
        let (out_w, _) = conv_output_extent(w, filter.kernel_w, self.stride_w, self.padding)
            .ok_or_else(|| anyhow!("CONV_2D kernel wider than input"))?;
        let expected = [n, out_h, out_w, filter.out_channels];
        if output.shape != expected {
            return Err(anyhow!(
                "CONV_2D output shape {:?}, expected {:?}",
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
        expect_inputs("CONV_2D", inputs, 3)?;
        let (input, weights, bias) = (inputs[0], inputs[1], inputs[2]);
        let [batch, in_h, in_w, in_c] = nhwc("CONV_2D", input.shape)?;
        let [_, out_h, out_w, out_c] = nhwc("CONV_2D", output_shape)?;
        let filter = FilterShape::from_shape(weights.shape);
        let (_, pad_top) = conv_output_extent(in_h, filter.kernel_h, self.stride_h, self.padding)
            .ok_or_else(|| anyhow!("CONV_2D kernel taller than input"))?;
        let (_, pad_left) = conv_output_extent(in_w, filter.kernel_w, self.stride_w, self.padding)
            .ok_or_else(|| anyhow!("CONV_2D kernel wider than input"))?;

        for b in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let out_base = ((b * out_h + oy) * out_w + ox) * out_c;
                    for co in 0..out_c {
                        let mut acc = bias.data[co];
                        for ky in 0..filter.kernel_h {
                            let iy = (oy * self.stride_h + ky) as isize - pad_top as isize;
                            if iy < 0 || iy >= in_h as isize {
                                continue;
                            }
                            for kx in 0..filter.kernel_w {
                                let ix = (ox * self.stride_w + kx) as isize - pad_left as isize;
                                if ix < 0 || ix >= in_w as isize {
                                    continue;
                                }
                                let in_base =
                                    ((b * in_h + iy as usize) * in_w + ix as usize) * in_c;
                                let w_base = filter.offset(co, ky, kx);
                                acc += dot(
                                    &input.data[in_base..in_base + in_c],
                                    &weights.data[w_base..w_base + in_c],
                                );
                            }
                        }
                        output[out_base + co] = self.activation.apply(acc);
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn register_conv_2d() -> KernelFactory {
    Arc::new(|params: &[i32]| {
        expect_params("CONV_2D", params, 4)?;
        Ok(Box::new(Conv2d {
            stride_h: positive_stride("CONV_2D", params[0])?,
            stride_w: positive_stride("CONV_2D", params[1])?,
            padding: Padding::from_param(params[2])?,
            activation: Activation::from_param(params[3])?,
        }) as Box<dyn OpKernel>)
    })
}
