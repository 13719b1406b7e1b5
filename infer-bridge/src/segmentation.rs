//! Helpers for person-segmentation models: the input resolutions they are
//! published at, RGBA frame ingestion and mask readout.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::tensor::TensorShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputResolution {
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "144p")]
    P144,
    #[serde(rename = "96p")]
    P96,
}

impl InputResolution {
    /// `(width, height)` in pixels.
    pub fn dimensions(self) -> (usize, usize) {
        match self {
            InputResolution::P360 => (640, 360),
            InputResolution::P144 => (256, 144),
            InputResolution::P96 => (160, 96),
        }
    }

    /// Model file stem served for this resolution.
    pub fn meet_model_name(self) -> &'static str {
        match self {
            InputResolution::P144 => "segm_full_v679",
            _ => "segm_lite_v681",
        }
    }
}

/// Write an RGBA8 frame into an NHWC float tensor, scaling to `[0, 1]` and
/// dropping alpha. The frame must already be resized to the tensor extent.
pub fn write_rgba_input(dst: &mut [f32], rgba: &[u8], shape: TensorShape) -> Result<()> {
    if shape.channels != 3 {
        return Err(anyhow!("expected a 3-channel input, got {}", shape.channels));
    }
    let pixels = shape.pixel_count();
    if rgba.len() != pixels * 4 {
        return Err(anyhow!(
            "frame has {} bytes, {}x{} RGBA needs {}",
            rgba.len(),
            shape.width,
            shape.height,
            pixels * 4
        ));
    }
    if dst.len() < pixels * 3 {
        return Err(anyhow!("input tensor holds {} values, need {}", dst.len(), pixels * 3));
    }
    for (out, px) in dst.chunks_exact_mut(3).zip(rgba.chunks_exact(4)) {
        out[0] = f32::from(px[0]) / 255.0;
        out[1] = f32::from(px[1]) / 255.0;
        out[2] = f32::from(px[2]) / 255.0;
    }
    Ok(())
}

/// Turn two-channel `(background, person)` logits into a per-pixel alpha
/// mask, `255 * softmax(person)`.
pub fn person_mask(output: &[f32], shape: TensorShape, mask: &mut [u8]) -> Result<()> {
    if shape.channels != 2 {
        return Err(anyhow!("expected 2-channel logits, got {}", shape.channels));
    }
    let pixels = shape.pixel_count();
    if output.len() < pixels * 2 || mask.len() != pixels {
        return Err(anyhow!(
            "mask of {} pixels does not fit {} logits for {} pixels",
            mask.len(),
            output.len(),
            pixels
        ));
    }
    for (alpha, logits) in mask.iter_mut().zip(output.chunks_exact(2)) {
        let (background, person) = (logits[0], logits[1]);
        let shift = background.max(person);
        let background_exp = (background - shift).exp();
        let person_exp = (person - shift).exp();
        *alpha = (255.0 * person_exp / (background_exp + person_exp)) as u8;
    }
    Ok(())
}
