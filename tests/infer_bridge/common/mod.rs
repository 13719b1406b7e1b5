#![allow(dead_code)]

use anyhow::Result;
use infer_bridge::{BridgeConfig, GraphEngine, ModelBuilder, Session, TensorShape};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const CUSTOM_OP: &str = "Convolution2DTransposeBias";

pub fn session() -> Result<Session<GraphEngine>> {
    Ok(Session::from_config(BridgeConfig::default())?)
}

pub fn random_values(seed: u64, len: usize, scale: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-scale..scale)).collect()
}

pub fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

pub fn shape(height: usize, width: usize, channels: usize) -> TensorShape {
    TensorShape {
        batch: 1,
        height,
        width,
        channels,
    }
}

/// Single RELU node over an `h x w x c` tensor.
pub fn relu_model(height: usize, width: usize, channels: usize) -> Result<Vec<u8>> {
    let mut builder = ModelBuilder::new();
    let x = builder.input("input", &[1, height, width, channels]);
    let y = builder.output("output", &[1, height, width, channels]);
    builder.operator("RELU", &[x], &[y], &[]);
    builder.finish()
}

/// Encoder/decoder in the shape of a segmentation network: a stride-2
/// convolution down, the custom transposed convolution back up.
pub fn encoder_decoder_model(
    seed: u64,
    height: usize,
    width: usize,
    in_channels: usize,
    out_channels: usize,
    final_op: &str,
) -> Result<Vec<u8>> {
    let hidden = 8;
    let (half_h, half_w) = (height.div_ceil(2), width.div_ceil(2));
    let mut builder = ModelBuilder::new();
    let input = builder.input("input", &[1, height, width, in_channels]);
    let w1 = builder.constant(
        "encoder/weights",
        &[hidden, 3, 3, in_channels],
        &random_values(seed, hidden * 9 * in_channels, 0.5),
    );
    let b1 = builder.constant("encoder/bias", &[hidden], &random_values(seed + 1, hidden, 0.1));
    let encoded = builder.tensor("encoded", &[1, half_h, half_w, hidden]);
    let w2 = builder.constant(
        "decoder/weights",
        &[out_channels, 2, 2, hidden],
        &random_values(seed + 2, out_channels * 4 * hidden, 0.5),
    );
    let b2 = builder.constant(
        "decoder/bias",
        &[out_channels],
        &random_values(seed + 3, out_channels, 0.1),
    );
    let decoded = builder.tensor("decoded", &[1, half_h * 2, half_w * 2, out_channels]);
    let output = builder.output("output", &[1, half_h * 2, half_w * 2, out_channels]);

    builder.operator("CONV_2D", &[input, w1, b1], &[encoded], &[2, 2, 0, 1]);
    builder.operator(CUSTOM_OP, &[encoded, w2, b2], &[decoded], &[2, 2, 0]);
    builder.operator(final_op, &[decoded], &[output], &[]);
    builder.finish()
}

/// 256x256x3 in, 256x256x3 out.
pub fn scenario_model() -> Result<Vec<u8>> {
    encoder_decoder_model(7, 256, 256, 3, 3, "LOGISTIC")
}

/// Two-channel (background, person) logits at the given extent.
pub fn segmentation_model(height: usize, width: usize) -> Result<Vec<u8>> {
    encoder_decoder_model(11, height, width, 3, 2, "RELU")
}
