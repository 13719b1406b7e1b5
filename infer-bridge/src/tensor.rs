use anyhow::{anyhow, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElementType {
    F32,
    I32,
}

impl ElementType {
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(ElementType::F32),
            2 => Ok(ElementType::I32),
            other => Err(anyhow!("unknown element type {}", other)),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            ElementType::F32 => 1,
            ElementType::I32 => 2,
        }
    }

    pub fn size_in_bytes(self) -> usize {
        4
    }
}

/// Descriptor of one tensor declared by a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<usize>,
    pub element_type: ElementType,
}

impl TensorInfo {
    pub fn element_count(&self) -> usize {
        numel(&self.shape)
    }
}

/// Rank-4 NHWC shape as exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TensorShape {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl TensorShape {
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match dims {
            [batch, height, width, channels] => Ok(Self {
                batch: *batch,
                height: *height,
                width: *width,
                channels: *channels,
            }),
            _ => Err(anyhow!("expected rank-4 NHWC shape, got {:?}", dims)),
        }
    }

    pub fn element_count(&self) -> usize {
        numel(&[self.batch, self.height, self.width, self.channels])
    }

    pub fn pixel_count(&self) -> usize {
        numel(&[self.height, self.width])
    }
}

/// Element count, `None` when the product does not fit in `usize`.
pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
}

/// Element count saturating at `usize::MAX`. Shapes coming out of the model
/// reader are already known to fit.
pub fn numel(shape: &[usize]) -> usize {
    checked_numel(shape).unwrap_or(usize::MAX)
}
