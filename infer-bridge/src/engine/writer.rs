use anyhow::{anyhow, Result};

use super::format::{align_up, FLAG_HAS_DATA, FORMAT_VERSION, HEADER_SIZE, MAGIC};
use crate::tensor::{numel, ElementType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(pub usize);

#[derive(Debug, Clone)]
struct TensorEntry {
    name: String,
    element_type: ElementType,
    dims: Vec<usize>,
    data: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
struct OperatorEntry {
    opcode: String,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    params: Vec<i32>,
}

/// Serializes graphs into the IBGF layout read by [`super::GraphModel`].
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    tensors: Vec<TensorEntry>,
    operators: Vec<OperatorEntry>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tensor(&mut self, name: &str, dims: &[usize]) -> TensorId {
        self.tensor_typed(name, dims, ElementType::F32)
    }

    pub fn tensor_typed(&mut self, name: &str, dims: &[usize], element_type: ElementType) -> TensorId {
        self.push(TensorEntry {
            name: name.to_string(),
            element_type,
            dims: dims.to_vec(),
            data: None,
        })
    }

    pub fn constant(&mut self, name: &str, dims: &[usize], data: &[f32]) -> TensorId {
        self.push(TensorEntry {
            name: name.to_string(),
            element_type: ElementType::F32,
            dims: dims.to_vec(),
            data: Some(data.to_vec()),
        })
    }

    pub fn input(&mut self, name: &str, dims: &[usize]) -> TensorId {
        let id = self.tensor(name, dims);
        self.mark_input(id);
        id
    }

    pub fn output(&mut self, name: &str, dims: &[usize]) -> TensorId {
        let id = self.tensor(name, dims);
        self.mark_output(id);
        id
    }

    pub fn mark_input(&mut self, id: TensorId) {
        self.inputs.push(id);
    }

    pub fn mark_output(&mut self, id: TensorId) {
        self.outputs.push(id);
    }

    pub fn operator(&mut self, opcode: &str, inputs: &[TensorId], outputs: &[TensorId], params: &[i32]) {
        self.operators.push(OperatorEntry {
            opcode: opcode.to_string(),
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            params: params.to_vec(),
        });
    }

    fn push(&mut self, entry: TensorEntry) -> TensorId {
        self.tensors.push(entry);
        TensorId(self.tensors.len() - 1)
    }

    pub fn finish(&self) -> Result<Vec<u8>> {
        for tensor in &self.tensors {
            if let Some(data) = &tensor.data {
                if data.len() != numel(&tensor.dims) {
                    return Err(anyhow!(
                        "constant {} has {} values, shape {:?} needs {}",
                        tensor.name,
                        data.len(),
                        tensor.dims,
                        numel(&tensor.dims)
                    ));
                }
            }
        }

        let mut io = Vec::new();
        for id in self.inputs.iter().chain(&self.outputs) {
            put_u32(&mut io, id.0 as u32);
        }
        let offset_tensors = align_up(HEADER_SIZE + io.len(), 8);
        // Tensor entries are fixed-size apart from names, so a dry run with a
        // zero data base gives the section length.
        let tensor_len = self.tensor_section(0).len();
        let offset_ops = align_up(offset_tensors + tensor_len, 8);
        let ops = self.operator_section();
        let offset_data = align_up(offset_ops + ops.len(), 8);
        let tensors = self.tensor_section(offset_data);
        let data = self.data_section();
        let file_size = offset_data + data.len();

        let mut out = Vec::with_capacity(file_size);
        out.extend_from_slice(MAGIC);
        put_u32(&mut out, FORMAT_VERSION);
        put_u32(&mut out, self.tensors.len() as u32);
        put_u32(&mut out, self.operators.len() as u32);
        put_u32(&mut out, self.inputs.len() as u32);
        put_u32(&mut out, self.outputs.len() as u32);
        put_u64(&mut out, offset_tensors as u64);
        put_u64(&mut out, offset_ops as u64);
        put_u64(&mut out, offset_data as u64);
        put_u64(&mut out, file_size as u64);
        out.extend_from_slice(&io);
        out.resize(offset_tensors, 0);
        out.extend_from_slice(&tensors);
        out.resize(offset_ops, 0);
        out.extend_from_slice(&ops);
        out.resize(offset_data, 0);
        out.extend_from_slice(&data);
        Ok(out)
    }

    fn tensor_section(&self, data_base: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut data_offset = data_base;
        for tensor in &self.tensors {
            put_string(&mut out, &tensor.name);
            put_u32(&mut out, tensor.element_type.raw());
            put_u32(&mut out, tensor.dims.len() as u32);
            for dim in &tensor.dims {
                put_u64(&mut out, *dim as u64);
            }
            match &tensor.data {
                Some(data) => {
                    let nbytes = data.len() * 4;
                    put_u32(&mut out, FLAG_HAS_DATA);
                    put_u32(&mut out, 0);
                    put_u64(&mut out, nbytes as u64);
                    put_u64(&mut out, data_offset as u64);
                    data_offset += align_up(nbytes, 8);
                }
                None => {
                    put_u32(&mut out, 0);
                    put_u32(&mut out, 0);
                    put_u64(&mut out, 0);
                    put_u64(&mut out, 0);
                }
            }
        }
        out
    }

    fn operator_section(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for op in &self.operators {
            put_string(&mut out, &op.opcode);
            put_u32(&mut out, op.inputs.len() as u32);
            put_u32(&mut out, op.outputs.len() as u32);
            for id in op.inputs.iter().chain(&op.outputs) {
                put_u32(&mut out, id.0 as u32);
            }
            put_u32(&mut out, op.params.len() as u32);
            for param in &op.params {
                out.extend_from_slice(&param.to_le_bytes());
            }
        }
        out
    }

    fn data_section(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for data in self.tensors.iter().filter_map(|t| t.data.as_ref()) {
            out.extend_from_slice(bytemuck::cast_slice::<f32, u8>(data));
            let padded = align_up(out.len(), 8);
            out.resize(padded, 0);
        }
        out
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_string(out: &mut Vec<u8>, value: &str) {
    put_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
    let consumed = 4 + value.len();
    out.resize(out.len() + align_up(consumed, 8) - consumed, 0);
}
