use anyhow::{anyhow, Context, Result};

use crate::tensor::{checked_numel, ElementType};

pub const MAGIC: &[u8; 4] = b"IBGF";
pub const FORMAT_VERSION: u32 = 1;
pub(crate) const HEADER_SIZE: usize = 56;
pub(crate) const MAX_RANK: usize = 8;
pub(crate) const FLAG_HAS_DATA: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelTensor {
    pub name: String,
    pub element_type: ElementType,
    pub dims: Vec<usize>,
    /// Constant contents; `None` for activations the interpreter allocates.
    pub data: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOperator {
    pub opcode: String,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub params: Vec<i32>,
}

/// Parsed, immutable graph description.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphModel {
    pub tensors: Vec<ModelTensor>,
    pub operators: Vec<ModelOperator>,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

impl GraphModel {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(anyhow!(
                "model is {} bytes, smaller than the {} byte header",
                data.len(),
                HEADER_SIZE
            ));
        }

        let mut cursor = 0usize;
        let magic = read_bytes(data, &mut cursor, MAGIC.len())?;
        if magic != MAGIC {
            return Err(anyhow!("invalid IBGF magic"));
        }
        let version = read_u32(data, &mut cursor)?;
        if version != FORMAT_VERSION {
            return Err(anyhow!("unsupported IBGF version {}", version));
        }
        let n_tensors = read_u32(data, &mut cursor)? as usize;
        let n_operators = read_u32(data, &mut cursor)? as usize;
        let n_inputs = read_u32(data, &mut cursor)? as usize;
        let n_outputs = read_u32(data, &mut cursor)? as usize;
        let offset_tensors = read_len(data, &mut cursor, "tensor section offset")?;
        let offset_ops = read_len(data, &mut cursor, "operator section offset")?;
        let offset_data = read_len(data, &mut cursor, "data section offset")?;
        let file_size = read_len(data, &mut cursor, "file size")?;

        if file_size != data.len() {
            return Err(anyhow!(
                "declared size {} does not match {} available bytes",
                file_size,
                data.len()
            ));
        }
        let offsets = [offset_tensors, offset_ops, offset_data, file_size];
        if offset_tensors < HEADER_SIZE || offsets.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(anyhow!("IBGF section offsets are not ascending"));
        }
        if offsets.iter().take(3).any(|off| off % 8 != 0) {
            return Err(anyhow!("IBGF section offset not aligned"));
        }

        let inputs = read_indices(data, &mut cursor, n_inputs, n_tensors)
            .context("read graph inputs")?;
        let outputs = read_indices(data, &mut cursor, n_outputs, n_tensors)
            .context("read graph outputs")?;
        if cursor > offset_tensors {
            return Err(anyhow!("graph io table overlaps the tensor section"));
        }

        let mut tensors = Vec::new();
        let mut tensor_cursor = offset_tensors;
        for index in 0..n_tensors {
            let tensor = read_tensor(data, &mut tensor_cursor, offset_data)
                .with_context(|| format!("read tensor {}", index))?;
            tensors.push(tensor);
        }
        if tensor_cursor > offset_ops {
            return Err(anyhow!("tensor table overlaps the operator section"));
        }

        let mut operators = Vec::new();
        let mut op_cursor = offset_ops;
        for index in 0..n_operators {
            let op = read_operator(data, &mut op_cursor, n_tensors)
                .with_context(|| format!("read operator {}", index))?;
            operators.push(op);
        }
        if op_cursor > offset_data {
            return Err(anyhow!("operator table overlaps the data section"));
        }

        Ok(Self {
            tensors,
            operators,
            inputs,
            outputs,
        })
    }
}

fn read_tensor(data: &[u8], cursor: &mut usize, offset_data: usize) -> Result<ModelTensor> {
    let name = read_string(data, cursor)?;
    let element_type = ElementType::from_raw(read_u32(data, cursor)?)?;
    let ndim = read_u32(data, cursor)? as usize;
    if ndim > MAX_RANK {
        return Err(anyhow!("tensor {} has rank {} (max {})", name, ndim, MAX_RANK));
    }
    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        dims.push(read_len(data, cursor, "dimension")?);
    }
    let expected = checked_numel(&dims)
        .and_then(|count| count.checked_mul(element_type.size_in_bytes()))
        .ok_or_else(|| anyhow!("tensor {} shape {:?} overflows", name, dims))?;
    let flags = read_u32(data, cursor)?;
    let _reserved = read_u32(data, cursor)?;
    let data_nbytes = read_len(data, cursor, "data length")?;
    let data_offset = read_len(data, cursor, "data offset")?;

    let has_data = flags & FLAG_HAS_DATA != 0;
    if !has_data {
        if data_offset != 0 || data_nbytes != 0 {
            return Err(anyhow!(
                "tensor {} without data must have zero offset/size",
                name
            ));
        }
        return Ok(ModelTensor {
            name,
            element_type,
            dims,
            data: None,
        });
    }

    if element_type != ElementType::F32 {
        return Err(anyhow!("constant tensor {} must be f32", name));
    }
    if data_offset < offset_data {
        return Err(anyhow!("tensor {} data precedes the data section", name));
    }
    if data_offset % 4 != 0 {
        return Err(anyhow!("tensor {} data offset not aligned", name));
    }
    if data_nbytes != expected {
        return Err(anyhow!(
            "tensor {} holds {} bytes, shape {:?} needs {}",
            name,
            data_nbytes,
            dims,
            expected
        ));
    }
    let mut data_cursor = data_offset;
    let bytes = read_bytes(data, &mut data_cursor, data_nbytes)
        .with_context(|| format!("tensor {} data out of bounds", name))?;
    let values: Vec<f32> = bytemuck::allocation::pod_collect_to_vec(bytes);

    Ok(ModelTensor {
        name,
        element_type,
        dims,
        data: Some(values),
    })
}

fn read_operator(data: &[u8], cursor: &mut usize, n_tensors: usize) -> Result<ModelOperator> {
    let opcode = read_string(data, cursor)?;
    let n_inputs = read_u32(data, cursor)? as usize;
    let n_outputs = read_u32(data, cursor)? as usize;
    let inputs = read_indices(data, cursor, n_inputs, n_tensors)
        .with_context(|| format!("{} inputs", opcode))?;
    let outputs = read_indices(data, cursor, n_outputs, n_tensors)
        .with_context(|| format!("{} outputs", opcode))?;
    let n_params = read_u32(data, cursor)? as usize;
    let mut params = Vec::new();
    for _ in 0..n_params {
        params.push(read_u32(data, cursor)? as i32);
    }
    Ok(ModelOperator {
        opcode,
        inputs,
        outputs,
        params,
    })
}

fn read_indices(
    data: &[u8],
    cursor: &mut usize,
    count: usize,
    n_tensors: usize,
) -> Result<Vec<usize>> {
    let mut out = Vec::new();
    for _ in 0..count {
        let index = read_u32(data, cursor)? as usize;
        if index >= n_tensors {
            return Err(anyhow!(
                "tensor index {} out of range ({} tensors)",
                index,
                n_tensors
            ));
        }
        out.push(index);
    }
    Ok(out)
}

fn read_bytes<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .ok_or_else(|| anyhow!("length overflow"))?;
    let bytes = data.get(*cursor..end).ok_or_else(|| anyhow!("unexpected EOF"))?;
    *cursor = end;
    Ok(bytes)
}

fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(read_bytes(data, cursor, 4)?);
    Ok(u32::from_le_bytes(raw))
}

fn read_u64(data: &[u8], cursor: &mut usize) -> Result<u64> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(read_bytes(data, cursor, 8)?);
    Ok(u64::from_le_bytes(raw))
}

/// A `u64` field that must also fit the host's `usize`.
fn read_len(data: &[u8], cursor: &mut usize, what: &str) -> Result<usize> {
    let raw = read_u64(data, cursor)?;
    usize::try_from(raw).with_context(|| format!("{} {} does not fit in usize", what, raw))
}

fn read_string(data: &[u8], cursor: &mut usize) -> Result<String> {
    let len = read_u32(data, cursor)? as usize;
    let bytes = read_bytes(data, cursor, len)?;
    let s = std::str::from_utf8(bytes).context("invalid UTF-8 string")?;
    let consumed = 4 + len;
    let skip = align_up(consumed, 8) - consumed;
    read_bytes(data, cursor, skip)?;
    Ok(s.to_string())
}

pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}
