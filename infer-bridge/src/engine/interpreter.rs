use anyhow::{anyhow, Context, Result};

use super::format::GraphModel;
use super::{InferenceEngine, Interpreter};
use crate::config::BridgeConfig;
use crate::ops::{OpKernel, TensorSlice};
use crate::registry::OpRegistry;
use crate::tensor::{ElementType, TensorInfo};

/// Engine for IBGF graphs evaluated with the kernels in [`crate::ops`].
#[derive(Debug, Clone)]
pub struct GraphEngine {
    max_arena_bytes: usize,
}

impl Default for GraphEngine {
    fn default() -> Self {
        Self::with_config(&BridgeConfig::default())
    }
}

impl GraphEngine {
    pub fn new(max_arena_bytes: usize) -> Self {
        Self { max_arena_bytes }
    }

    pub fn with_config(config: &BridgeConfig) -> Self {
        Self::new(config.max_arena_bytes)
    }
}

impl InferenceEngine for GraphEngine {
    type Model = GraphModel;
    type Interpreter = GraphInterpreter;

    fn parse_model(&self, bytes: &[u8]) -> Result<GraphModel> {
        GraphModel::parse(bytes)
    }

    fn build_interpreter(&self, model: GraphModel, registry: &OpRegistry) -> Result<GraphInterpreter> {
        GraphInterpreter::build(model, registry, self.max_arena_bytes)
    }
}

struct Node {
    opcode: String,
    kernel: Box<dyn OpKernel>,
    inputs: Vec<usize>,
    output: usize,
}

pub struct GraphInterpreter {
    tensors: Vec<TensorInfo>,
    constants: Vec<Option<Vec<f32>>>,
    storage: Vec<Vec<f32>>,
    nodes: Vec<Node>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    allocated: bool,
    max_arena_bytes: usize,
}

impl std::fmt::Debug for GraphInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphInterpreter")
            .field("tensors", &self.tensors.len())
            .field("nodes", &self.nodes.iter().map(|n| n.opcode.as_str()).collect::<Vec<_>>())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("allocated", &self.allocated)
            .finish()
    }
}

impl GraphInterpreter {
    fn build(model: GraphModel, registry: &OpRegistry, max_arena_bytes: usize) -> Result<Self> {
        let mut tensors = Vec::with_capacity(model.tensors.len());
        let mut constants = Vec::with_capacity(model.tensors.len());
        for tensor in model.tensors {
            tensors.push(TensorInfo {
                name: tensor.name,
                shape: tensor.dims,
                element_type: tensor.element_type,
            });
            constants.push(tensor.data);
        }

        // A tensor is available once it is a graph input, a constant, or the
        // output of an earlier node.
        let mut available: Vec<bool> = constants.iter().map(Option::is_some).collect();
        for &index in &model.inputs {
            if constants[index].is_some() {
                return Err(anyhow!("graph input {} is a constant", tensors[index].name));
            }
            available[index] = true;
        }

        let mut nodes = Vec::with_capacity(model.operators.len());
        for (position, op) in model.operators.into_iter().enumerate() {
            let kernel = registry
                .resolve(&op.opcode, &op.params)
                .with_context(|| format!("node {}", position))?;
            let output = match op.outputs.as_slice() {
                [single] => *single,
                other => {
                    return Err(anyhow!(
                        "node {} ({}) has {} outputs, expected 1",
                        position,
                        op.opcode,
                        other.len()
                    ))
                }
            };
            if available[output] {
                return Err(anyhow!(
                    "node {} ({}) writes tensor {} which is already defined",
                    position,
                    op.opcode,
                    tensors[output].name
                ));
            }
            for &input in &op.inputs {
                if !available[input] {
                    return Err(anyhow!(
                        "node {} ({}) reads tensor {} before it is produced",
                        position,
                        op.opcode,
                        tensors[input].name
                    ));
                }
            }
            available[output] = true;
            nodes.push(Node {
                opcode: op.opcode,
                kernel,
                inputs: op.inputs,
                output,
            });
        }

        for &index in &model.outputs {
            if !available[index] {
                return Err(anyhow!(
                    "graph output {} is never produced",
                    tensors[index].name
                ));
            }
        }

        Ok(Self {
            tensors,
            constants,
            storage: Vec::new(),
            nodes,
            inputs: model.inputs,
            outputs: model.outputs,
            allocated: false,
            max_arena_bytes,
        })
    }

    fn plan_arena(&self) -> Result<usize> {
        let mut total = 0usize;
        for tensor in &self.tensors {
            if tensor.element_type != ElementType::F32 {
                return Err(anyhow!(
                    "tensor {} has unsupported element type {:?}",
                    tensor.name,
                    tensor.element_type
                ));
            }
            if tensor.shape.iter().any(|dim| *dim == 0) {
                return Err(anyhow!(
                    "tensor {} has an empty dimension in {:?}",
                    tensor.name,
                    tensor.shape
                ));
            }
            let bytes = tensor
                .shape
                .iter()
                .try_fold(tensor.element_type.size_in_bytes(), |acc, dim| acc.checked_mul(*dim))
                .ok_or_else(|| anyhow!("tensor {} size overflows", tensor.name))?;
            total = total
                .checked_add(bytes)
                .ok_or_else(|| anyhow!("arena size overflows"))?;
        }
        if total > self.max_arena_bytes {
            return Err(anyhow!(
                "graph needs {} bytes of tensor storage, limit is {}",
                total,
                self.max_arena_bytes
            ));
        }
        Ok(total)
    }

    fn prepare_nodes(&self) -> Result<()> {
        for (position, node) in self.nodes.iter().enumerate() {
            let inputs: Vec<&TensorInfo> = node.inputs.iter().map(|&i| &self.tensors[i]).collect();
            node.kernel
                .prepare(&inputs, &self.tensors[node.output])
                .with_context(|| format!("prepare node {} ({})", position, node.opcode))?;
        }
        Ok(())
    }
}

impl Interpreter for GraphInterpreter {
    fn allocate_tensors(&mut self) -> Result<()> {
        if self.allocated {
            return Ok(());
        }
        let arena_bytes = self.plan_arena()?;
        self.prepare_nodes()?;

        let mut storage = Vec::with_capacity(self.tensors.len());
        for (tensor, constant) in self.tensors.iter().zip(&self.constants) {
            match constant {
                Some(values) => storage.push(values.clone()),
                None => storage.push(vec![0.0; tensor.element_count()]),
            }
        }
        self.storage = storage;
        self.allocated = true;
        crate::trace!(
            "allocated {} tensors ({} bytes) for {} nodes",
            self.tensors.len(),
            arena_bytes,
            self.nodes.len()
        );
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        if !self.allocated {
            return Err(anyhow!("invoke before tensors were allocated"));
        }
        for (position, node) in self.nodes.iter().enumerate() {
            // Moving the Vec out keeps its heap buffer, so tensor addresses
            // are unchanged once it is put back.
            let mut output = std::mem::take(&mut self.storage[node.output]);
            let result = {
                let inputs: Vec<TensorSlice<'_>> = node
                    .inputs
                    .iter()
                    .map(|&i| TensorSlice {
                        data: &self.storage[i],
                        shape: &self.tensors[i].shape,
                    })
                    .collect();
                node.kernel
                    .eval(&inputs, &mut output, &self.tensors[node.output].shape)
            };
            self.storage[node.output] = output;
            result.with_context(|| format!("eval node {} ({})", position, node.opcode))?;
        }
        Ok(())
    }

    fn inputs(&self) -> &[usize] {
        &self.inputs
    }

    fn outputs(&self) -> &[usize] {
        &self.outputs
    }

    fn tensor(&self, index: usize) -> Option<TensorInfo> {
        self.tensors.get(index).cloned()
    }

    fn tensor_data(&self, index: usize) -> Option<&[f32]> {
        if !self.allocated {
            return None;
        }
        self.storage.get(index).map(Vec::as_slice)
    }

    fn tensor_data_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        if !self.allocated {
            return None;
        }
        self.storage.get_mut(index).map(Vec::as_mut_slice)
    }

    fn operator_count(&self) -> usize {
        self.nodes.len()
    }
}
