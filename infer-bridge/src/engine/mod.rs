//! Interface between the session and the engine that actually runs graphs.
//!
//! The session only needs four things from an engine: turn bytes into a
//! model, bind a model to an operator registry, allocate tensor storage and
//! run a forward pass. [`GraphEngine`] is the implementation shipped with the
//! crate; anything else implementing these traits can be dropped in.

mod format;
mod interpreter;
mod writer;

use anyhow::Result;

use crate::registry::OpRegistry;
use crate::tensor::TensorInfo;

pub use format::{GraphModel, ModelOperator, ModelTensor, FORMAT_VERSION, MAGIC};
pub use interpreter::{GraphEngine, GraphInterpreter};
pub use writer::{ModelBuilder, TensorId};

pub trait InferenceEngine {
    type Model;
    type Interpreter: Interpreter;

    fn parse_model(&self, bytes: &[u8]) -> Result<Self::Model>;

    fn build_interpreter(
        &self,
        model: Self::Model,
        registry: &OpRegistry,
    ) -> Result<Self::Interpreter>;
}

/// A compiled execution context.
///
/// Storage returned by [`Interpreter::tensor_data`] must not move between
/// `allocate_tensors` and the drop of the interpreter.
pub trait Interpreter: Send {
    fn allocate_tensors(&mut self) -> Result<()>;

    fn invoke(&mut self) -> Result<()>;

    /// Graph input tensor indices.
    fn inputs(&self) -> &[usize];

    /// Graph output tensor indices.
    fn outputs(&self) -> &[usize];

    fn tensor(&self, index: usize) -> Option<TensorInfo>;

    fn tensor_data(&self, index: usize) -> Option<&[f32]>;

    fn tensor_data_mut(&mut self, index: usize) -> Option<&mut [f32]>;

    fn operator_count(&self) -> usize;
}
