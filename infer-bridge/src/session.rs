//! Model lifecycle over a single shared buffer.
//!
//! A [`Session`] is `Empty` until a load succeeds and `Ready` afterwards. A
//! load builds the new interpreter completely (parse, build, allocate,
//! topology check) before it replaces the current one, so a failed load
//! leaves the previous model current and usable.
//!
//! Every successful load starts a new [`Generation`]. Tensor memory handed
//! out through raw pointers belongs to one generation and must not be used
//! after the next successful load; the generation-checked accessors turn
//! such use into [`BridgeError::StaleGeneration`].
//!
//! Sessions are single-threaded. Callers sharing one across threads must
//! hold a lock around every load, invoke and introspection call, as the
//! host exports in [`crate::ffi`] do.

use std::fmt;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::buffer::ModelBuffer;
use crate::config::{BridgeConfig, MODEL_BUFFER_CAPACITY};
use crate::engine::{GraphEngine, InferenceEngine, Interpreter};
use crate::error::{BridgeError, Result};
use crate::registry::{build_registry, OpRegistry};
use crate::stats::{InferenceStats, StatsSnapshot};
use crate::tensor::{ElementType, TensorShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Generation(u64);

impl Generation {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Ready,
}

/// Step a load was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Reading,
    Parsing,
    Building,
    Allocating,
    Validating,
}

/// Zero-copy view of an input or output tensor, tagged with the generation
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorHandle {
    pub generation: Generation,
    pub shape: TensorShape,
    ptr: NonNull<f32>,
    len: usize,
}

impl TensorHandle {
    pub fn as_ptr(&self) -> *mut f32 {
        self.ptr.as_ptr()
    }

    /// Number of `f32` elements behind the pointer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub generation: Generation,
    pub model_bytes: usize,
    pub input: TensorShape,
    pub output: TensorShape,
    pub operators: usize,
}

struct Loaded<I> {
    interpreter: I,
    generation: Generation,
    model_bytes: usize,
    input: usize,
    output: usize,
    input_shape: TensorShape,
    output_shape: TensorShape,
}

pub struct Session<E: InferenceEngine> {
    engine: E,
    registry: OpRegistry,
    buffer: ModelBuffer,
    current: Option<Loaded<E::Interpreter>>,
    last_generation: u64,
    config: BridgeConfig,
    stats: InferenceStats,
}

impl Session<GraphEngine> {
    /// Graph engine session with the default registry and buffer capacity.
    pub fn from_config(config: BridgeConfig) -> Result<Self> {
        let registry = build_registry().map_err(|err| {
            crate::critical!("operator registry setup failed: {:#}", err);
            BridgeError::InitFailed(format!("{:#}", err))
        })?;
        Ok(Self::with_registry(
            GraphEngine::with_config(&config),
            registry,
            MODEL_BUFFER_CAPACITY,
            config,
        ))
    }
}

impl<E: InferenceEngine> Session<E> {
    pub fn with_registry(engine: E, registry: OpRegistry, capacity: usize, config: BridgeConfig) -> Self {
        let stats = InferenceStats::new(Duration::from_millis(config.stats_window_ms));
        Self {
            engine,
            registry,
            buffer: ModelBuffer::new(capacity),
            current: None,
            last_generation: 0,
            config,
            stats,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.current {
            Some(_) => SessionState::Ready,
            None => SessionState::Empty,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.current.is_some()
    }

    pub fn generation(&self) -> Option<Generation> {
        self.current.as_ref().map(|loaded| loaded.generation)
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    pub fn buffer_ptr(&mut self) -> *mut u8 {
        self.buffer.as_mut_ptr()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Copy `bytes` to the start of the shared buffer and load them.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.write(0, bytes).inspect_err(|err| {
            crate::error!("model copy failed: {}", err);
        })?;
        self.load(bytes.len())
    }

    /// Load the first `declared` bytes of the shared buffer as a model.
    pub fn load(&mut self, declared: usize) -> Result<()> {
        let _scope = crate::logging::scope(format!("load#{}", self.last_generation + 1));
        crate::trace!("loading model of size {}", declared);
        match self.prepare(declared) {
            Ok(loaded) => {
                self.install(loaded);
                Ok(())
            }
            Err((phase, err)) => {
                crate::error!("model load failed while {:?}: {}", phase, err);
                if let Some(generation) = self.generation() {
                    crate::trace!("keeping generation {} current", generation);
                }
                Err(err)
            }
        }
    }

    fn prepare(&self, declared: usize) -> std::result::Result<Loaded<E::Interpreter>, (LoadPhase, BridgeError)> {
        let bytes = self
            .buffer
            .model_bytes(declared)
            .map_err(|err| (LoadPhase::Reading, err))?;

        let model = self.engine.parse_model(bytes).map_err(|err| {
            (LoadPhase::Parsing, BridgeError::ParseFailed(format!("{:#}", err)))
        })?;

        let mut interpreter = self
            .engine
            .build_interpreter(model, &self.registry)
            .map_err(|err| {
                (LoadPhase::Building, BridgeError::BuildFailed(format!("{:#}", err)))
            })?;

        interpreter.allocate_tensors().map_err(|err| {
            (
                LoadPhase::Allocating,
                BridgeError::AllocationFailed(format!("{:#}", err)),
            )
        })?;

        let (input, input_shape) = single_tensor(&interpreter, interpreter.inputs(), "input")
            .map_err(|err| (LoadPhase::Validating, err))?;
        let (output, output_shape) = single_tensor(&interpreter, interpreter.outputs(), "output")
            .map_err(|err| (LoadPhase::Validating, err))?;

        Ok(Loaded {
            interpreter,
            generation: Generation(self.last_generation + 1),
            model_bytes: declared,
            input,
            output,
            input_shape,
            output_shape,
        })
    }

    fn install(&mut self, loaded: Loaded<E::Interpreter>) {
        self.last_generation = loaded.generation.get();
        // Dropping the previous interpreter frees every pointer it handed out.
        self.current = Some(loaded);
        self.stats.reset();
        if let Some(summary) = self.summary() {
            match serde_json::to_string(&summary) {
                Ok(json) => crate::trace!("model ready: {}", json),
                Err(err) => crate::warning!("model summary not serializable: {}", err),
            }
        }
    }

    fn loaded(&self) -> Result<&Loaded<E::Interpreter>> {
        self.current.as_ref().ok_or(BridgeError::NotReady)
    }

    fn loaded_mut(&mut self) -> Result<&mut Loaded<E::Interpreter>> {
        self.current.as_mut().ok_or(BridgeError::NotReady)
    }

    pub fn input_shape(&self) -> Result<TensorShape> {
        Ok(self.loaded()?.input_shape)
    }

    pub fn output_shape(&self) -> Result<TensorShape> {
        Ok(self.loaded()?.output_shape)
    }

    pub fn input_height(&self) -> Result<usize> {
        Ok(self.input_shape()?.height)
    }

    pub fn input_width(&self) -> Result<usize> {
        Ok(self.input_shape()?.width)
    }

    pub fn input_channels(&self) -> Result<usize> {
        Ok(self.input_shape()?.channels)
    }

    pub fn output_height(&self) -> Result<usize> {
        Ok(self.output_shape()?.height)
    }

    pub fn output_width(&self) -> Result<usize> {
        Ok(self.output_shape()?.width)
    }

    pub fn output_channels(&self) -> Result<usize> {
        Ok(self.output_shape()?.channels)
    }

    /// Start of the input tensor, valid for `height * width * channels`
    /// row-major `f32` writes until the next successful load.
    pub fn input_data_ptr(&mut self) -> Result<*mut f32> {
        Ok(self.input_handle()?.as_ptr())
    }

    /// Start of the output tensor; contents are defined after an invoke.
    pub fn output_data_ptr(&mut self) -> Result<*const f32> {
        Ok(self.output_handle()?.as_ptr() as *const f32)
    }

    pub fn input_handle(&mut self) -> Result<TensorHandle> {
        let loaded = self.loaded_mut()?;
        let (index, shape, generation) = (loaded.input, loaded.input_shape, loaded.generation);
        handle(&mut loaded.interpreter, index, shape, generation)
    }

    pub fn output_handle(&mut self) -> Result<TensorHandle> {
        let loaded = self.loaded_mut()?;
        let (index, shape, generation) = (loaded.output, loaded.output_shape, loaded.generation);
        handle(&mut loaded.interpreter, index, shape, generation)
    }

    /// Input storage for `generation`, rejected once another model is loaded.
    pub fn input_mut(&mut self, generation: Generation) -> Result<&mut [f32]> {
        let loaded = self.loaded_mut()?;
        check_generation(loaded.generation, generation)?;
        let index = loaded.input;
        loaded
            .interpreter
            .tensor_data_mut(index)
            .ok_or_else(|| BridgeError::UnsupportedGraph("input tensor has no storage".into()))
    }

    pub fn output(&self, generation: Generation) -> Result<&[f32]> {
        let loaded = self.loaded()?;
        check_generation(loaded.generation, generation)?;
        loaded
            .interpreter
            .tensor_data(loaded.output)
            .ok_or_else(|| BridgeError::UnsupportedGraph("output tensor has no storage".into()))
    }

    /// Run one forward pass over the current input contents.
    pub fn invoke(&mut self) -> Result<()> {
        let timer_enabled = self.config.timer_enabled;
        let loaded = self.current.as_mut().ok_or_else(|| {
            crate::error!("invoke without a loaded model");
            BridgeError::NotReady
        })?;
        let _scope = crate::logging::scope(format!("invoke#{}", loaded.generation));
        let started = Instant::now();
        loaded.interpreter.invoke().map_err(|err| {
            crate::error!("inference failed: {:#}", err);
            BridgeError::ExecutionFailed(format!("{:#}", err))
        })?;
        if timer_enabled {
            self.stats.record(started.elapsed());
        }
        Ok(())
    }

    pub fn summary(&self) -> Option<ModelSummary> {
        self.current.as_ref().map(|loaded| ModelSummary {
            generation: loaded.generation,
            model_bytes: loaded.model_bytes,
            input: loaded.input_shape,
            output: loaded.output_shape,
            operators: loaded.interpreter.operator_count(),
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

fn check_generation(current: Generation, presented: Generation) -> Result<()> {
    if current != presented {
        return Err(BridgeError::StaleGeneration { presented, current });
    }
    Ok(())
}

fn handle<I: Interpreter>(
    interpreter: &mut I,
    index: usize,
    shape: TensorShape,
    generation: Generation,
) -> Result<TensorHandle> {
    let data = interpreter
        .tensor_data_mut(index)
        .ok_or_else(|| BridgeError::UnsupportedGraph(format!("tensor {} has no storage", index)))?;
    let len = data.len();
    let ptr = NonNull::new(data.as_mut_ptr())
        .ok_or_else(|| BridgeError::UnsupportedGraph(format!("tensor {} has no storage", index)))?;
    Ok(TensorHandle {
        generation,
        shape,
        ptr,
        len,
    })
}

/// Only graphs with exactly one rank-4, batch-1, `f32` tensor on each side
/// are served.
fn single_tensor<I: Interpreter>(
    interpreter: &I,
    indices: &[usize],
    role: &str,
) -> Result<(usize, TensorShape)> {
    let index = match indices {
        [index] => *index,
        other => {
            return Err(BridgeError::UnsupportedGraph(format!(
                "expected exactly one {} tensor, graph declares {}",
                role,
                other.len()
            )))
        }
    };
    let info = interpreter
        .tensor(index)
        .ok_or_else(|| BridgeError::UnsupportedGraph(format!("{} tensor {} is missing", role, index)))?;
    if info.element_type != ElementType::F32 {
        return Err(BridgeError::UnsupportedGraph(format!(
            "{} tensor {} is {:?}, expected F32",
            role, info.name, info.element_type
        )));
    }
    let shape = TensorShape::from_dims(&info.shape)
        .map_err(|err| BridgeError::UnsupportedGraph(format!("{} tensor {}: {}", role, info.name, err)))?;
    if shape.batch != 1 {
        return Err(BridgeError::UnsupportedGraph(format!(
            "{} tensor {} has batch {}, expected 1",
            role, info.name, shape.batch
        )));
    }
    let storage = interpreter.tensor_data(index).map(<[f32]>::len);
    if storage != Some(shape.element_count()) {
        return Err(BridgeError::UnsupportedGraph(format!(
            "{} tensor {} storage does not match its shape",
            role, info.name
        )));
    }
    Ok((index, shape))
}
