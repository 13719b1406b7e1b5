#[macro_use]
pub mod logging;

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod ops;
pub mod registry;
pub mod segmentation;
pub mod session;
pub mod stats;
pub mod tensor;

pub use buffer::ModelBuffer;
pub use config::{BridgeConfig, MODEL_BUFFER_CAPACITY};
pub use engine::{GraphEngine, GraphModel, InferenceEngine, Interpreter, ModelBuilder, TensorId};
pub use error::{BridgeError, Result, STATUS_FAILURE, STATUS_OK};
pub use ops::{KernelFactory, OpKernel, TensorSlice};
pub use registry::{build_registry, OpRegistry};
pub use segmentation::InputResolution;
pub use session::{Generation, LoadPhase, ModelSummary, Session, SessionState, TensorHandle};
pub use stats::{InferenceStats, StatsSnapshot};
pub use tensor::{ElementType, TensorInfo, TensorShape};
