use thiserror::Error;

use crate::session::Generation;

pub type Result<T> = std::result::Result<T, BridgeError>;

pub const STATUS_OK: i32 = 0;
pub const STATUS_FAILURE: i32 = 1;

/// Failures reported across the host boundary.
///
/// The host only ever sees [`STATUS_FAILURE`]; the variants keep the cause
/// distinguishable for logs and Rust callers.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge initialization failed: {0}")]
    InitFailed(String),

    #[error("declared model length {declared} exceeds buffer capacity {capacity}")]
    BufferOverflow { declared: usize, capacity: usize },

    #[error("invalid model length {0}")]
    InvalidLength(i64),

    #[error("model parse failed: {0}")]
    ParseFailed(String),

    #[error("interpreter build failed: {0}")]
    BuildFailed(String),

    #[error("tensor allocation failed: {0}")]
    AllocationFailed(String),

    #[error("unsupported graph: {0}")]
    UnsupportedGraph(String),

    #[error("no model loaded")]
    NotReady,

    #[error("inference failed: {0}")]
    ExecutionFailed(String),

    #[error("tensor view from generation {presented} used while generation {current} is loaded")]
    StaleGeneration {
        presented: Generation,
        current: Generation,
    },
}

impl BridgeError {
    pub fn status_code(&self) -> i32 {
        STATUS_FAILURE
    }

    /// True for the errors a failed `load` can produce.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            BridgeError::BufferOverflow { .. }
                | BridgeError::InvalidLength(_)
                | BridgeError::ParseFailed(_)
                | BridgeError::BuildFailed(_)
                | BridgeError::AllocationFailed(_)
                | BridgeError::UnsupportedGraph(_)
        )
    }
}

/// Collapse a result into the host status code.
pub fn status_of<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(err) => err.status_code(),
    }
}
