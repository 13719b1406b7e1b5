//! C ABI exports for the embedding host.
//!
//! All exports operate on one process-wide [`Session`] behind a mutex, which
//! serializes load, invoke and introspection calls. Status-returning calls
//! yield `0` on success and `1` on failure. Dimension getters return `0` and
//! pointer getters return null when no model is loaded.
//!
//! If the session cannot be created (the operator registry fails to build),
//! every export reports [`BridgeError::InitFailed`] the same way: status `1`,
//! zero dimensions and null pointers.
//!
//! Pointers returned here stay valid until the next successful `loadModel`;
//! `getModelGeneration` changes whenever they are invalidated.

#![allow(non_snake_case)]

use std::ptr;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;

use crate::config::BridgeConfig;
use crate::engine::GraphEngine;
use crate::error::{status_of, BridgeError, Result, STATUS_FAILURE};
use crate::session::Session;

type SharedSession = std::result::Result<Mutex<Session<GraphEngine>>, String>;

static SESSION: Lazy<SharedSession> =
    Lazy::new(|| init_session(Session::from_config(BridgeConfig::from_env())));

fn init_session(session: Result<Session<GraphEngine>>) -> SharedSession {
    session.map(Mutex::new).map_err(|err| {
        crate::critical!("host session unavailable: {}", err);
        err.to_string()
    })
}

fn lock(shared: &SharedSession) -> Result<MutexGuard<'_, Session<GraphEngine>>> {
    match shared {
        Ok(session) => Ok(session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())),
        Err(reason) => Err(BridgeError::InitFailed(reason.clone())),
    }
}

fn session() -> Result<MutexGuard<'static, Session<GraphEngine>>> {
    lock(&SESSION)
}

fn dimension(what: &str, value: Result<usize>) -> i32 {
    match value {
        Ok(value) => i32::try_from(value).unwrap_or(i32::MAX),
        Err(err) => {
            crate::error!("{}: {}", what, err);
            0
        }
    }
}

fn pointer<T>(what: &str, value: Result<*mut T>) -> *mut T {
    value.unwrap_or_else(|err| {
        crate::error!("{}: {}", what, err);
        ptr::null_mut()
    })
}

fn generation_code(raw: u64) -> u32 {
    u32::try_from(raw).unwrap_or(u32::MAX)
}

#[no_mangle]
pub extern "C" fn getModelBufferMemoryOffset() -> *mut u8 {
    let ptr = session().map(|mut session| session.buffer_ptr());
    pointer("getModelBufferMemoryOffset", ptr)
}

#[no_mangle]
pub extern "C" fn getModelBufferCapacity() -> i32 {
    let capacity = session().map(|session| session.buffer_capacity());
    dimension("getModelBufferCapacity", capacity)
}

#[no_mangle]
pub extern "C" fn loadModel(buffer_size: i32) -> i32 {
    let declared = match usize::try_from(buffer_size) {
        Ok(declared) => declared,
        Err(_) => {
            crate::error!("{}", BridgeError::InvalidLength(i64::from(buffer_size)));
            return STATUS_FAILURE;
        }
    };
    let result = session().and_then(|mut session| session.load(declared));
    if let Err(BridgeError::InitFailed(_)) = &result {
        crate::error!("loadModel: session was never initialized");
    }
    status_of(&result)
}

#[no_mangle]
pub extern "C" fn getInputMemoryOffset() -> *mut f32 {
    let ptr = session().and_then(|mut session| session.input_data_ptr());
    pointer("getInputMemoryOffset", ptr)
}

#[no_mangle]
pub extern "C" fn getInputHeight() -> i32 {
    dimension("getInputHeight", session().and_then(|s| s.input_height()))
}

#[no_mangle]
pub extern "C" fn getInputWidth() -> i32 {
    dimension("getInputWidth", session().and_then(|s| s.input_width()))
}

#[no_mangle]
pub extern "C" fn getInputChannelCount() -> i32 {
    dimension("getInputChannelCount", session().and_then(|s| s.input_channels()))
}

#[no_mangle]
pub extern "C" fn getOutputMemoryOffset() -> *mut f32 {
    let ptr = session()
        .and_then(|mut session| session.output_data_ptr())
        .map(|p| p as *mut f32);
    pointer("getOutputMemoryOffset", ptr)
}

#[no_mangle]
pub extern "C" fn getOutputHeight() -> i32 {
    dimension("getOutputHeight", session().and_then(|s| s.output_height()))
}

#[no_mangle]
pub extern "C" fn getOutputWidth() -> i32 {
    dimension("getOutputWidth", session().and_then(|s| s.output_width()))
}

#[no_mangle]
pub extern "C" fn getOutputChannelCount() -> i32 {
    dimension("getOutputChannelCount", session().and_then(|s| s.output_channels()))
}

#[no_mangle]
pub extern "C" fn runInference() -> i32 {
    status_of(&session().and_then(|mut session| session.invoke()))
}

/// Generation of the loaded model, `0` when none is loaded. Saturates at
/// `u32::MAX`.
#[no_mangle]
pub extern "C" fn getModelGeneration() -> u32 {
    session()
        .ok()
        .and_then(|session| session.generation())
        .map(|generation| generation_code(generation.get()))
        .unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn getLastInferenceMicros() -> u32 {
    session()
        .map(|session| u32::try_from(session.stats().last_micros).unwrap_or(u32::MAX))
        .unwrap_or(0)
}
