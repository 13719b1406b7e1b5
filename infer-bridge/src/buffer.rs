use crate::error::{BridgeError, Result};

/// Fixed-capacity region the host copies serialized model bytes into.
///
/// The storage is allocated once and never resized, so the address handed
/// out by [`ModelBuffer::as_mut_ptr`] stays valid for as long as the buffer
/// lives. Only the length declared at load time is trusted.
#[derive(Debug)]
pub struct ModelBuffer {
    bytes: Box<[u8]>,
}

impl ModelBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    pub fn model_bytes(&self, declared: usize) -> Result<&[u8]> {
        self.check_len(declared)?;
        Ok(&self.bytes[..declared])
    }

    /// Bounded copy into the region, for hosts that hold a Rust slice.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .ok_or(BridgeError::BufferOverflow {
                declared: usize::MAX,
                capacity: self.capacity(),
            })?;
        self.check_len(end)?;
        self.bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn check_len(&self, declared: usize) -> Result<()> {
        if declared > self.capacity() {
            return Err(BridgeError::BufferOverflow {
                declared,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }
}
