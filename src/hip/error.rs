//! HIP error types

use thiserror::Error;

use crate::error::AllocError;

/// HIP runtime error types
#[derive(Error, Debug, Clone)]
pub enum HipError {
    #[error("HIP initialization failed: {0}")]
    InitializationFailed(String),
    #[error("out of device memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },
    #[error("memory allocation failed: {0}")]
    MemoryAllocationFailed(String),
    #[error("memory query failed: {0}")]
    MemoryQueryFailed(String),
    #[error("no HIP device found")]
    DeviceNotFound,
    #[error("device error: {0}")]
    DeviceError(String),
}

/// HIP result type
pub type HipResult<T> = Result<T, HipError>;

// The allocator core distinguishes OOM (retried after a cache flush) from
// every other driver fault (propagated verbatim).
impl From<HipError> for AllocError {
    fn from(err: HipError) -> Self {
        match err {
            HipError::OutOfMemory { bytes } => AllocError::OutOfMemory { bytes },
            other => AllocError::Driver(other.to_string()),
        }
    }
}
