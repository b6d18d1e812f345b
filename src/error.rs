//! Allocator error types

use std::sync::PoisonError;

use thiserror::Error;

/// Errors surfaced by the caching allocator and the dispatch layer.
///
/// Each variant is distinguishable by the caller: `TooLarge` means the
/// request can never succeed and must not be retried, `OutOfMemory` is
/// raised only after the cache has been flushed and the driver refused a
/// second time, `DoubleFreeOrForeign` is a programming error.
#[derive(Error, Debug, Clone)]
pub enum AllocError {
    #[error("requested allocation of {requested} bytes is too large for the caching allocator with maximum bin of {max} bytes")]
    TooLarge { requested: usize, max: usize },
    #[error("out of device memory while allocating {bytes} bytes (after freeing all cached blocks)")]
    OutOfMemory { bytes: usize },
    #[error("trying to free a non-live block at {ptr:#x}")]
    DoubleFreeOrForeign { ptr: usize },
    #[error("driver error: {0}")]
    Driver(String),
    #[error("allocator mutex poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl<T> From<PoisonError<T>> for AllocError {
    fn from(err: PoisonError<T>) -> Self {
        AllocError::LockPoisoned(err.to_string())
    }
}

/// Allocator result type
pub type AllocResult<T> = Result<T, AllocError>;
