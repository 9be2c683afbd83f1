use std::collections::TryReserveError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors returned by pool operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The index was never issued, its object was already removed, or its block was retired.
    #[error("slot {index} is out of range or holds no live object")]
    OutOfRange {
        index: usize,
    },

    /// A new block of `slots` element slots could not be obtained. `source` is `None` when the
    /// requested size overflowed before reaching the allocator.
    #[error("failed to allocate a block of {slots} slots")]
    AllocationFailure {
        slots: usize,
        #[source]
        source: Option<TryReserveError>,
    },
}
