use cinder::memory::MemoryError;
use thiserror::Error;

/// Failures surfaced by the varargs machinery.
///
/// Usage errors (`ArgIndexOutOfBounds`, `ExplicitCountTooLarge`,
/// `Uninitialized`, `BadHeaderOffset`) are caused by the interpreted
/// program and are reported back to it. `UnsupportedOnForeign` marks
/// operations a bare native `va_list` cannot carry out.
/// `Inconsistent` means a closed-type-system invariant was violated;
/// it is never retried.
#[derive(Debug, Error)]
pub enum VaError {
    #[error("va_arg index {index} out of bounds: {available} variadic arguments available")]
    ArgIndexOutOfBounds { index: usize, available: usize },
    #[error("explicit argument count {explicit} exceeds total argument count {total}")]
    ExplicitCountTooLarge { explicit: usize, total: usize },
    #[error("operation on an uninitialized va_list")]
    Uninitialized,
    #[error("va_list header has no field at byte offset {offset}")]
    BadHeaderOffset { offset: u64 },
    #[error("{operation} is not supported on a va_list received from native code")]
    UnsupportedOnForeign { operation: &'static str },
    #[error("internal inconsistency: {0}")]
    Inconsistent(&'static str),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

pub type VaResult<T> = Result<T, VaError>;
