//! Error types and handling for ringmem

/// Result type alias for ringmem operations
pub type Result<T> = std::result::Result<T, MemError>;

/// Error kinds reported by pools, allocators and the ring-set assembler.
///
/// Errors are `Clone` so an allocator can keep the last configuration or
/// finalize failure around as its sticky `lasterr`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemError {
    /// Bad geometry request, bad index, oversized request or wrong lifecycle state
    #[error("Invalid argument: {parameter} - {message}")]
    InvalidArgument { parameter: String, message: String },

    /// Lookup table, bitmap, cluster or object allocation failed
    #[error("Out of memory: {message}")]
    OutOfMemory { message: String },

    /// The pool has no free objects left
    #[error("Pool exhausted: {pool}")]
    Exhausted { pool: String },

    /// Device group affinity mismatch on finalize
    #[error("Device group conflict: allocator bound to group {expected}, caller is in group {actual}")]
    Conflict { expected: u32, actual: u32 },

    /// An object was released while already free. Non-fatal, state is unchanged.
    #[error("Double free: object {index} in pool {pool}")]
    DoubleFree { pool: String, index: u32 },
}

impl MemError {
    /// Create an invalid argument error
    pub fn invalid_argument(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an out of memory error
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::OutOfMemory {
            message: message.into(),
        }
    }

    /// Create an exhausted error for the named pool
    pub fn exhausted(pool: impl Into<String>) -> Self {
        Self::Exhausted { pool: pool.into() }
    }

    /// Create a device group conflict error
    pub fn conflict(expected: u32, actual: u32) -> Self {
        Self::Conflict { expected, actual }
    }

    /// Create a double free report
    pub fn double_free(pool: impl Into<String>, index: u32) -> Self {
        Self::DoubleFree {
            pool: pool.into(),
            index,
        }
    }

    /// Whether the error leaves the caller's operation failed.
    ///
    /// A double free is reported but changes nothing, so callers tearing
    /// down state may log it and carry on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::DoubleFree { .. })
    }
}
