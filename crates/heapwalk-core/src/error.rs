//! # Error Types
//!
//! Error handling for heap inspection.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

use crate::types::Address;

/// Main error type for heap inspection
///
/// Each variant corresponds to one failure mode of reading allocator
/// structures out of a target's memory.
///
/// ## Error Categories
///
/// 1. **Session errors**: Configuration (no ABI profile can be built)
/// 2. **Usage errors**: OutOfRange, InvalidArgument
/// 3. **Memory errors**: Unreadable, SymbolNotFound
/// 4. **Traversal anomalies**: TraversalFault, CycleDetected
/// 5. **I/O errors**: Io (procfs, dump files)
///
/// Memory errors are local to a single read. The inspector recovers from them
/// at the bin boundary, so they only reach the caller when a single read was
/// requested directly. Configuration errors always propagate.
#[derive(Error, Debug)]
pub enum HeapError
{
    /// The allocator ABI could not be resolved
    ///
    /// Every offset computation depends on the pointer width, so nothing
    /// else in the session can proceed after this.
    #[error("Cannot resolve allocator ABI: {0}")]
    Configuration(String),

    /// A bin index outside `[0, count)` was requested
    #[error("Bin index {index} out of range (fast bin count is {count})")]
    OutOfRange
    {
        /// The index the caller asked for
        index: usize,
        /// Number of fast bins in the resolved profile
        count: usize,
    },

    /// A single memory read failed
    ///
    /// Covers unmapped pages, permission faults, and short reads.
    #[error("Unreadable memory at {0}")]
    Unreadable(Address),

    /// A chain walk hit an unreadable link
    #[error("Traversal fault at {0}")]
    TraversalFault(Address),

    /// A chain walk revisited an address
    #[error("Cycle detected at {0}")]
    CycleDetected(Address),

    /// The backend has no symbol with this name
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Invalid argument passed to an engine function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error (procfs files, memory dumps)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HeapError
{
    /// Whether this error only affects one read rather than the session.
    pub fn is_local(&self) -> bool
    {
        matches!(
            self,
            HeapError::Unreadable(_) | HeapError::TraversalFault(_) | HeapError::CycleDetected(_)
        )
    }
}

/// Convenience type alias for `Result<T, HeapError>`
///
/// ```rust
/// use heapwalk_core::error::HeapResult;
/// fn foo() -> HeapResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type HeapResult<T> = std::result::Result<T, HeapError>;
