//! # Types
//!
//! Target-agnostic types shared by the memory backends and the allocator
//! decoders.

pub mod address;
pub mod arch;
pub mod region;

// Re-export all public types
pub use address::Address;
pub use arch::Architecture;
pub use region::MemoryRegion;
