//! Common module for library exports

pub use crate::abi::{AbiOverrides, AbiProfile, AbiResolver, AllocatorVersion};
pub use crate::arena::{ArenaRef, ArenaView};
pub use crate::chunk::{Chunk, ChunkHeader};
pub use crate::error::{HeapError, HeapResult};
pub use crate::inspect::{BinReport, ChunkRecord, Inspector};
#[cfg(target_os = "linux")]
pub use crate::memory::ProcessMemory;
pub use crate::memory::{MemoryBackend, MemoryImage};
pub use crate::types::{Address, Architecture, MemoryRegion};
pub use crate::walker::{BinChunk, Termination, WalkOutcome};
