//! # heapwalk-core
//!
//! Read-only reconstruction of glibc malloc state from a target's memory.
//!
//! Given a way to read the target ([`memory::MemoryBackend`]) and a handful of
//! ABI constants ([`abi::AbiProfile`]), this crate locates an arena's fast-bin
//! table, walks each singly-linked chain of free chunks, and reports what it
//! found, including where and why a chain stopped.
//!
//! ## Pipeline
//!
//! 1. [`abi::AbiResolver`] builds the session's profile from the target's
//!    pointer width (once, then memoized)
//! 2. [`arena::ArenaView`] computes slot addresses and reads bin heads
//! 3. [`walker::walk`] follows each chain lazily through [`chunk::decode`]
//! 4. [`inspect::Inspector`] assembles per-bin [`inspect::BinReport`]s
//!
//! ## Untrusted memory
//!
//! Everything read from the target may be stale, torn, or deliberately
//! corrupted. Walks never run forever (a revisited address ends the walk as a
//! cycle) and never abort an inspection (an unreadable link ends only its own
//! bin). Nothing read from the target is cached between calls.

pub mod abi;
pub mod arena;
pub mod chunk;
pub mod error;
pub mod inspect;
pub mod memory;
pub mod prelude;
pub mod types;
pub mod walker;

// Re-export commonly used types
pub use abi::{AbiOverrides, AbiProfile, AbiResolver, AllocatorVersion};
pub use arena::{ArenaRef, ArenaView};
pub use error::{HeapError, HeapResult};
pub use inspect::{list_bins, BinReport, ChunkRecord, Inspector};
pub use memory::{MemoryBackend, MemoryImage};
pub use types::{Address, Architecture};
pub use walker::{walk, BinWalk, Termination};
