//! # Bin Walker
//!
//! Lazy traversal of a singly-linked fast-bin chain.
//!
//! The chain lives in untrusted memory: links may point at unmapped pages,
//! back into the chain, or change while we read them. The walk therefore
//! stops on exactly one of four conditions and records which one:
//!
//! | Condition                         | [`Termination`]      |
//! |-----------------------------------|----------------------|
//! | head is null                      | `Empty`              |
//! | a chunk's `fd` is null            | `CleanEnd`           |
//! | a chunk cannot be read            | `Fault(chunk)`       |
//! | a chunk's `fd` was already visited| `Cycle(fd)`          |
//!
//! There is no length limit. Every hop either ends the walk or adds a new
//! address to the visited set, so a walk over a finite address space always
//! terminates, and a corrupted bin shows up as a cycle instead of being
//! silently truncated.
//!
//! Each walk issues fresh reads. Walking the same bin twice on a running
//! target may give different results.

use std::collections::HashSet;
use std::fmt;
use std::iter::FusedIterator;

use tracing::{trace, warn};

use crate::abi::AbiProfile;
use crate::chunk::{self, Chunk};
use crate::error::HeapError;
use crate::memory::MemoryBackend;
use crate::types::Address;

/// Why a walk stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Termination
{
    /// The bin head was null
    Empty,
    /// The last chunk had a null `fd`
    CleanEnd,
    /// The chunk at this address could not be read
    Fault(Address),
    /// A chunk linked back to this already-visited address
    Cycle(Address),
}

impl Termination
{
    /// Short name used in reports
    pub const fn label(self) -> &'static str
    {
        match self {
            Termination::Empty => "empty",
            Termination::CleanEnd => "clean-end",
            Termination::Fault(_) => "fault",
            Termination::Cycle(_) => "cycle",
        }
    }

    /// Whether the chain showed signs of corruption or unreadable memory
    pub const fn is_anomaly(self) -> bool
    {
        matches!(self, Termination::Fault(_) | Termination::Cycle(_))
    }

    /// The error describing an abnormal termination
    ///
    /// Returns `None` for `Empty` and `CleanEnd`.
    pub fn as_error(self) -> Option<HeapError>
    {
        match self {
            Termination::Empty | Termination::CleanEnd => None,
            Termination::Fault(address) => Some(HeapError::TraversalFault(address)),
            Termination::Cycle(address) => Some(HeapError::CycleDetected(address)),
        }
    }
}

impl fmt::Display for Termination
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Termination::Fault(address) | Termination::Cycle(address) => write!(f, "{} at {address}", self.label()),
            Termination::Empty | Termination::CleanEnd => f.write_str(self.label()),
        }
    }
}

/// One chunk of a bin together with the bin's size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinChunk
{
    pub chunk: Chunk,
    pub size_class: u64,
}

/// Everything a finished walk produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOutcome
{
    pub chunks: Vec<BinChunk>,
    pub termination: Termination,
}

/// Iterator over the chunks of one fast bin
///
/// Created by [`walk`]. Call [`BinWalk::termination`] after the iterator is
/// exhausted to learn why it stopped. Dropping the iterator early is the
/// way to cancel a walk.
pub struct BinWalk<'a, B: MemoryBackend + ?Sized>
{
    backend: &'a B,
    abi: &'a AbiProfile,
    bin_index: usize,
    size_class: u64,
    next: Option<Address>,
    visited: HashSet<Address>,
    termination: Option<Termination>,
}

/// Start walking the fast bin whose head pointer is `head`
///
/// Nothing is read until the first call to `next`.
///
/// ## Example
///
/// ```rust
/// use heapwalk_core::abi::AbiProfile;
/// use heapwalk_core::memory::MemoryImage;
/// use heapwalk_core::types::{Address, Architecture};
/// use heapwalk_core::walker::{walk, Termination};
///
/// let mut image = MemoryImage::new(Architecture::X86_64).with_segment(0x1000, vec![0; 0x40]);
/// image.write_word(Address::new(0x1010), 0x1020)?; // 0x1000.fd = 0x1020
/// let abi = AbiProfile::for_pointer_width(8)?;
///
/// let outcome = walk(&image, Address::new(0x1000), 1, &abi).run();
/// let addresses: Vec<_> = outcome.chunks.iter().map(|c| c.chunk.address.value()).collect();
/// assert_eq!(addresses, [0x1000, 0x1020]);
/// assert_eq!(outcome.termination, Termination::CleanEnd);
/// # Ok::<(), heapwalk_core::error::HeapError>(())
/// ```
pub fn walk<'a, B: MemoryBackend + ?Sized>(
    backend: &'a B,
    head: Address,
    bin_index: usize,
    abi: &'a AbiProfile,
) -> BinWalk<'a, B>
{
    let mut visited = HashSet::new();
    let (next, termination) = if head.is_null() {
        (None, Some(Termination::Empty))
    } else {
        visited.insert(head);
        (Some(head), None)
    };

    BinWalk {
        backend,
        abi,
        bin_index,
        size_class: abi.size_class(bin_index),
        next,
        visited,
        termination,
    }
}

impl<B: MemoryBackend + ?Sized> BinWalk<'_, B>
{
    pub fn bin_index(&self) -> usize
    {
        self.bin_index
    }

    /// Size class shared by every chunk of this bin
    pub fn size_class(&self) -> u64
    {
        self.size_class
    }

    /// Why the walk stopped, or `None` while it is still in progress
    pub fn termination(&self) -> Option<Termination>
    {
        self.termination
    }

    /// Drain the walk and return the chunks with the termination reason
    pub fn run(mut self) -> WalkOutcome
    {
        let chunks: Vec<BinChunk> = self.by_ref().collect();
        WalkOutcome {
            chunks,
            // An exhausted walk always has a termination.
            termination: self.termination.unwrap_or(Termination::CleanEnd),
        }
    }
}

impl<B: MemoryBackend + ?Sized> Iterator for BinWalk<'_, B>
{
    type Item = BinChunk;

    fn next(&mut self) -> Option<Self::Item>
    {
        let address = self.next.take()?;

        let chunk = match chunk::decode(self.backend, address, self.abi) {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(bin = self.bin_index, %address, "Fast bin chain unreadable: {err}");
                self.termination = Some(Termination::Fault(address));
                return None;
            }
        };

        let forward = chunk.forward_pointer;
        trace!(bin = self.bin_index, %address, %forward, "Fast bin hop");
        if forward.is_null() {
            self.termination = Some(Termination::CleanEnd);
        } else if !self.visited.insert(forward) {
            warn!(bin = self.bin_index, %address, %forward, "Fast bin chain loops");
            self.termination = Some(Termination::Cycle(forward));
        } else {
            self.next = Some(forward);
        }

        Some(BinChunk {
            chunk,
            size_class: self.size_class,
        })
    }
}

impl<B: MemoryBackend + ?Sized> FusedIterator for BinWalk<'_, B> {}
