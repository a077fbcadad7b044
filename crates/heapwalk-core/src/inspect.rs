//! # Fast-bin inspection
//!
//! The entry point for reporting layers: [`Inspector::list_bins`] resolves
//! the ABI, reads every requested bin head, walks each chain, and returns one
//! [`BinReport`] per bin.
//!
//! Failures are contained per bin. A bin whose head slot cannot be read, or
//! whose chain faults or loops, is still reported with the chunks decoded so
//! far and the reason it stopped; its siblings are inspected normally. Only
//! errors that make the whole request meaningless propagate: an unresolvable
//! ABI, an out-of-range bin index, or a backend failure that is not tied to a
//! single read (see [`HeapError::is_local`]).

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::abi::{AbiProfile, AbiResolver};
use crate::arena::{fastbin_slot_address, read_bin_head, ArenaRef};
use crate::error::{HeapError, HeapResult};
use crate::memory::MemoryBackend;
use crate::types::Address;
use crate::walker::{walk, Termination};

/// One chunk line of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRecord
{
    pub address: Address,
    pub forward_pointer: Address,
    pub size_class: u64,
}

/// Fast bin chains are short in practice; longer ones spill to the heap.
pub type ChunkList = SmallVec<[ChunkRecord; 8]>;

/// Result of inspecting one fast bin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinReport
{
    pub bin_index: usize,
    /// Address of the bin's slot in `fastbinsY`
    pub slot_address: Address,
    /// Head pointer, or `None` if the slot itself could not be read
    pub head_address: Option<Address>,
    /// Size class of the bin, derived from its index
    pub size_class: u64,
    pub termination: Termination,
    pub chunks: ChunkList,
}

impl BinReport
{
    /// Whether the bin holds no chunks at all
    pub fn is_empty(&self) -> bool
    {
        self.chunks.is_empty()
    }
}

/// Runs inspections against one backend with one session resolver
pub struct Inspector<'a, B: MemoryBackend + ?Sized>
{
    backend: &'a B,
    resolver: &'a AbiResolver,
}

impl<'a, B: MemoryBackend + ?Sized> Inspector<'a, B>
{
    pub fn new(backend: &'a B, resolver: &'a AbiResolver) -> Self
    {
        Self { backend, resolver }
    }

    /// The session profile
    ///
    /// ## Errors
    ///
    /// `Configuration` if the ABI cannot be resolved.
    pub fn profile(&self) -> HeapResult<&'a AbiProfile>
    {
        self.resolver.resolve(self.backend)
    }

    /// Inspect all fast bins of `arena`, or only `bin_index` if given
    ///
    /// ## Errors
    ///
    /// - `Configuration` if the ABI cannot be resolved
    /// - `OutOfRange` if `bin_index` is past the fast-bin table
    /// - a non-local backend error, such as `Io`
    ///
    /// Memory faults never surface here; they end up in the reports.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use heapwalk_core::abi::AbiResolver;
    /// use heapwalk_core::arena::ArenaRef;
    /// use heapwalk_core::inspect::Inspector;
    /// use heapwalk_core::memory::MemoryImage;
    /// use heapwalk_core::types::{Address, Architecture};
    /// use heapwalk_core::walker::Termination;
    ///
    /// let image = MemoryImage::new(Architecture::X86_64).with_segment(0x7000, vec![0; 0x100]);
    /// let resolver = AbiResolver::new();
    /// let inspector = Inspector::new(&image, &resolver);
    ///
    /// let reports = inspector.list_bins(ArenaRef::new(Address::new(0x7000)), None)?;
    /// assert_eq!(reports.len(), 10);
    /// assert!(reports.iter().all(|r| r.termination == Termination::Empty));
    /// # Ok::<(), heapwalk_core::error::HeapError>(())
    /// ```
    pub fn list_bins(&self, arena: ArenaRef, bin_index: Option<usize>) -> HeapResult<Vec<BinReport>>
    {
        let abi = self.profile()?;
        let indices = match bin_index {
            Some(index) => {
                abi.check_bin_index(index)?;
                index..index + 1
            }
            None => 0..abi.fastbin_count(),
        };

        debug!(%arena, ?bin_index, "Inspecting fast bins");
        indices.map(|index| self.inspect_bin(arena, index, abi)).collect()
    }

    /// Inspect a single bin with an already resolved profile
    ///
    /// ## Errors
    ///
    /// - `OutOfRange` if `bin_index` is past the fast-bin table
    /// - any non-local backend error while reading the head slot
    pub fn inspect_bin(&self, arena: ArenaRef, bin_index: usize, abi: &AbiProfile) -> HeapResult<BinReport>
    {
        let slot_address = fastbin_slot_address(arena, bin_index, abi)?;
        let size_class = abi.size_class(bin_index);

        let head = match read_bin_head(self.backend, arena, bin_index, abi) {
            Ok(head) => head,
            Err(err) if err.is_local() => {
                warn!(bin = bin_index, slot = %slot_address, "Cannot read fast bin head: {err}");
                return Ok(BinReport {
                    bin_index,
                    slot_address,
                    head_address: None,
                    size_class,
                    termination: Termination::Fault(slot_address),
                    chunks: ChunkList::new(),
                });
            }
            Err(err) => return Err(err),
        };

        let outcome = walk(self.backend, head, bin_index, abi).run();
        let chunks = outcome
            .chunks
            .iter()
            .map(|entry| ChunkRecord {
                address: entry.chunk.address,
                forward_pointer: entry.chunk.forward_pointer,
                size_class: entry.size_class,
            })
            .collect();

        debug!(bin = bin_index, %head, termination = %outcome.termination, "Walked fast bin");
        Ok(BinReport {
            bin_index,
            slot_address,
            head_address: Some(head),
            size_class,
            termination: outcome.termination,
            chunks,
        })
    }
}

/// One-shot form of [`Inspector::list_bins`]
///
/// ## Errors
///
/// See [`Inspector::list_bins`].
pub fn list_bins<B: MemoryBackend + ?Sized>(
    backend: &B,
    resolver: &AbiResolver,
    arena: ArenaRef,
    bin_index: Option<usize>,
) -> HeapResult<Vec<BinReport>>
{
    Inspector::new(backend, resolver).list_bins(arena, bin_index)
}
