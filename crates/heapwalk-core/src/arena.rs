//! # Arena View
//!
//! Random access to the fast-bin table of one `malloc_state`.
//!
//! An [`ArenaRef`] is only a coordinate in the target's address space; it
//! owns nothing and reads nothing by itself. [`ArenaView`] pairs it with a
//! backend and a profile for convenient repeated access.

use std::fmt;

use tracing::{debug, warn};

use crate::abi::AbiProfile;
use crate::error::{HeapError, HeapResult};
use crate::memory::{read_pointer, MemoryBackend};
use crate::types::Address;
use crate::walker::{walk, BinWalk};

/// Symbol naming the main arena in glibc.
pub const MAIN_ARENA_SYMBOL: &str = "main_arena";
/// Per-thread variable holding the arena the thread allocates from.
pub const THREAD_ARENA_SYMBOL: &str = "thread_arena";

/// Base address of a `malloc_state` in the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaRef
{
    base_address: Address,
}

impl ArenaRef
{
    pub const fn new(base_address: Address) -> Self
    {
        Self { base_address }
    }

    /// Locate `main_arena` through the backend's symbol lookup
    ///
    /// ## Errors
    ///
    /// `SymbolNotFound` if the backend cannot resolve the symbol.
    pub fn main_arena<B: MemoryBackend + ?Sized>(backend: &B) -> HeapResult<Self>
    {
        let base_address = backend.read_symbol(MAIN_ARENA_SYMBOL)?;
        debug!(%base_address, "Using main arena");
        Ok(Self::new(base_address))
    }

    /// The arena the target thread currently allocates from
    ///
    /// Reads the pointer stored at `thread_arena`. Falls back to
    /// [`ArenaRef::main_arena`] when the symbol is unknown, its value is
    /// null (the thread has not allocated yet), or it cannot be read.
    ///
    /// ## Errors
    ///
    /// - `SymbolNotFound` if neither symbol resolves
    /// - any non-local error from the backend
    pub fn current<B: MemoryBackend + ?Sized>(backend: &B, abi: &AbiProfile) -> HeapResult<Self>
    {
        match backend.read_symbol(THREAD_ARENA_SYMBOL) {
            Ok(slot) => match read_pointer(backend, slot, abi.pointer_width()) {
                Ok(base_address) if !base_address.is_null() => {
                    debug!(%slot, %base_address, "Using thread arena");
                    return Ok(Self::new(base_address));
                }
                Ok(_) => debug!(%slot, "Thread arena not set yet"),
                Err(err) if err.is_local() => warn!(%slot, "Cannot read thread arena pointer: {err}"),
                Err(err) => return Err(err),
            },
            Err(HeapError::SymbolNotFound(_)) => debug!("No thread arena symbol"),
            Err(err) => return Err(err),
        }
        Self::main_arena(backend)
    }

    pub const fn base_address(&self) -> Address
    {
        self.base_address
    }

    /// Address of `fastbinsY[0]`
    pub fn fastbin_table_address(&self, abi: &AbiProfile) -> Address
    {
        self.base_address + abi.fastbin_table_offset()
    }
}

impl From<Address> for ArenaRef
{
    fn from(base_address: Address) -> Self
    {
        Self::new(base_address)
    }
}

impl fmt::Display for ArenaRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "arena@{}", self.base_address)
    }
}

/// Address of `fastbinsY[bin_index]`
///
/// `base + fastbin_table_offset + bin_index * pointer_width`. Pure.
///
/// ## Errors
///
/// `OutOfRange` if `bin_index >= abi.fastbin_count()`.
pub fn fastbin_slot_address(arena: ArenaRef, bin_index: usize, abi: &AbiProfile) -> HeapResult<Address>
{
    abi.check_bin_index(bin_index)?;
    Ok(arena.fastbin_table_address(abi) + bin_index as u64 * abi.word())
}

/// Read the head pointer of fast bin `bin_index`; null means empty
///
/// ## Errors
///
/// - `OutOfRange` if `bin_index >= abi.fastbin_count()`
/// - `Unreadable(slot)` if the slot cannot be read
pub fn read_bin_head<B: MemoryBackend + ?Sized>(
    backend: &B,
    arena: ArenaRef,
    bin_index: usize,
    abi: &AbiProfile,
) -> HeapResult<Address>
{
    let slot = fastbin_slot_address(arena, bin_index, abi)?;
    read_pointer(backend, slot, abi.pointer_width())
}

/// An arena bound to a backend and a resolved profile
///
/// ## Example
///
/// ```rust
/// use heapwalk_core::abi::AbiProfile;
/// use heapwalk_core::arena::{ArenaRef, ArenaView};
/// use heapwalk_core::memory::MemoryImage;
/// use heapwalk_core::types::{Address, Architecture};
///
/// let image = MemoryImage::new(Architecture::X86_64).with_segment(0x7000, vec![0; 0x100]);
/// let abi = AbiProfile::for_pointer_width(8)?;
/// let view = ArenaView::new(&image, ArenaRef::new(Address::new(0x7000)), &abi);
///
/// assert_eq!(view.slot_address(3)?, Address::new(0x7000 + 8 + 3 * 8));
/// assert!(view.read_bin_head(3)?.is_null());
/// # Ok::<(), heapwalk_core::error::HeapError>(())
/// ```
pub struct ArenaView<'a, B: MemoryBackend + ?Sized>
{
    backend: &'a B,
    arena: ArenaRef,
    abi: &'a AbiProfile,
}

impl<'a, B: MemoryBackend + ?Sized> ArenaView<'a, B>
{
    pub fn new(backend: &'a B, arena: ArenaRef, abi: &'a AbiProfile) -> Self
    {
        Self { backend, arena, abi }
    }

    pub fn arena(&self) -> ArenaRef
    {
        self.arena
    }

    pub fn abi(&self) -> &'a AbiProfile
    {
        self.abi
    }

    /// See [`fastbin_slot_address`]
    pub fn slot_address(&self, bin_index: usize) -> HeapResult<Address>
    {
        fastbin_slot_address(self.arena, bin_index, self.abi)
    }

    /// See [`read_bin_head`]
    pub fn read_bin_head(&self, bin_index: usize) -> HeapResult<Address>
    {
        read_bin_head(self.backend, self.arena, bin_index, self.abi)
    }

    /// Every slot of the table, each read independently
    pub fn bin_heads(&self) -> impl Iterator<Item = (usize, HeapResult<Address>)> + 'a
    {
        let (backend, arena, abi) = (self.backend, self.arena, self.abi);
        (0..abi.fastbin_count()).map(move |bin_index| (bin_index, read_bin_head(backend, arena, bin_index, abi)))
    }

    /// Read the head of `bin_index` and start walking its chain
    ///
    /// ## Errors
    ///
    /// Same as [`read_bin_head`]; faults inside the chain are reported by
    /// the walk itself.
    pub fn walk_bin(&self, bin_index: usize) -> HeapResult<BinWalk<'a, B>>
    {
        let head = self.read_bin_head(bin_index)?;
        Ok(walk(self.backend, head, bin_index, self.abi))
    }
}
