//! # Chunk Decoding
//!
//! Views of `struct malloc_chunk` materialized from target memory.
//!
//! ```text
//! chunk -> +-----------------+
//!          | prev_size       |  word 0
//!          | size   | A|M|P  |  word 1
//! user  -> | fd              |  word 2
//!          | bk              |  word 3
//!          | ...             |
//! ```
//!
//! A chunk sitting in a fast bin only has a meaningful `fd`, so
//! [`decode`] reads that single word. [`decode_header`] reads the full
//! four-word header for callers that want the size and flag bits.
//!
//! Nothing here is cached: each call is a fresh read, because the target may
//! have changed since the last one.

use tracing::trace;

use crate::abi::AbiProfile;
use crate::error::{HeapError, HeapResult};
use crate::memory::{decode_word, read_pointer, MemoryBackend};
use crate::types::Address;

/// Previous chunk is in use (`P`).
pub const PREV_INUSE: u64 = 0x1;
/// Chunk was obtained with `mmap` (`M`).
pub const IS_MMAPPED: u64 = 0x2;
/// Chunk belongs to a non-main arena (`A`).
pub const NON_MAIN_ARENA: u64 = 0x4;
/// All flag bits stored in the low bits of `size`.
pub const SIZE_BITS: u64 = PREV_INUSE | IS_MMAPPED | NON_MAIN_ARENA;

/// A free chunk as seen from a singly-linked bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk
{
    /// Allocator-level base of the chunk (`prev_size` field)
    pub address: Address,
    /// Next chunk in the bin, or null at the end of the chain
    pub forward_pointer: Address,
}

impl Chunk
{
    /// The pointer `malloc` handed out for this chunk
    pub fn user_address(&self, abi: &AbiProfile) -> Address
    {
        abi.chunk_to_user(self.address)
    }

    /// Whether this chunk terminates its chain
    pub fn is_last(&self) -> bool
    {
        self.forward_pointer.is_null()
    }
}

/// Decode the fast-bin link of the chunk at `address`
///
/// Reads exactly one pointer-sized word, the `fd` slot following the `size`
/// field, as a little-endian integer. A zero `fd` is a normal chain end.
///
/// ## Errors
///
/// `Unreadable(address)` (the chunk's address, not the slot's) if the word
/// cannot be read in full.
pub fn decode<B: MemoryBackend + ?Sized>(backend: &B, address: Address, abi: &AbiProfile) -> HeapResult<Chunk>
{
    let slot = address + abi.forward_pointer_offset();
    let forward_pointer = read_pointer(backend, slot, abi.pointer_width()).map_err(|err| {
        trace!(%address, %slot, "Chunk link unreadable: {err}");
        HeapError::Unreadable(address)
    })?;
    Ok(Chunk {
        address,
        forward_pointer,
    })
}

/// Full `malloc_chunk` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader
{
    pub address: Address,
    pub prev_size: u64,
    /// Raw `size` field, flag bits included
    pub size_field: u64,
    pub forward_pointer: Address,
    pub back_pointer: Address,
}

impl ChunkHeader
{
    /// Chunk size with the flag bits masked off
    pub fn size(&self) -> u64
    {
        self.size_field & !SIZE_BITS
    }

    pub fn prev_inuse(&self) -> bool
    {
        self.size_field & PREV_INUSE != 0
    }

    pub fn is_mmapped(&self) -> bool
    {
        self.size_field & IS_MMAPPED != 0
    }

    pub fn non_main_arena(&self) -> bool
    {
        self.size_field & NON_MAIN_ARENA != 0
    }

    /// The link view of this header
    pub fn as_chunk(&self) -> Chunk
    {
        Chunk {
            address: self.address,
            forward_pointer: self.forward_pointer,
        }
    }
}

/// Decode the four header words of the chunk at `address`
///
/// ## Errors
///
/// `Unreadable(address)` if any of the four words cannot be read.
pub fn decode_header<B: MemoryBackend + ?Sized>(
    backend: &B,
    address: Address,
    abi: &AbiProfile,
) -> HeapResult<ChunkHeader>
{
    let width = usize::from(abi.pointer_width());
    let bytes = backend
        .read_bytes(address, 4 * width)
        .map_err(|_| HeapError::Unreadable(address))?;
    if bytes.len() != 4 * width {
        return Err(HeapError::Unreadable(address));
    }

    let mut words = bytes.chunks_exact(width).map(decode_word);
    let mut next = || words.next().unwrap_or_default();
    Ok(ChunkHeader {
        address,
        prev_size: next(),
        size_field: next(),
        forward_pointer: Address::new(next()),
        back_pointer: Address::new(next()),
    })
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::memory::MemoryImage;
    use crate::types::Architecture;

    fn header_bytes(width: usize, words: [u64; 4]) -> Vec<u8>
    {
        words
            .iter()
            .flat_map(|word| word.to_le_bytes()[..width].to_vec())
            .collect()
    }

    #[test]
    fn test_decode_reads_fd_after_size()
    {
        let image = MemoryImage::new(Architecture::X86_64)
            .with_segment(0x1000, header_bytes(8, [0, 0x21, 0x2000, 0xdead]));
        let abi = AbiProfile::for_pointer_width(8).unwrap();

        let chunk = decode(&image, Address::new(0x1000), &abi).unwrap();
        assert_eq!(chunk.address, Address::new(0x1000));
        assert_eq!(chunk.forward_pointer, Address::new(0x2000));
        assert!(!chunk.is_last());
        assert_eq!(chunk.user_address(&abi), Address::new(0x1010));
    }

    #[test]
    fn test_decode_zero_fd_is_terminator()
    {
        let image =
            MemoryImage::new(Architecture::X86).with_segment(0x1000, header_bytes(4, [0, 0x11, 0, 0]));
        let abi = AbiProfile::for_pointer_width(4).unwrap();

        let chunk = decode(&image, Address::new(0x1000), &abi).unwrap();
        assert!(chunk.is_last());
    }

    #[test]
    fn test_decode_reports_chunk_address_on_fault()
    {
        // Header mapped, fd slot not.
        let image = MemoryImage::new(Architecture::X86_64).with_segment(0x1000, vec![0; 12]);
        let abi = AbiProfile::for_pointer_width(8).unwrap();

        assert!(matches!(
            decode(&image, Address::new(0x1000), &abi),
            Err(HeapError::Unreadable(addr)) if addr == Address::new(0x1000)
        ));
    }

    #[test]
    fn test_decode_header_flags()
    {
        let image = MemoryImage::new(Architecture::X86_64)
            .with_segment(0x1000, header_bytes(8, [0x40, 0x97, 0x2000, 0x3000]));
        let abi = AbiProfile::for_pointer_width(8).unwrap();

        let header = decode_header(&image, Address::new(0x1000), &abi).unwrap();
        assert_eq!(header.prev_size, 0x40);
        assert_eq!(header.size(), 0x90);
        assert!(header.prev_inuse());
        assert!(header.is_mmapped());
        assert!(header.non_main_arena());
        assert_eq!(header.forward_pointer, Address::new(0x2000));
        assert_eq!(header.back_pointer, Address::new(0x3000));
        assert_eq!(header.as_chunk(), decode(&image, Address::new(0x1000), &abi).unwrap());
    }

    #[test]
    fn test_decode_header_narrow()
    {
        let image = MemoryImage::new(Architecture::X86)
            .with_segment(0x1000, header_bytes(4, [0, 0x19, 0x1020, 0x1040]));
        let abi = AbiProfile::for_pointer_width(4).unwrap();

        let header = decode_header(&image, Address::new(0x1000), &abi).unwrap();
        assert_eq!(header.size(), 0x18);
        assert!(header.prev_inuse());
        assert!(!header.is_mmapped());
        assert_eq!(header.forward_pointer, Address::new(0x1020));
        assert_eq!(header.back_pointer, Address::new(0x1040));
    }
}
