//! # Memory Backends
//!
//! The engine reads the target exclusively through [`MemoryBackend`]. A
//! backend owns whatever connection to the target it needs; the engine never
//! caches what it reads, because the target may change between calls.
//!
//! ## Implementations
//!
//! - [`MemoryImage`]: a captured or synthetic image made of sparse segments
//! - [`ProcessMemory`] (Linux): a live process through `/proc/<pid>/mem`

pub mod image;
#[cfg(target_os = "linux")]
pub mod procfs;

pub use image::MemoryImage;
#[cfg(target_os = "linux")]
pub use procfs::ProcessMemory;

use crate::error::{HeapError, HeapResult};
use crate::types::{Address, Architecture};

/// Read access to a target's memory
///
/// ## Contract
///
/// - `read_bytes` returns exactly `len` bytes or fails with
///   [`HeapError::Unreadable`]. Short reads are failures.
/// - `read_symbol` fails with [`HeapError::SymbolNotFound`] when the name is
///   unknown.
/// - `architecture` reports the target's architecture; the pointer width is
///   derived from it.
pub trait MemoryBackend
{
    /// Read `len` bytes starting at `address`
    fn read_bytes(&self, address: Address, len: usize) -> HeapResult<Vec<u8>>;

    /// Resolve a symbol to its runtime address
    fn read_symbol(&self, name: &str) -> HeapResult<Address>;

    /// Architecture of the target
    fn architecture(&self) -> Architecture;

    /// Pointer width of the target in bytes, if known
    fn pointer_width(&self) -> Option<u8>
    {
        self.architecture().pointer_width()
    }
}

impl<B: MemoryBackend + ?Sized> MemoryBackend for &B
{
    fn read_bytes(&self, address: Address, len: usize) -> HeapResult<Vec<u8>>
    {
        (**self).read_bytes(address, len)
    }

    fn read_symbol(&self, name: &str) -> HeapResult<Address>
    {
        (**self).read_symbol(name)
    }

    fn architecture(&self) -> Architecture
    {
        (**self).architecture()
    }
}

impl<B: MemoryBackend + ?Sized> MemoryBackend for Box<B>
{
    fn read_bytes(&self, address: Address, len: usize) -> HeapResult<Vec<u8>>
    {
        (**self).read_bytes(address, len)
    }

    fn read_symbol(&self, name: &str) -> HeapResult<Address>
    {
        (**self).read_symbol(name)
    }

    fn architecture(&self) -> Architecture
    {
        (**self).architecture()
    }
}

/// Interpret up to eight bytes as a little-endian unsigned integer.
pub fn decode_word(bytes: &[u8]) -> u64
{
    bytes
        .iter()
        .take(8)
        .rev()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))
}

/// Read one `width`-byte little-endian word at `address`.
///
/// A read that returns fewer than `width` bytes is reported as
/// [`HeapError::Unreadable`] even if the backend did not flag it.
pub fn read_word<B: MemoryBackend + ?Sized>(backend: &B, address: Address, width: u8) -> HeapResult<u64>
{
    let width = usize::from(width);
    let bytes = backend.read_bytes(address, width)?;
    if bytes.len() != width {
        return Err(HeapError::Unreadable(address));
    }
    Ok(decode_word(&bytes))
}

/// Read one pointer-sized word at `address` and treat it as an address.
pub fn read_pointer<B: MemoryBackend + ?Sized>(backend: &B, address: Address, width: u8) -> HeapResult<Address>
{
    read_word(backend, address, width).map(Address::new)
}

#[cfg(test)]
mod tests
{
    use super::*;

    struct ShortReads;

    impl MemoryBackend for ShortReads
    {
        fn read_bytes(&self, _address: Address, len: usize) -> HeapResult<Vec<u8>>
        {
            Ok(vec![0xff; len.saturating_sub(1)])
        }

        fn read_symbol(&self, name: &str) -> HeapResult<Address>
        {
            Err(HeapError::SymbolNotFound(name.to_string()))
        }

        fn architecture(&self) -> Architecture
        {
            Architecture::X86_64
        }
    }

    #[test]
    fn test_decode_word_little_endian()
    {
        assert_eq!(decode_word(&[0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
        assert_eq!(decode_word(&0xdead_beef_0000_1000u64.to_le_bytes()), 0xdead_beef_0000_1000);
        assert_eq!(decode_word(&[]), 0);
    }

    #[test]
    fn test_short_read_is_unreadable()
    {
        let err = read_word(&ShortReads, Address::new(0x40), 8).unwrap_err();
        assert!(matches!(err, HeapError::Unreadable(addr) if addr == Address::new(0x40)));
    }

    #[test]
    fn test_reference_forwards_to_backend()
    {
        let backend = &ShortReads;
        assert_eq!(MemoryBackend::pointer_width(&backend), Some(8));
        assert!(backend.read_symbol("main_arena").is_err());
    }
}
