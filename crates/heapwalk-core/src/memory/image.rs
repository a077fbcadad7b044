//! Captured memory images.
//!
//! A [`MemoryImage`] is a set of non-overlapping segments, each a byte buffer
//! mapped at a base address, plus a symbol table and the architecture the
//! bytes came from. It backs offline inspection of raw dumps and is the
//! synthetic target used throughout the test suite.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use tracing::debug;

use super::MemoryBackend;
use crate::error::{HeapError, HeapResult};
use crate::types::{Address, Architecture, MemoryRegion};

/// Sparse memory image with an explicit architecture
///
/// Reads must fall entirely inside one segment; anything else, including a
/// read that straddles two adjacent segments, is [`HeapError::Unreadable`].
///
/// ## Example
///
/// ```rust
/// use heapwalk_core::memory::{MemoryBackend, MemoryImage};
/// use heapwalk_core::types::{Address, Architecture};
///
/// let mut image = MemoryImage::new(Architecture::X86_64).with_segment(0x1000, vec![0; 0x40]);
/// image.write_word(Address::new(0x1010), 0x2000)?;
///
/// let bytes = image.read_bytes(Address::new(0x1010), 8)?;
/// assert_eq!(bytes, 0x2000u64.to_le_bytes());
/// assert!(image.read_bytes(Address::new(0x3000), 8).is_err());
/// # Ok::<(), heapwalk_core::error::HeapError>(())
/// ```
#[derive(Debug, Clone)]
pub struct MemoryImage
{
    architecture: Architecture,
    segments: BTreeMap<u64, Vec<u8>>,
    symbols: HashMap<String, Address>,
}

impl MemoryImage
{
    /// Create an empty image for the given architecture
    pub fn new(architecture: Architecture) -> Self
    {
        Self {
            architecture,
            segments: BTreeMap::new(),
            symbols: HashMap::new(),
        }
    }

    /// Load a raw dump file mapped at `base`
    ///
    /// The file is taken as one contiguous segment.
    ///
    /// ## Errors
    ///
    /// - `Io`: the file cannot be read
    /// - `InvalidArgument`: the file is empty
    pub fn from_dump_file(path: impl AsRef<Path>, base: Address, architecture: Architecture) -> HeapResult<Self>
    {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Err(HeapError::InvalidArgument(format!("{} is empty", path.display())));
        }
        debug!(path = %path.display(), %base, len = bytes.len(), "Loaded memory dump");
        Ok(Self::new(architecture).with_segment(base.value(), bytes))
    }

    /// Builder form of [`MemoryImage::add_segment`]
    #[must_use]
    pub fn with_segment(mut self, base: u64, bytes: Vec<u8>) -> Self
    {
        self.add_segment(base, bytes);
        self
    }

    /// Builder form of [`MemoryImage::add_symbol`]
    #[must_use]
    pub fn with_symbol(mut self, name: impl Into<String>, address: Address) -> Self
    {
        self.add_symbol(name, address);
        self
    }

    /// Map `bytes` at `base`, replacing any segment with the same base
    pub fn add_segment(&mut self, base: u64, bytes: Vec<u8>)
    {
        self.segments.insert(base, bytes);
    }

    /// Register a symbol
    pub fn add_symbol(&mut self, name: impl Into<String>, address: Address)
    {
        self.symbols.insert(name.into(), address);
    }

    /// Overwrite bytes inside an existing segment
    ///
    /// ## Errors
    ///
    /// `Unreadable` if the range is not fully mapped.
    pub fn write_bytes(&mut self, address: Address, data: &[u8]) -> HeapResult<()>
    {
        let (base, segment) = self
            .segments
            .range_mut(..=address.value())
            .next_back()
            .ok_or(HeapError::Unreadable(address))?;
        let start = usize::try_from(address.value() - *base).map_err(|_| HeapError::Unreadable(address))?;
        let end = start.checked_add(data.len()).ok_or(HeapError::Unreadable(address))?;
        let target = segment.get_mut(start..end).ok_or(HeapError::Unreadable(address))?;
        target.copy_from_slice(data);
        Ok(())
    }

    /// Store a pointer-sized little-endian word
    ///
    /// ## Errors
    ///
    /// - `Configuration`: the image's architecture has no known pointer width
    /// - `Unreadable`: the word is not fully mapped
    pub fn write_word(&mut self, address: Address, value: u64) -> HeapResult<()>
    {
        let width = self
            .architecture
            .pointer_width()
            .ok_or_else(|| HeapError::Configuration(format!("no pointer width for {}", self.architecture)))?;
        let bytes = value.to_le_bytes();
        self.write_bytes(address, &bytes[..usize::from(width)])
    }

    /// Describe the mapped segments as memory regions
    pub fn regions(&self) -> Vec<MemoryRegion>
    {
        self.segments
            .iter()
            .map(|(&base, bytes)| {
                let start = Address::new(base);
                MemoryRegion::new(start, start + bytes.len() as u64, "rw-p".to_string(), None)
            })
            .collect()
    }
}

impl MemoryBackend for MemoryImage
{
    fn read_bytes(&self, address: Address, len: usize) -> HeapResult<Vec<u8>>
    {
        let (base, segment) = self
            .segments
            .range(..=address.value())
            .next_back()
            .ok_or(HeapError::Unreadable(address))?;
        let start = usize::try_from(address.value() - base).map_err(|_| HeapError::Unreadable(address))?;
        let end = start.checked_add(len).ok_or(HeapError::Unreadable(address))?;
        segment
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(HeapError::Unreadable(address))
    }

    fn read_symbol(&self, name: &str) -> HeapResult<Address>
    {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| HeapError::SymbolNotFound(name.to_string()))
    }

    fn architecture(&self) -> Architecture
    {
        self.architecture
    }
}

#[cfg(test)]
mod tests
{
    use std::io::Write;

    use super::*;

    #[test]
    fn test_read_inside_segment()
    {
        let image = MemoryImage::new(Architecture::X86).with_segment(0x1000, (0u8..0x20).collect());
        assert_eq!(image.read_bytes(Address::new(0x1004), 4).unwrap(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_read_past_segment_end_fails()
    {
        let image = MemoryImage::new(Architecture::X86).with_segment(0x1000, vec![0; 0x10]);
        assert!(image.read_bytes(Address::new(0x100c), 8).is_err());
        assert!(image.read_bytes(Address::new(0x0fff), 1).is_err());
    }

    #[test]
    fn test_read_across_adjacent_segments_fails()
    {
        let image = MemoryImage::new(Architecture::X86_64)
            .with_segment(0x1000, vec![0; 0x10])
            .with_segment(0x1010, vec![0; 0x10]);
        assert!(image.read_bytes(Address::new(0x100c), 8).is_err());
        assert!(image.read_bytes(Address::new(0x1010), 8).is_ok());
    }

    #[test]
    fn test_write_word_uses_architecture_width()
    {
        let mut image = MemoryImage::new(Architecture::X86).with_segment(0x1000, vec![0xaa; 0x10]);
        image.write_word(Address::new(0x1000), 0x1122_3344).unwrap();
        assert_eq!(
            image.read_bytes(Address::new(0x1000), 8).unwrap(),
            vec![0x44, 0x33, 0x22, 0x11, 0xaa, 0xaa, 0xaa, 0xaa]
        );
    }

    #[test]
    fn test_write_outside_segment_fails()
    {
        let mut image = MemoryImage::new(Architecture::X86_64).with_segment(0x1000, vec![0; 0x10]);
        assert!(matches!(
            image.write_word(Address::new(0x100c), 1),
            Err(HeapError::Unreadable(_))
        ));
    }

    #[test]
    fn test_symbols()
    {
        let image = MemoryImage::new(Architecture::X86_64).with_symbol("main_arena", Address::new(0x7000));
        assert_eq!(image.read_symbol("main_arena").unwrap(), Address::new(0x7000));
        assert!(matches!(
            image.read_symbol("thread_arena"),
            Err(HeapError::SymbolNotFound(name)) if name == "thread_arena"
        ));
    }

    #[test]
    fn test_from_dump_file()
    {
        let path = std::env::temp_dir().join(format!("heapwalk-dump-{}.bin", std::process::id()));
        {
            let mut file = fs::File::create(&path).unwrap();
            file.write_all(&[1, 2, 3, 4]).unwrap();
        }
        let image = MemoryImage::from_dump_file(&path, Address::new(0x4000), Architecture::Arm).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(image.read_bytes(Address::new(0x4002), 2).unwrap(), vec![3, 4]);
        assert_eq!(image.regions().len(), 1);
        assert_eq!(image.regions()[0].size(), 4);
    }
}
