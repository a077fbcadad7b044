//! # Allocator ABI
//!
//! Every offset the engine computes comes from one [`AbiProfile`]: pointer
//! width, minimum chunk size, malloc alignment, number of fast bins, and the
//! offset of the fast-bin table inside `struct malloc_state`.
//!
//! Profiles are built once per session by an [`AbiResolver`], which asks the
//! memory backend for the target architecture the first time it is used and
//! hands out the same profile afterwards.
//!
//! ## Layout of the fast-bin table
//!
//! `malloc_state` starts with a lock and a flags word (two ints), so
//! `fastbinsY` sits 8 bytes into the arena on both 32- and 64-bit targets.
//! That is the default. Two glibc build variants move it:
//!
//! - glibc 2.27 and later add `int have_fastchunks` after `flags`; the table
//!   then starts at the next pointer-aligned offset (12 on 32-bit, 16 on 64-bit).
//! - glibc 2.19 and earlier built with `THREAD_STATS` keep three `long` lock
//!   statistics words before the table.
//!
//! An explicit offset from [`AbiOverrides`] always wins.
//!
//! ## Size classes
//!
//! `fastbin_index` is `(size >> 4) - 2` on 64-bit and `(size >> 3) - 2` on
//! 32-bit, so neighbouring bins are always `2 * pointer_width` apart. That
//! matches `malloc_alignment` on the common layouts. On i386 with glibc 2.26+
//! the alignment grows to 16 but the bin spacing does not; only the minimum
//! chunk size is rounded up to 16.

use std::fmt;
use std::str::FromStr;

use once_cell::unsync::OnceCell;
use tracing::debug;

use crate::error::{HeapError, HeapResult};
use crate::memory::MemoryBackend;
use crate::types::Address;

/// Offset of `fastbinsY` in `malloc_state` when nothing else is known.
pub const DEFAULT_FASTBIN_TABLE_OFFSET: u64 = 8;

/// Request size limit for fast bins, in units of `SIZE_SZ / 4` (glibc `MAX_FAST_SIZE`).
const MAX_FAST_SIZE_UNITS: u64 = 80;

/// glibc release, e.g. `2.31`
///
/// ```rust
/// use heapwalk_core::abi::AllocatorVersion;
///
/// let version: AllocatorVersion = "2.27".parse().unwrap();
/// assert!(version >= AllocatorVersion::new(2, 26));
/// assert_eq!(version.to_string(), "2.27");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocatorVersion
{
    /// Major version (always 2 for glibc so far)
    pub major: u16,
    /// Minor version
    pub minor: u16,
}

impl AllocatorVersion
{
    /// First release with `have_fastchunks` in `malloc_state`.
    pub const HAVE_FASTCHUNKS: Self = Self::new(2, 27);
    /// First release with 16-byte `MALLOC_ALIGNMENT` on i386.
    pub const I386_ALIGN_16: Self = Self::new(2, 26);
    /// Last release whose `malloc_state` could carry `THREAD_STATS` fields.
    pub const LAST_THREAD_STATS: Self = Self::new(2, 19);

    pub const fn new(major: u16, minor: u16) -> Self
    {
        Self { major, minor }
    }
}

impl fmt::Display for AllocatorVersion
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for AllocatorVersion
{
    type Err = String;

    /// Accepts `2.31`, `2.31.9000` and `glibc-2.31`.
    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let trimmed = s.trim().trim_start_matches("glibc-").trim_start_matches("glibc");
        let mut parts = trimmed.split('.');
        let major = parts.next().and_then(|p| p.parse().ok());
        let minor = parts.next().and_then(|p| p.parse().ok());
        match (major, minor) {
            (Some(major), Some(minor)) => Ok(Self::new(major, minor)),
            _ => Err(format!("Invalid allocator version: {s}. Use e.g. '2.31'")),
        }
    }
}

/// Session configuration that adjusts profile resolution
///
/// All fields default to "not specified", which yields the common layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbiOverrides
{
    /// glibc release of the target, if known
    pub allocator_version: Option<AllocatorVersion>,
    /// Target libc was built with `THREAD_STATS` (only meaningful up to 2.19)
    pub thread_stats: bool,
    /// Use this fast-bin table offset instead of deriving one
    pub fastbin_table_offset: Option<u64>,
    /// Use this minimum chunk size instead of the derived one
    pub min_chunk_size: Option<u64>,
}

/// Immutable allocator constants for one target
///
/// ## Example
///
/// ```rust
/// use heapwalk_core::abi::AbiProfile;
///
/// let abi = AbiProfile::for_pointer_width(8)?;
/// assert_eq!(abi.fastbin_count(), 10);
/// assert_eq!(abi.fastbin_table_offset(), 8);
/// assert_eq!(abi.size_class(2), abi.min_chunk_size() + abi.malloc_alignment() * 2);
/// # Ok::<(), heapwalk_core::error::HeapError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiProfile
{
    pointer_width: u8,
    min_chunk_size: u64,
    malloc_alignment: u64,
    bin_spacing: u64,
    fastbin_count: usize,
    allocator_version: Option<AllocatorVersion>,
    fastbin_table_offset: u64,
}

impl AbiProfile
{
    /// Profile for the common layout at the given pointer width
    ///
    /// ## Errors
    ///
    /// `Configuration` unless `pointer_width` is 4 or 8.
    pub fn for_pointer_width(pointer_width: u8) -> HeapResult<Self>
    {
        Self::build(pointer_width, &AbiOverrides::default())
    }

    /// Profile for the given pointer width adjusted by `overrides`
    ///
    /// ## Errors
    ///
    /// `Configuration` unless `pointer_width` is 4 or 8, or if an override
    /// would make chunk sizes meaningless (zero minimum chunk size).
    pub fn build(pointer_width: u8, overrides: &AbiOverrides) -> HeapResult<Self>
    {
        if pointer_width != 4 && pointer_width != 8 {
            return Err(HeapError::Configuration(format!(
                "unsupported pointer width {pointer_width} (expected 4 or 8)"
            )));
        }
        let word = u64::from(pointer_width);
        let version = overrides.allocator_version;

        let malloc_alignment = match version {
            Some(v) if pointer_width == 4 && v >= AllocatorVersion::I386_ALIGN_16 => 16,
            _ => 2 * word,
        };

        // MINSIZE is rounded up to the alignment.
        let min_chunk_size = overrides
            .min_chunk_size
            .unwrap_or_else(|| (2 * word).next_multiple_of(malloc_alignment));
        if min_chunk_size == 0 {
            return Err(HeapError::Configuration("minimum chunk size must be non-zero".to_string()));
        }

        let fastbin_table_offset = overrides
            .fastbin_table_offset
            .unwrap_or_else(|| derive_fastbin_table_offset(word, version, overrides.thread_stats));

        Ok(Self {
            pointer_width,
            min_chunk_size,
            malloc_alignment,
            bin_spacing: 2 * word,
            fastbin_count: fastbin_count(word, malloc_alignment),
            allocator_version: version,
            fastbin_table_offset,
        })
    }

    /// Pointer (and `size_t`) width in bytes: 4 or 8
    pub const fn pointer_width(&self) -> u8
    {
        self.pointer_width
    }

    /// Pointer width as a `u64`, for address arithmetic
    pub const fn word(&self) -> u64
    {
        self.pointer_width as u64
    }

    pub const fn min_chunk_size(&self) -> u64
    {
        self.min_chunk_size
    }

    pub const fn malloc_alignment(&self) -> u64
    {
        self.malloc_alignment
    }

    /// Size difference between neighbouring fast bins
    ///
    /// Equal to `malloc_alignment` except for i386 with 16-byte alignment.
    pub const fn bin_spacing(&self) -> u64
    {
        self.bin_spacing
    }

    /// Number of slots in `fastbinsY`
    pub const fn fastbin_count(&self) -> usize
    {
        self.fastbin_count
    }

    pub const fn allocator_version(&self) -> Option<AllocatorVersion>
    {
        self.allocator_version
    }

    /// Byte offset of `fastbinsY` from the arena base
    pub const fn fastbin_table_offset(&self) -> u64
    {
        self.fastbin_table_offset
    }

    /// Offset of the `size` field from the chunk base
    pub const fn size_field_offset(&self) -> u64
    {
        self.word()
    }

    /// Offset of the `fd` field: the word right after `size`
    pub const fn forward_pointer_offset(&self) -> u64
    {
        self.size_field_offset() + self.word()
    }

    /// Distance between a chunk pointer and its user-data pointer
    pub const fn user_data_offset(&self) -> u64
    {
        2 * self.word()
    }

    /// Chunk size served by fast bin `bin_index`
    ///
    /// Derived from the index alone; chunk headers are never consulted.
    pub const fn size_class(&self, bin_index: usize) -> u64
    {
        self.min_chunk_size + self.bin_spacing * bin_index as u64
    }

    /// Check `bin_index` against `[0, fastbin_count)`
    ///
    /// ## Errors
    ///
    /// `OutOfRange` when the index is past the table.
    pub fn check_bin_index(&self, bin_index: usize) -> HeapResult<()>
    {
        if bin_index < self.fastbin_count {
            Ok(())
        } else {
            Err(HeapError::OutOfRange {
                index: bin_index,
                count: self.fastbin_count,
            })
        }
    }

    /// `chunk2mem`: user-data pointer for a chunk
    pub fn chunk_to_user(&self, chunk: Address) -> Address
    {
        chunk + self.user_data_offset()
    }

    /// `mem2chunk`: chunk pointer for a user-data pointer
    pub fn user_to_chunk(&self, user: Address) -> Address
    {
        user - self.user_data_offset()
    }
}

/// glibc's `NFASTBINS`: `fastbin_index(request2size(MAX_FAST_SIZE)) + 1`.
fn fastbin_count(word: u64, alignment: u64) -> usize
{
    let max_fast = MAX_FAST_SIZE_UNITS * word / 4;
    let align_mask = alignment - 1;
    let largest = (max_fast + word + align_mask) & !align_mask;
    let shift = if word == 8 { 4 } else { 3 };
    ((largest >> shift) - 2 + 1) as usize
}

fn derive_fastbin_table_offset(word: u64, version: Option<AllocatorVersion>, thread_stats: bool) -> u64
{
    let Some(version) = version else {
        return DEFAULT_FASTBIN_TABLE_OFFSET;
    };

    let mut offset = DEFAULT_FASTBIN_TABLE_OFFSET;
    if thread_stats && version <= AllocatorVersion::LAST_THREAD_STATS {
        offset += 3 * word;
    }
    if version >= AllocatorVersion::HAVE_FASTCHUNKS {
        offset += 4;
    }
    offset.next_multiple_of(word)
}

/// Lazily resolves and memoizes the [`AbiProfile`] for one session
///
/// The first call to [`AbiResolver::resolve`] reads the architecture from the
/// backend; later calls return the stored profile without touching the
/// backend. Use one resolver per target.
///
/// ## Example
///
/// ```rust
/// use heapwalk_core::abi::AbiResolver;
/// use heapwalk_core::memory::MemoryImage;
/// use heapwalk_core::types::Architecture;
///
/// let image = MemoryImage::new(Architecture::X86);
/// let resolver = AbiResolver::new();
/// assert_eq!(resolver.resolve(&image)?.pointer_width(), 4);
/// # Ok::<(), heapwalk_core::error::HeapError>(())
/// ```
#[derive(Debug, Default)]
pub struct AbiResolver
{
    overrides: AbiOverrides,
    profile: OnceCell<AbiProfile>,
}

impl AbiResolver
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn with_overrides(overrides: AbiOverrides) -> Self
    {
        Self {
            overrides,
            profile: OnceCell::new(),
        }
    }

    pub fn overrides(&self) -> &AbiOverrides
    {
        &self.overrides
    }

    /// Return the session profile, resolving it on first use
    ///
    /// ## Errors
    ///
    /// `Configuration` if the backend cannot say how wide a pointer is. The
    /// failure is not memoized, but nothing else in the session can work
    /// until it succeeds.
    pub fn resolve<B: MemoryBackend + ?Sized>(&self, backend: &B) -> HeapResult<&AbiProfile>
    {
        self.profile.get_or_try_init(|| {
            let width = backend.pointer_width().ok_or_else(|| {
                HeapError::Configuration(format!("unknown pointer width for {}", backend.architecture()))
            })?;
            let profile = AbiProfile::build(width, &self.overrides)?;
            debug!(
                pointer_width = profile.pointer_width,
                min_chunk_size = profile.min_chunk_size,
                malloc_alignment = profile.malloc_alignment,
                fastbin_count = profile.fastbin_count,
                fastbin_table_offset = profile.fastbin_table_offset,
                "Resolved allocator ABI"
            );
            Ok(profile)
        })
    }

    /// The memoized profile, if one has been resolved
    pub fn get(&self) -> Option<&AbiProfile>
    {
        self.profile.get()
    }

    /// Forget the memoized profile
    pub fn reset(&mut self)
    {
        self.profile = OnceCell::new();
    }
}

#[cfg(test)]
mod tests
{
    use std::cell::Cell;

    use super::*;
    use crate::types::Architecture;

    struct CountingBackend
    {
        architecture: Architecture,
        calls: Cell<usize>,
    }

    impl MemoryBackend for CountingBackend
    {
        fn read_bytes(&self, address: Address, _len: usize) -> HeapResult<Vec<u8>>
        {
            Err(HeapError::Unreadable(address))
        }

        fn read_symbol(&self, name: &str) -> HeapResult<Address>
        {
            Err(HeapError::SymbolNotFound(name.to_string()))
        }

        fn architecture(&self) -> Architecture
        {
            self.calls.set(self.calls.get() + 1);
            self.architecture
        }
    }

    #[test]
    fn test_common_layouts()
    {
        let wide = AbiProfile::for_pointer_width(8).unwrap();
        assert_eq!(wide.min_chunk_size(), 16);
        assert_eq!(wide.malloc_alignment(), 16);
        assert_eq!(wide.fastbin_count(), 10);
        assert_eq!(wide.fastbin_table_offset(), 8);
        assert_eq!(wide.forward_pointer_offset(), 16);

        let narrow = AbiProfile::for_pointer_width(4).unwrap();
        assert_eq!(narrow.min_chunk_size(), 8);
        assert_eq!(narrow.malloc_alignment(), 8);
        assert_eq!(narrow.fastbin_count(), 10);
        assert_eq!(narrow.fastbin_table_offset(), 8);
        assert_eq!(narrow.forward_pointer_offset(), 8);
    }

    #[test]
    fn test_rejects_odd_pointer_width()
    {
        assert!(matches!(AbiProfile::for_pointer_width(2), Err(HeapError::Configuration(_))));
        assert!(matches!(AbiProfile::for_pointer_width(16), Err(HeapError::Configuration(_))));
    }

    #[test]
    fn test_fastbin_offset_by_version()
    {
        let with = |version: &str, thread_stats: bool| AbiOverrides {
            allocator_version: Some(version.parse().unwrap()),
            thread_stats,
            ..AbiOverrides::default()
        };

        assert_eq!(AbiProfile::build(8, &with("2.23", false)).unwrap().fastbin_table_offset(), 8);
        assert_eq!(AbiProfile::build(8, &with("2.27", false)).unwrap().fastbin_table_offset(), 16);
        assert_eq!(AbiProfile::build(4, &with("2.31", false)).unwrap().fastbin_table_offset(), 12);
        assert_eq!(AbiProfile::build(8, &with("2.19", true)).unwrap().fastbin_table_offset(), 32);
        assert_eq!(AbiProfile::build(4, &with("2.19", true)).unwrap().fastbin_table_offset(), 20);
        // THREAD_STATS disappeared after 2.19
        assert_eq!(AbiProfile::build(8, &with("2.23", true)).unwrap().fastbin_table_offset(), 8);
    }

    #[test]
    fn test_explicit_overrides_win()
    {
        let overrides = AbiOverrides {
            allocator_version: Some(AllocatorVersion::new(2, 31)),
            fastbin_table_offset: Some(0x20),
            min_chunk_size: Some(32),
            ..AbiOverrides::default()
        };
        let abi = AbiProfile::build(8, &overrides).unwrap();
        assert_eq!(abi.fastbin_table_offset(), 0x20);
        assert_eq!(abi.min_chunk_size(), 32);
        assert_eq!(abi.size_class(0), 32);
        assert_eq!(abi.size_class(9), 176);
    }

    #[test]
    fn test_i386_alignment_quirk()
    {
        let overrides = AbiOverrides {
            allocator_version: Some(AllocatorVersion::new(2, 26)),
            ..AbiOverrides::default()
        };
        let abi = AbiProfile::build(4, &overrides).unwrap();
        assert_eq!(abi.malloc_alignment(), 16);
        assert_eq!(abi.bin_spacing(), 8);
        assert_eq!(abi.min_chunk_size(), 16);
        assert_eq!(abi.fastbin_count(), 11);

        let classes: Vec<u64> = (0..abi.fastbin_count()).map(|i| abi.size_class(i)).collect();
        let expected: Vec<u64> = (0..11).map(|i| (i + 2) * 8).collect();
        assert_eq!(classes, expected);
    }

    #[test]
    fn test_bin_spacing_matches_alignment_on_common_layouts()
    {
        for width in [4, 8] {
            let abi = AbiProfile::for_pointer_width(width).unwrap();
            assert_eq!(abi.bin_spacing(), abi.malloc_alignment());
            assert_eq!(abi.min_chunk_size(), 2 * u64::from(width));
        }
    }

    #[test]
    fn test_bin_index_range()
    {
        let abi = AbiProfile::for_pointer_width(8).unwrap();
        assert!(abi.check_bin_index(0).is_ok());
        assert!(abi.check_bin_index(9).is_ok());
        assert!(matches!(
            abi.check_bin_index(10),
            Err(HeapError::OutOfRange { index: 10, count: 10 })
        ));
    }

    #[test]
    fn test_chunk_user_conversion()
    {
        let abi = AbiProfile::for_pointer_width(8).unwrap();
        assert_eq!(abi.chunk_to_user(Address::new(0x1000)), Address::new(0x1010));
        assert_eq!(abi.user_to_chunk(Address::new(0x1010)), Address::new(0x1000));

        let abi = AbiProfile::for_pointer_width(4).unwrap();
        assert_eq!(abi.chunk_to_user(Address::new(0x1000)), Address::new(0x1008));
    }

    #[test]
    fn test_version_parsing()
    {
        assert_eq!("2.31".parse::<AllocatorVersion>().unwrap(), AllocatorVersion::new(2, 31));
        assert_eq!("glibc-2.35".parse::<AllocatorVersion>().unwrap(), AllocatorVersion::new(2, 35));
        assert_eq!("2.33.9000".parse::<AllocatorVersion>().unwrap(), AllocatorVersion::new(2, 33));
        assert!("two".parse::<AllocatorVersion>().is_err());
        assert!("2".parse::<AllocatorVersion>().is_err());
    }

    #[test]
    fn test_resolver_memoizes()
    {
        let backend = CountingBackend {
            architecture: Architecture::X86_64,
            calls: Cell::new(0),
        };
        let resolver = AbiResolver::new();
        assert!(resolver.get().is_none());

        let first = *resolver.resolve(&backend).unwrap();
        let second = *resolver.resolve(&backend).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.calls.get(), 1);
    }

    #[test]
    fn test_resolver_reset()
    {
        let backend = CountingBackend {
            architecture: Architecture::Arm,
            calls: Cell::new(0),
        };
        let mut resolver = AbiResolver::new();
        resolver.resolve(&backend).unwrap();
        resolver.reset();
        assert!(resolver.get().is_none());
        assert_eq!(resolver.resolve(&backend).unwrap().pointer_width(), 4);
        assert_eq!(backend.calls.get(), 2);
    }

    #[test]
    fn test_unknown_architecture_is_configuration_error()
    {
        let backend = CountingBackend {
            architecture: Architecture::Unknown("riscv64"),
            calls: Cell::new(0),
        };
        let resolver = AbiResolver::new();
        let err = resolver.resolve(&backend).unwrap_err();
        assert!(matches!(err, HeapError::Configuration(_)));
        assert!(err.to_string().contains("riscv64"));
    }
}
