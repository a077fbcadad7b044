//! Mapped memory regions of a target.

use super::Address;

/// Information about one mapping in the target's address space
///
/// On Linux these come from `/proc/<pid>/maps`; captured images describe
/// their segments the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion
{
    /// Start address of the region (inclusive)
    pub start: Address,

    /// End address of the region (exclusive)
    pub end: Address,

    /// Permission string, e.g. `"rw-p"`
    pub permissions: String,

    /// Offset of the mapping within its backing file
    pub file_offset: u64,

    /// Backing path or pseudo-name (`"[heap]"`, `"/usr/lib/libc.so.6"`)
    pub name: Option<String>,
}

impl MemoryRegion
{
    /// Create a new memory region
    ///
    /// Does not validate that `end > start`. If `end <= start`, `size()`
    /// returns 0.
    pub fn new(start: Address, end: Address, permissions: String, name: Option<String>) -> Self
    {
        Self {
            start,
            end,
            permissions,
            file_offset: 0,
            name,
        }
    }

    /// Parse one line of `/proc/<pid>/maps`
    ///
    /// Format: `start-end perms offset dev inode [path]`. Returns `None` for
    /// lines that do not follow it.
    ///
    /// ```rust
    /// use heapwalk_core::types::{Address, MemoryRegion};
    ///
    /// let line = "7f0000000000-7f0000021000 rw-p 00000000 00:00 0    [heap]";
    /// let region = MemoryRegion::parse_maps_line(line).unwrap();
    /// assert_eq!(region.start, Address::from(0x7f00_0000_0000));
    /// assert_eq!(region.name.as_deref(), Some("[heap]"));
    /// ```
    pub fn parse_maps_line(line: &str) -> Option<Self>
    {
        let mut fields = line.split_whitespace();
        let range = fields.next()?;
        let permissions = fields.next()?.to_string();
        let file_offset = u64::from_str_radix(fields.next()?, 16).ok()?;
        let _device = fields.next()?;
        let _inode = fields.next()?;
        let name = fields.collect::<Vec<_>>().join(" ");

        let (start, end) = range.split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;

        Some(Self {
            start: Address::new(start),
            end: Address::new(end),
            permissions,
            file_offset,
            name: if name.is_empty() { None } else { Some(name) },
        })
    }

    /// Size of the region in bytes
    pub fn size(&self) -> u64
    {
        self.end.value().saturating_sub(self.start.value())
    }

    /// Whether the permission string contains `'r'`
    pub fn is_readable(&self) -> bool
    {
        self.permissions.contains('r')
    }

    /// Whether an address lies within `[start, end)`
    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.start && address < self.end
    }
}
