//! # Live process backend (Linux)
//!
//! Reads a running process through procfs:
//!
//! - `/proc/<pid>/mem` for memory (positioned reads, no ptrace stop)
//! - `/proc/<pid>/maps` for the mapping list
//! - `/proc/<pid>/exe` for the architecture (ELF header)
//!
//! Symbols are resolved from the ELF symbol tables of the mapped files and
//! relocated by each file's load bias. `main_arena` is a local symbol of
//! glibc, so it is only found when the mapped libc still carries `.symtab`.
//! Thread-local symbols such as `thread_arena` are never resolved: their
//! symbol value is an offset into the TLS block, not an address.
//!
//! Reading another process's memory requires ptrace access to it
//! (same user with `kernel.yama.ptrace_scope = 0`, or `CAP_SYS_PTRACE`).
//! The target is not stopped; see the crate docs on torn reads.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use object::{Object, ObjectSegment, ObjectSymbol, SymbolKind};
use tracing::{debug, trace, warn};

use super::MemoryBackend;
use crate::error::{HeapError, HeapResult};
use crate::types::{Address, Architecture, MemoryRegion};

const PAGE_MASK: u64 = !0xfff;

/// Memory backend for a live Linux process
pub struct ProcessMemory
{
    pid: u32,
    mem: File,
    architecture: Architecture,
    regions: Vec<MemoryRegion>,
}

impl ProcessMemory
{
    /// Open the procfs files of `pid`
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: no process with this PID
    /// - `Io`: permission denied or another procfs failure
    pub fn attach(pid: u32) -> HeapResult<Self>
    {
        let proc_dir = PathBuf::from(format!("/proc/{pid}"));
        let mem = File::open(proc_dir.join("mem")).map_err(|err| match err.kind() {
            ErrorKind::NotFound => HeapError::InvalidArgument(format!("no process with PID {pid}")),
            _ => HeapError::Io(err),
        })?;
        let regions = read_maps(&proc_dir)?;
        let architecture = detect_architecture(&proc_dir.join("exe"));
        debug!(pid, %architecture, regions = regions.len(), "Attached to process memory");

        Ok(Self {
            pid,
            mem,
            architecture,
            regions,
        })
    }

    /// PID of the target
    pub fn pid(&self) -> u32
    {
        self.pid
    }

    /// Mappings as of the last refresh
    pub fn regions(&self) -> &[MemoryRegion]
    {
        &self.regions
    }

    /// Search one mapped ELF file for `name` and relocate it
    fn lookup_in_file(&self, path: &str, name: &str) -> Option<Address>
    {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) => {
                trace!(path, "Skipping unreadable mapped file: {err}");
                return None;
            }
        };
        let file = object::File::parse(&*data).ok()?;
        let symbol = file
            .symbols()
            .chain(file.dynamic_symbols())
            .find(|symbol| {
                symbol.kind() != SymbolKind::Tls && symbol.address() != 0 && symbol.name().is_ok_and(|n| n == name)
            })?;

        let mapped_base = self
            .regions
            .iter()
            .filter(|region| region.name.as_deref() == Some(path))
            .map(|region| region.start.value().wrapping_sub(region.file_offset))
            .min()?;
        let link_base = file.segments().map(|segment| segment.address()).min().unwrap_or(0) & PAGE_MASK;
        let bias = mapped_base.wrapping_sub(link_base);

        let address = Address::new(symbol.address().wrapping_add(bias));
        debug!(path, name, %address, "Resolved symbol");
        Some(address)
    }
}

impl MemoryBackend for ProcessMemory
{
    fn read_bytes(&self, address: Address, len: usize) -> HeapResult<Vec<u8>>
    {
        let mut buf = vec![0u8; len];
        self.mem.read_exact_at(&mut buf, address.value()).map_err(|err| {
            trace!(pid = self.pid, %address, len, "Read failed: {err}");
            HeapError::Unreadable(address)
        })?;
        Ok(buf)
    }

    fn read_symbol(&self, name: &str) -> HeapResult<Address>
    {
        let mut seen = HashSet::new();
        let mut paths: Vec<&str> = self
            .regions
            .iter()
            .filter_map(|region| region.name.as_deref())
            .filter(|path| path.starts_with('/') && seen.insert(*path))
            .collect();
        // libc first: that is where the allocator lives.
        paths.sort_by_key(|path| !path.contains("libc"));

        paths
            .into_iter()
            .find_map(|path| self.lookup_in_file(path, name))
            .ok_or_else(|| HeapError::SymbolNotFound(name.to_string()))
    }

    fn architecture(&self) -> Architecture
    {
        self.architecture
    }
}

fn read_maps(proc_dir: &Path) -> HeapResult<Vec<MemoryRegion>>
{
    let maps = fs::read_to_string(proc_dir.join("maps"))?;
    Ok(maps.lines().filter_map(MemoryRegion::parse_maps_line).collect())
}

/// Architecture from the ELF header of the target executable
///
/// Falls back to `Unknown`, which the ABI resolver turns into a
/// configuration error rather than a guessed width.
fn detect_architecture(exe: &Path) -> Architecture
{
    let data = match fs::read(exe) {
        Ok(data) => data,
        Err(err) => {
            warn!(path = %exe.display(), "Cannot read target executable: {err}");
            return Architecture::Unknown("unreadable");
        }
    };
    match object::File::parse(&*data) {
        Ok(file) => match file.architecture() {
            object::Architecture::X86_64 => Architecture::X86_64,
            object::Architecture::Aarch64 => Architecture::Arm64,
            object::Architecture::I386 => Architecture::X86,
            object::Architecture::Arm => Architecture::Arm,
            _ => Architecture::Unknown("unsupported"),
        },
        Err(err) => {
            warn!(path = %exe.display(), "Cannot parse target executable: {err}");
            Architecture::Unknown("unrecognized")
        }
    }
}
