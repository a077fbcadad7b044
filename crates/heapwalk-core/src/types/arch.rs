//! Target architecture.

use std::fmt;
use std::str::FromStr;

/// CPU architecture of the inspected target
///
/// The allocator's struct layouts depend only on the word size, so the
/// architecture matters to the engine through [`Architecture::pointer_width`].
///
/// ## Example
///
/// ```rust
/// use heapwalk_core::types::Architecture;
///
/// let arch: Architecture = "i386".parse().unwrap();
/// assert_eq!(arch, Architecture::X86);
/// assert_eq!(arch.pointer_width(), Some(4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// 64-bit ARM
    Arm64,
    /// 32-bit x86
    X86,
    /// 32-bit ARM
    Arm,
    /// Any other architecture (or unknown)
    ///
    /// The `&'static str` carries whatever name the backend reported.
    Unknown(&'static str),
}

impl Architecture
{
    /// Architecture of the machine running heapwalk
    ///
    /// Used as the default for live targets, which normally match the host.
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86")]
        {
            Architecture::X86
        }

        #[cfg(target_arch = "arm")]
        {
            Architecture::Arm
        }

        #[cfg(not(any(
            target_arch = "x86_64",
            target_arch = "aarch64",
            target_arch = "x86",
            target_arch = "arm"
        )))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Size of a pointer (and of `size_t`) in bytes
    ///
    /// Returns `None` for unknown architectures: guessing a width would make
    /// every derived offset wrong.
    #[must_use]
    pub const fn pointer_width(self) -> Option<u8>
    {
        match self {
            Architecture::X86_64 | Architecture::Arm64 => Some(8),
            Architecture::X86 | Architecture::Arm => Some(4),
            Architecture::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::X86 => write!(f, "x86"),
            Architecture::Arm => write!(f, "arm"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for Architecture
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            "x86" | "i386" | "i686" => Ok(Architecture::X86),
            "arm" | "armv7" | "armhf" => Ok(Architecture::Arm),
            _ => Err(format!(
                "Unknown architecture: {s}. Use 'x86_64', 'arm64', 'x86', or 'arm'"
            )),
        }
    }
}
