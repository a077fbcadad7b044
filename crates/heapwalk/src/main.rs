use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use heapwalk_core::abi::{AbiOverrides, AbiResolver, AllocatorVersion};
use heapwalk_core::arena::{ArenaRef, MAIN_ARENA_SYMBOL, THREAD_ARENA_SYMBOL};
use heapwalk_core::chunk::decode_header;
use heapwalk_core::inspect::Inspector;
use heapwalk_core::memory::{MemoryBackend, MemoryImage};
use heapwalk_core::types::{Address, Architecture};
use heapwalk_core::{HeapError, HeapResult};
use heapwalk_utils::{info, init_logging, init_logging_with_level, LogFormat, LogLevel};

mod render;

/// Inspect glibc malloc fast bins in a live process or a captured memory image.
#[derive(Parser, Debug)]
#[command(name = "heapwalk")]
#[command(version)]
#[command(about = "Inspect glibc malloc fast bins in a live process or a captured memory image", long_about = None)]
struct Cli
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

/// Where target memory comes from
#[derive(Args, Debug)]
struct TargetArgs
{
    /// PID of a running process to inspect (Linux only)
    #[arg(long, conflicts_with = "image", required_unless_present = "image")]
    pid: Option<u32>,
    /// Raw memory dump to inspect instead of a live process
    #[arg(long, requires = "base")]
    image: Option<PathBuf>,
    /// Address the dump was taken from (hex format: 0x1000 or decimal)
    #[arg(long, value_parser = parse_address)]
    base: Option<Address>,
    /// Architecture of the dump [default: x86_64]; live processes are detected
    #[arg(long, requires = "image")]
    arch: Option<Architecture>,
    /// Address of `main_arena` in the dump
    #[arg(long, requires = "image", value_parser = parse_address)]
    main_arena: Option<Address>,
    /// Address of the `thread_arena` variable in the dump
    #[arg(long, requires = "image", value_parser = parse_address)]
    thread_arena: Option<Address>,
}

/// Allocator layout overrides
#[derive(Args, Debug)]
struct AbiArgs
{
    /// glibc version of the target (e.g. 2.31)
    #[arg(long = "glibc")]
    allocator_version: Option<AllocatorVersion>,
    /// The target glibc was built with THREAD_STATS
    #[arg(long, default_value_t = false)]
    thread_stats: bool,
    /// Offset of fastbinsY inside the arena
    #[arg(long, value_parser = parse_number)]
    fastbin_offset: Option<u64>,
    /// Size of the smallest chunk
    #[arg(long, value_parser = parse_number)]
    min_chunk_size: Option<u64>,
}

impl From<&AbiArgs> for AbiOverrides
{
    fn from(args: &AbiArgs) -> Self
    {
        AbiOverrides {
            allocator_version: args.allocator_version,
            thread_stats: args.thread_stats,
            fastbin_table_offset: args.fastbin_offset,
            min_chunk_size: args.min_chunk_size,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Walk and print the fast bins of an arena
    Fastbins
    {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        abi: AbiArgs,
        /// Arena address (default: the thread's arena, else main_arena)
        #[arg(value_parser = parse_address)]
        arena: Option<Address>,
        /// Only show this bin
        bin: Option<usize>,
    },
    /// Decode the header of one chunk
    Chunk
    {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        abi: AbiArgs,
        /// Chunk address (hex format: 0x1000 or decimal)
        #[arg(value_parser = parse_address)]
        address: Address,
        /// Treat the address as a pointer returned by malloc
        #[arg(long, default_value_t = false)]
        user: bool,
    },
    /// Show the allocator layout resolved for the target
    Abi
    {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        abi: AbiArgs,
    },
}

fn main()
{
    let cli = Cli::parse();

    let logging = match cli.log_level {
        Some(level) => init_logging_with_level(level, LogFormat::from_env()),
        None => init_logging(),
    };
    if let Err(e) = logging {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> HeapResult<()>
{
    match cli.command {
        Commands::Fastbins {
            target,
            abi,
            arena,
            bin,
        } => {
            let backend = open_backend(&target)?;
            let resolver = AbiResolver::with_overrides(AbiOverrides::from(&abi));
            let inspector = Inspector::new(backend.as_ref(), &resolver);
            let profile = inspector.profile()?;

            let arena = match arena {
                Some(address) => ArenaRef::new(address),
                None => ArenaRef::current(backend.as_ref(), profile)?,
            };
            info!("Inspecting fast bins of {}", arena);

            let reports = inspector.list_bins(arena, bin)?;
            print!("{}", render::Fastbins { reports: &reports, abi: profile });
            Ok(())
        }
        Commands::Chunk {
            target,
            abi,
            address,
            user,
        } => {
            let backend = open_backend(&target)?;
            let resolver = AbiResolver::with_overrides(AbiOverrides::from(&abi));
            let profile = resolver.resolve(backend.as_ref())?;

            let address = if user { profile.user_to_chunk(address) } else { address };
            let header = decode_header(backend.as_ref(), address, profile)?;
            print!("{}", render::HeaderView { header: &header, abi: profile });
            Ok(())
        }
        Commands::Abi { target, abi } => {
            let backend = open_backend(&target)?;
            let resolver = AbiResolver::with_overrides(AbiOverrides::from(&abi));
            print!("{}", render::AbiSummary(resolver.resolve(backend.as_ref())?));
            Ok(())
        }
    }
}

fn open_backend(target: &TargetArgs) -> HeapResult<Box<dyn MemoryBackend>>
{
    if let Some(path) = &target.image {
        let base = target
            .base
            .ok_or_else(|| HeapError::InvalidArgument("--image requires --base".to_string()))?;
        info!("Loading memory image {} at {}", path.display(), base);
        let arch = target.arch.unwrap_or(Architecture::X86_64);
        let mut image = MemoryImage::from_dump_file(path, base, arch)?;
        if let Some(main_arena) = target.main_arena {
            image.add_symbol(MAIN_ARENA_SYMBOL, main_arena);
        }
        if let Some(thread_arena) = target.thread_arena {
            image.add_symbol(THREAD_ARENA_SYMBOL, thread_arena);
        }
        return Ok(Box::new(image));
    }

    match target.pid {
        Some(pid) => attach(pid),
        None => Err(HeapError::InvalidArgument(
            "either --pid or --image is required".to_string(),
        )),
    }
}

#[cfg(target_os = "linux")]
fn attach(pid: u32) -> HeapResult<Box<dyn MemoryBackend>>
{
    info!("Attaching to process {}", pid);
    Ok(Box::new(heapwalk_core::memory::procfs::ProcessMemory::attach(pid)?))
}

#[cfg(not(target_os = "linux"))]
fn attach(pid: u32) -> HeapResult<Box<dyn MemoryBackend>>
{
    Err(HeapError::InvalidArgument(format!(
        "cannot attach to process {pid}: live inspection is only supported on Linux"
    )))
}

/// Parse an address written in hex (`0x7f00`) or decimal
fn parse_address(s: &str) -> Result<Address, String>
{
    parse_number(s).map(Address::new)
}

fn parse_number(s: &str) -> Result<u64, String>
{
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

#[cfg(test)]
mod tests
{
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent()
    {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_number()
    {
        assert_eq!(parse_number("0x7f00").unwrap(), 0x7f00);
        assert_eq!(parse_number("0X10").unwrap(), 16);
        assert_eq!(parse_number("4096").unwrap(), 4096);
        assert!(parse_number("0xzz").is_err());
        assert!(parse_number("").is_err());
        assert_eq!(parse_address("0x1000").unwrap(), Address::new(0x1000));
    }

    #[test]
    fn test_fastbins_arguments()
    {
        let cli = Cli::try_parse_from([
            "heapwalk",
            "fastbins",
            "--image",
            "heap.bin",
            "--base",
            "0x7000",
            "--arch",
            "i386",
            "--glibc",
            "2.31",
            "0x7000",
            "3",
        ])
        .unwrap();

        let Commands::Fastbins { target, abi, arena, bin } = cli.command else {
            panic!("expected fastbins");
        };
        assert_eq!(target.base, Some(Address::new(0x7000)));
        assert_eq!(target.arch, Some(Architecture::X86));
        assert_eq!(arena, Some(Address::new(0x7000)));
        assert_eq!(bin, Some(3));
        let overrides = AbiOverrides::from(&abi);
        assert_eq!(overrides.allocator_version, Some(AllocatorVersion::new(2, 31)));
        assert!(!overrides.thread_stats);
    }

    #[test]
    fn test_target_is_required()
    {
        assert!(Cli::try_parse_from(["heapwalk", "abi"]).is_err());
        assert!(Cli::try_parse_from(["heapwalk", "abi", "--image", "heap.bin"]).is_err());
        assert!(Cli::try_parse_from(["heapwalk", "abi", "--pid", "1", "--image", "x", "--base", "0"]).is_err());
    }

    #[test]
    fn test_image_only_flags_rejected_for_live_targets()
    {
        for flag in ["--arch", "--main-arena", "--thread-arena"] {
            let value = if flag == "--arch" { "i386" } else { "0x7000" };
            assert!(
                Cli::try_parse_from(["heapwalk", "fastbins", "--pid", "1", flag, value]).is_err(),
                "{flag} accepted without --image"
            );
        }

        let cli = Cli::try_parse_from([
            "heapwalk",
            "fastbins",
            "--image",
            "heap.bin",
            "--base",
            "0x7000",
            "--thread-arena",
            "0x9000",
        ])
        .unwrap();
        let Commands::Fastbins { target, .. } = cli.command else {
            panic!("expected fastbins");
        };
        assert_eq!(target.arch, None);
        assert_eq!(target.thread_arena, Some(Address::new(0x9000)));
    }
}
