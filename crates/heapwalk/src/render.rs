//! Plain-text rendering of inspection results.

use std::fmt;

use heapwalk_core::abi::AbiProfile;
use heapwalk_core::chunk::ChunkHeader;
use heapwalk_core::inspect::BinReport;
use heapwalk_core::walker::Termination;

/// Fast bin reports in the classic `fastbins` layout
///
/// ```text
/// fastbins
/// [ fb 0 ] 0x7008  -> [ 0x0 ]
/// [ fb 2 ] 0x7018  -> [ 0x1000 ] (48)
///                              [ 0x2000 ] (48)
/// ```
pub struct Fastbins<'a>
{
    pub reports: &'a [BinReport],
    pub abi: &'a AbiProfile,
}

impl Fastbins<'_>
{
    /// Column where chain continuation lines put their opening bracket.
    fn pad_width(&self) -> usize
    {
        if self.abi.pointer_width() == 4 { 25 } else { 29 }
    }

    fn bin(&self, f: &mut fmt::Formatter<'_>, report: &BinReport) -> fmt::Result
    {
        write!(f, "[ fb {} ] {}{:>5}", report.bin_index, report.slot_address, "-> ")?;

        let Some(head) = report.head_address else {
            return writeln!(f, "[ ?? ] (slot unreadable)");
        };
        write!(f, "[ {head} ]")?;
        if head.is_null() {
            return writeln!(f);
        }
        write!(f, " ({})", report.size_class)?;

        // The head was printed above; each later line is the previous chunk's fd.
        let pad = self.pad_width();
        for record in report.chunks.iter().skip(1) {
            write!(f, "\n{:>pad$} {} ] ({})", "[", record.address, record.size_class)?;
        }

        match report.termination {
            Termination::Cycle(address) => {
                write!(f, "\n{:>pad$} {address} ] ({}) <- cycle", "[", report.size_class)?;
            }
            Termination::Fault(_) if report.chunks.is_empty() => write!(f, " <- unreadable")?,
            Termination::Fault(address) => write!(f, "\n{:>pad$} {address} ] <- unreadable", "[")?,
            Termination::Empty | Termination::CleanEnd => {}
        }
        writeln!(f)
    }
}

impl fmt::Display for Fastbins<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        writeln!(f, "fastbins")?;
        for report in self.reports {
            self.bin(f, report)?;
        }
        Ok(())
    }
}

/// The resolved ABI profile, one constant per line
pub struct AbiSummary<'a>(pub &'a AbiProfile);

impl fmt::Display for AbiSummary<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let abi = self.0;
        writeln!(f, "pointer width:        {}", abi.pointer_width())?;
        writeln!(f, "min chunk size:       {}", abi.min_chunk_size())?;
        writeln!(f, "malloc alignment:     {}", abi.malloc_alignment())?;
        writeln!(f, "bin spacing:          {}", abi.bin_spacing())?;
        writeln!(f, "fast bins:            {}", abi.fastbin_count())?;
        writeln!(f, "fastbinsY offset:     {:#x}", abi.fastbin_table_offset())?;
        match abi.allocator_version() {
            Some(version) => writeln!(f, "allocator version:    {version}"),
            None => writeln!(f, "allocator version:    unspecified"),
        }
    }
}

/// One decoded chunk header
pub struct HeaderView<'a>
{
    pub header: &'a ChunkHeader,
    pub abi: &'a AbiProfile,
}

impl fmt::Display for HeaderView<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let header = self.header;
        let flags: Vec<&str> = [
            (header.prev_inuse(), "PREV_INUSE"),
            (header.is_mmapped(), "IS_MMAPPED"),
            (header.non_main_arena(), "NON_MAIN_ARENA"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect();

        writeln!(f, "chunk {} (user {})", header.address, self.abi.chunk_to_user(header.address))?;
        writeln!(f, "  prev_size: {:#x}", header.prev_size)?;
        writeln!(f, "  size:      {:#x} [{}]", header.size(), flags.join("|"))?;
        writeln!(f, "  fd:        {}", header.forward_pointer)?;
        writeln!(f, "  bk:        {}", header.back_pointer)
    }
}

#[cfg(test)]
mod tests
{
    use heapwalk_core::inspect::{ChunkList, ChunkRecord};
    use heapwalk_core::types::Address;

    use super::*;

    fn report(index: usize, head: Option<u64>, chain: &[(u64, u64)], termination: Termination) -> BinReport
    {
        BinReport {
            bin_index: index,
            slot_address: Address::new(0x7008 + 8 * index as u64),
            head_address: head.map(Address::new),
            size_class: 48,
            termination,
            chunks: chain
                .iter()
                .map(|&(address, fd)| ChunkRecord {
                    address: Address::new(address),
                    forward_pointer: Address::new(fd),
                    size_class: 48,
                })
                .collect::<ChunkList>(),
        }
    }

    #[test]
    fn test_empty_and_clean_bins()
    {
        let abi = AbiProfile::for_pointer_width(8).unwrap();
        let reports = [
            report(0, Some(0), &[], Termination::Empty),
            report(2, Some(0x1000), &[(0x1000, 0x2000), (0x2000, 0)], Termination::CleanEnd),
        ];
        let text = Fastbins { reports: &reports, abi: &abi }.to_string();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "fastbins");
        assert_eq!(lines[1], "[ fb 0 ] 0x7008  -> [ 0x0 ]");
        assert_eq!(lines[2], "[ fb 2 ] 0x7018  -> [ 0x1000 ] (48)");
        assert_eq!(lines[3], format!("{:>29} 0x2000 ] (48)", "["));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_cycle_and_fault_are_marked()
    {
        let abi = AbiProfile::for_pointer_width(8).unwrap();
        let reports = [
            report(
                1,
                Some(0x1000),
                &[(0x1000, 0x2000), (0x2000, 0x1000)],
                Termination::Cycle(Address::new(0x1000)),
            ),
            report(3, Some(0x4000), &[(0x4000, 0x5000)], Termination::Fault(Address::new(0x5000))),
            report(4, None, &[], Termination::Fault(Address::new(0x7028))),
            report(5, Some(0x6000), &[], Termination::Fault(Address::new(0x6000))),
        ];
        let text = Fastbins { reports: &reports, abi: &abi }.to_string();

        assert!(text.contains("0x1000 ] (48) <- cycle"));
        assert!(text.contains("0x5000 ] <- unreadable"));
        assert!(text.contains("[ fb 4 ] 0x7028  -> [ ?? ] (slot unreadable)"));
        assert!(text.contains("[ fb 5 ] 0x7030  -> [ 0x6000 ] (48) <- unreadable"));
    }

    #[test]
    fn test_abi_and_chunk_rendering()
    {
        let abi = AbiProfile::for_pointer_width(8).unwrap();
        let summary = AbiSummary(&abi).to_string();
        assert!(summary.contains("fastbinsY offset:     0x8"));
        assert!(summary.contains("allocator version:    unspecified"));

        let header = ChunkHeader {
            address: Address::new(0x1000),
            prev_size: 0,
            size_field: 0x31,
            forward_pointer: Address::new(0x2000),
            back_pointer: Address::ZERO,
        };
        let text = HeaderView { header: &header, abi: &abi }.to_string();
        assert!(text.starts_with("chunk 0x1000 (user 0x1010)"));
        assert!(text.contains("size:      0x30 [PREV_INUSE]"));
    }
}
