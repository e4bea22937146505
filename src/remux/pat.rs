//! PAT (Program Association Table) parsing and synthesis.
//!
//! The uplink PAT is parsed to learn the PMT PID of every program; for each
//! subscriber the engine synthesizes a reduced PAT announcing only the
//! subscribed program, packetized with the subscriber's private continuity
//! counter.

use super::packet::{SYNC_BYTE, TS_PACKET_SIZE};
use super::psi::{crc32_mpeg2, PsiSection};
use super::table_id;

/// A single PAT entry (program number and PMT PID).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    /// Program number (service id).
    pub program_number: u16,
    /// PID carrying this program's PMT.
    pub pmt_pid: u16,
}

/// Parsed PAT.
#[derive(Debug, Clone, Default)]
pub struct PatTable {
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Program entries, excluding the network entry.
    pub programs: Vec<PatEntry>,
}

impl PatTable {
    /// Parse a PAT from a validated PSI section.
    ///
    /// The network information entry (program number 0) is skipped; it does
    /// not reference a PMT.
    pub fn parse(section: &PsiSection) -> Result<Self, &'static str> {
        if section.header.table_id != table_id::PAT {
            return Err("not a PAT section");
        }
        if !section.header.current_next_indicator {
            return Err("PAT not current");
        }
        let data = section.data;
        if data.len() % 4 != 0 {
            return Err("invalid PAT body length");
        }

        let mut pat = PatTable {
            transport_stream_id: section.header.table_id_extension,
            version_number: section.header.version_number,
            programs: Vec::with_capacity(data.len() / 4),
        };
        for chunk in data.chunks_exact(4) {
            let program_number = ((chunk[0] as u16) << 8) | chunk[1] as u16;
            let pid = ((chunk[2] as u16 & 0x1F) << 8) | chunk[3] as u16;
            if program_number != 0 {
                pat.programs.push(PatEntry {
                    program_number,
                    pmt_pid: pid,
                });
            }
        }
        Ok(pat)
    }
}

/// Build a complete PAT section announcing a single program.
///
/// Transport stream id and version are fixed at 0; receivers of the remuxed
/// stream only ever see this one table.
pub fn build_program_pat(program_number: u16, pmt_pid: u16) -> Vec<u8> {
    let mut section = vec![
        table_id::PAT,
        0xB0, // syntax indicator, section_length filled below
        0x0D, // 5 (ext header) + 4 (entry) + 4 (CRC)
        0x00,
        0x00, // transport_stream_id
        0xC1, // version 0, current
        0x00, // section_number
        0x00, // last_section_number
        (program_number >> 8) as u8,
        program_number as u8,
        0xE0 | ((pmt_pid >> 8) as u8 & 0x1F),
        pmt_pid as u8,
    ];
    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

/// Wrap a PSI section into TS packets on the given PID.
///
/// The continuity counter is advanced per emitted packet, remainder space is
/// stuffed with 0xFF.
pub fn packetize_section(section: &[u8], pid: u16, cc: &mut u8) -> Vec<[u8; TS_PACKET_SIZE]> {
    let mut packets = Vec::with_capacity(1 + section.len() / 184);
    let mut offset = 0;
    let mut first = true;
    while first || offset < section.len() {
        let mut packet = [0xFFu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = ((pid >> 8) as u8 & 0x1F) | if first { 0x40 } else { 0x00 };
        packet[2] = pid as u8;
        packet[3] = 0x10 | (*cc & 0x0F);
        *cc = cc.wrapping_add(1) & 0x0F;

        let mut pos = 4;
        if first {
            packet[pos] = 0; // pointer field
            pos += 1;
            first = false;
        }
        let take = (TS_PACKET_SIZE - pos).min(section.len() - offset);
        packet[pos..pos + take].copy_from_slice(&section[offset..offset + take]);
        offset += take;
        packets.push(packet);
    }
    packets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remux::packet::TsHeader;
    use crate::remux::psi::SectionAssembler;

    #[test]
    fn parse_skips_network_entry() {
        let section = build_test_pat(0x1234, &[(0, 0x0010), (100, 0x0100), (200, 0x0200)]);
        let psi = PsiSection::parse(&section).unwrap();
        assert!(psi.verify_crc(&section));
        let pat = PatTable::parse(&psi).unwrap();
        assert_eq!(pat.transport_stream_id, 0x1234);
        assert_eq!(
            pat.programs,
            vec![
                PatEntry {
                    program_number: 100,
                    pmt_pid: 0x0100
                },
                PatEntry {
                    program_number: 200,
                    pmt_pid: 0x0200
                },
            ]
        );
    }

    #[test]
    fn synthesized_pat_round_trips() {
        let section = build_program_pat(100, 0x0100);
        let psi = PsiSection::parse(&section).unwrap();
        assert!(psi.verify_crc(&section));
        let pat = PatTable::parse(&psi).unwrap();
        assert_eq!(pat.transport_stream_id, 0);
        assert_eq!(
            pat.programs,
            vec![PatEntry {
                program_number: 100,
                pmt_pid: 0x0100
            }]
        );
    }

    #[test]
    fn packetized_pat_reassembles() {
        let section = build_program_pat(7, 0x1FE0);
        let mut cc = 5;
        let packets = packetize_section(&section, 0, &mut cc);
        assert_eq!(packets.len(), 1);
        assert_eq!(cc, 6);

        let header = TsHeader::parse(&packets[0]).unwrap();
        assert_eq!(header.pid, 0);
        assert!(header.payload_unit_start);
        assert_eq!(header.continuity_counter, 5);

        let mut asm = SectionAssembler::new();
        let sections = asm.push(&packets[0][4..], true);
        assert_eq!(sections, vec![section]);
    }

    #[test]
    fn continuity_counter_wraps() {
        let section = build_program_pat(7, 0x100);
        let mut cc = 0x0F;
        packetize_section(&section, 0, &mut cc);
        assert_eq!(cc, 0);
    }

    /// Build a full PAT section with CRC from (program, pid) pairs.
    fn build_test_pat(tsid: u16, entries: &[(u16, u16)]) -> Vec<u8> {
        let section_length = 5 + entries.len() * 4 + 4;
        let mut s = vec![
            table_id::PAT,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            (tsid >> 8) as u8,
            tsid as u8,
            0xC1,
            0x00,
            0x00,
        ];
        for &(program, pid) in entries {
            s.push((program >> 8) as u8);
            s.push(program as u8);
            s.push(0xE0 | ((pid >> 8) as u8 & 0x1F));
            s.push(pid as u8);
        }
        let crc = crc32_mpeg2(&s);
        s.extend_from_slice(&crc.to_be_bytes());
        s
    }
}
