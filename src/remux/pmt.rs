//! PMT (Program Map Table) parsing.
//!
//! The engine only needs the PID layout of a program: its PCR PID and the
//! elementary stream PIDs, so descriptor contents are skipped over.

use super::psi::PsiSection;
use super::table_id;

/// Parsed PMT, reduced to the PIDs a remuxed client must receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtTable {
    /// Program number this PMT describes.
    pub program_number: u16,
    /// Version number.
    pub version_number: u8,
    /// PID carrying the program clock reference.
    pub pcr_pid: u16,
    /// Elementary stream PIDs in table order.
    pub elementary_pids: Vec<u16>,
}

impl PmtTable {
    /// Parse a PMT from a validated PSI section.
    pub fn parse(section: &PsiSection) -> Result<Self, &'static str> {
        if section.header.table_id != table_id::PMT {
            return Err("not a PMT section");
        }
        if !section.header.current_next_indicator {
            return Err("PMT not current");
        }
        let data = section.data;
        if data.len() < 4 {
            return Err("PMT body too short");
        }

        let pcr_pid = ((data[0] as u16 & 0x1F) << 8) | data[1] as u16;
        let program_info_length = ((data[2] as usize & 0x0F) << 8) | data[3] as usize;
        let mut offset = 4 + program_info_length;
        if offset > data.len() {
            return Err("program info overruns section");
        }

        let mut elementary_pids = Vec::new();
        while offset + 5 <= data.len() {
            let pid = ((data[offset + 1] as u16 & 0x1F) << 8) | data[offset + 2] as u16;
            let es_info_length =
                ((data[offset + 3] as usize & 0x0F) << 8) | data[offset + 4] as usize;
            elementary_pids.push(pid);
            offset += 5 + es_info_length;
        }
        if offset != data.len() {
            return Err("trailing garbage in PMT");
        }

        Ok(PmtTable {
            program_number: section.header.table_id_extension,
            version_number: section.header.version_number,
            pcr_pid,
            elementary_pids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remux::psi::crc32_mpeg2;

    /// Build a full PMT section with CRC.
    pub(crate) fn build_test_pmt(program: u16, pcr_pid: u16, es: &[(u8, u16)]) -> Vec<u8> {
        let mut body = vec![
            0xE0 | ((pcr_pid >> 8) as u8 & 0x1F),
            pcr_pid as u8,
            0xF0,
            0x00, // no program info
        ];
        for &(stream_type, pid) in es {
            body.push(stream_type);
            body.push(0xE0 | ((pid >> 8) as u8 & 0x1F));
            body.push(pid as u8);
            body.push(0xF0);
            body.push(0x00); // no ES info
        }
        let section_length = 5 + body.len() + 4;
        let mut s = vec![
            table_id::PMT,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            (program >> 8) as u8,
            program as u8,
            0xC1,
            0x00,
            0x00,
        ];
        s.extend_from_slice(&body);
        let crc = crc32_mpeg2(&s);
        s.extend_from_slice(&crc.to_be_bytes());
        s
    }

    #[test]
    fn parse_extracts_pids() {
        let section = build_test_pmt(100, 0x0201, &[(0x02, 0x0201), (0x04, 0x0202)]);
        let psi = PsiSection::parse(&section).unwrap();
        assert!(psi.verify_crc(&section));
        let pmt = PmtTable::parse(&psi).unwrap();
        assert_eq!(pmt.program_number, 100);
        assert_eq!(pmt.pcr_pid, 0x0201);
        assert_eq!(pmt.elementary_pids, vec![0x0201, 0x0202]);
    }

    #[test]
    fn parse_skips_es_descriptors() {
        let mut body = vec![0xE1, 0x00, 0xF0, 0x00];
        body.extend_from_slice(&[0x1B, 0xE1, 0x00, 0xF0, 0x03, 0x52, 0x01, 0x00]);
        let section_length = 5 + body.len() + 4;
        let mut s = vec![
            table_id::PMT,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            0x00,
            0x64,
            0xC1,
            0x00,
            0x00,
        ];
        s.extend_from_slice(&body);
        let crc = crc32_mpeg2(&s);
        s.extend_from_slice(&crc.to_be_bytes());

        let psi = PsiSection::parse(&s).unwrap();
        let pmt = PmtTable::parse(&psi).unwrap();
        assert_eq!(pmt.elementary_pids, vec![0x0100]);
    }

    #[test]
    fn rejects_wrong_table_id() {
        let section = build_test_pmt(100, 0x0201, &[]);
        let mut psi = PsiSection::parse(&section).unwrap();
        psi.header.table_id = 0x00;
        assert!(PmtTable::parse(&psi).is_err());
    }
}
