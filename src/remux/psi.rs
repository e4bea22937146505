//! PSI (Program Specific Information) section handling.
//!
//! Covers the common long-section header, MPEG-2 CRC32 validation and the
//! per-PID section assembler that stitches sections back together from
//! packetized payload.

/// Largest PSI section the assembler accepts (PAT/PMT sections are capped
/// at 1024 bytes by the standard).
pub const MAX_SECTION_SIZE: usize = 1024;

/// Parsed PSI long-section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator.
    pub section_syntax_indicator: bool,
    /// Section length (12 bits).
    pub section_length: u16,
    /// Table ID extension (TSID for the PAT, program number for a PMT).
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

/// A parsed PSI section, borrowing the assembled bytes.
#[derive(Debug, Clone)]
pub struct PsiSection<'a> {
    /// Section header.
    pub header: PsiHeader,
    /// Table body (after the extended header, before the CRC).
    pub data: &'a [u8],
    /// CRC32 trailer value.
    pub crc32: u32,
}

impl<'a> PsiSection<'a> {
    /// Parse a complete section starting at the table_id byte.
    pub fn parse(data: &'a [u8]) -> Result<Self, &'static str> {
        if data.len() < 3 {
            return Err("section too short for header");
        }
        let table_id = data[0];
        let section_syntax_indicator = data[1] & 0x80 != 0;
        let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;
        if !section_syntax_indicator {
            return Err("short section syntax");
        }
        if section_length < 9 {
            // Extended header (5) plus CRC (4) at minimum.
            return Err("section length too small");
        }
        let total = 3 + section_length as usize;
        if data.len() < total {
            return Err("incomplete section");
        }

        let header = PsiHeader {
            table_id,
            section_syntax_indicator,
            section_length,
            table_id_extension: ((data[3] as u16) << 8) | data[4] as u16,
            version_number: (data[5] >> 1) & 0x1F,
            current_next_indicator: data[5] & 0x01 != 0,
            section_number: data[6],
            last_section_number: data[7],
        };

        let crc_offset = total - 4;
        let crc32 = ((data[crc_offset] as u32) << 24)
            | ((data[crc_offset + 1] as u32) << 16)
            | ((data[crc_offset + 2] as u32) << 8)
            | (data[crc_offset + 3] as u32);

        Ok(PsiSection {
            header,
            data: &data[8..crc_offset],
            crc32,
        })
    }

    /// Verify the CRC32 trailer against the full section bytes.
    pub fn verify_crc(&self, full_section: &[u8]) -> bool {
        let total = 3 + self.header.section_length as usize;
        if full_section.len() < total {
            return false;
        }
        crc32_mpeg2(&full_section[..total - 4]) == self.crc32
    }
}

/// Calculate CRC32 for MPEG-2 (polynomial 0x04C11DB7).
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    static CRC_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = (i as u32) << 24;
            let mut j = 0;
            while j < 8 {
                if crc & 0x8000_0000 != 0 {
                    crc = (crc << 1) ^ 0x04C1_1DB7;
                } else {
                    crc <<= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc >> 24) ^ byte as u32) as usize;
        crc = (crc << 8) ^ CRC_TABLE[index];
    }
    crc
}

/// Reassembles PSI sections from packet payloads on one PID.
///
/// A single packet can both finish the section in flight and begin one or
/// more new ones after the pointer field, so `push` returns every section
/// completed by that packet. The internal buffer keeps its allocation
/// between sections and never grows beyond [`MAX_SECTION_SIZE`].
#[derive(Debug, Default)]
pub struct SectionAssembler {
    buffer: Vec<u8>,
    expected: Option<usize>,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially assembled section (continuity loss).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected = None;
    }

    /// Feed one packet's payload. Returns all sections completed by it.
    pub fn push(&mut self, payload: &[u8], unit_start: bool) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if unit_start {
            if payload.is_empty() {
                return out;
            }
            let pointer = payload[0] as usize;
            if 1 + pointer > payload.len() {
                self.reset();
                return out;
            }
            // Bytes before the pointer belong to the section in flight.
            self.continue_section(&payload[1..1 + pointer], &mut out);
            // Whatever is still pending was cut short by the new start.
            self.reset();
            self.start_sections(&payload[1 + pointer..], &mut out);
        } else {
            self.continue_section(payload, &mut out);
        }
        out
    }

    /// Append continuation bytes to the section in flight, if any.
    fn continue_section(&mut self, mut bytes: &[u8], out: &mut Vec<Vec<u8>>) {
        if self.buffer.is_empty() || bytes.is_empty() {
            return;
        }
        if self.expected.is_none() {
            // The 3-byte header was split across packets.
            let need = 3 - self.buffer.len();
            let take = need.min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.buffer.len() < 3 {
                return;
            }
            if !self.note_length() {
                return;
            }
        }
        let expected = match self.expected {
            Some(len) => len,
            None => return,
        };
        let take = (expected - self.buffer.len()).min(bytes.len());
        self.buffer.extend_from_slice(&bytes[..take]);
        if self.buffer.len() == expected {
            out.push(std::mem::take(&mut self.buffer));
            self.expected = None;
            // Trailing bytes in a continuation packet can only be stuffing.
        }
    }

    /// Consume sections that start back-to-back after the pointer field.
    fn start_sections(&mut self, mut bytes: &[u8], out: &mut Vec<Vec<u8>>) {
        while !bytes.is_empty() && bytes[0] != 0xFF {
            if bytes.len() < 3 {
                // Header itself spans into the next packet.
                self.buffer.extend_from_slice(bytes);
                return;
            }
            self.buffer.extend_from_slice(&bytes[..3]);
            bytes = &bytes[3..];
            if !self.note_length() {
                return;
            }
            let expected = self.expected.unwrap_or(3);
            let take = (expected - self.buffer.len()).min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.buffer.len() < expected {
                return;
            }
            out.push(std::mem::take(&mut self.buffer));
            self.expected = None;
        }
    }

    /// Derive the expected total length from the buffered 3-byte header.
    /// Returns false (and resets) on an oversized section.
    fn note_length(&mut self) -> bool {
        let len = 3 + ((((self.buffer[1] & 0x0F) as usize) << 8) | self.buffer[2] as usize);
        if len > MAX_SECTION_SIZE {
            self.reset();
            return false;
        }
        self.expected = Some(len);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal long section: given body, fills in length and CRC.
    fn make_section(table_id: u8, ext: u16, body: &[u8]) -> Vec<u8> {
        let section_length = 5 + body.len() + 4;
        let mut s = vec![
            table_id,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            (ext >> 8) as u8,
            ext as u8,
            0xC1, // version 0, current
            0x00,
            0x00,
        ];
        s.extend_from_slice(body);
        let crc = crc32_mpeg2(&s);
        s.extend_from_slice(&crc.to_be_bytes());
        s
    }

    #[test]
    fn parse_and_verify() {
        let section = make_section(0x00, 0x1234, &[0x00, 0x64, 0xE1, 0x00]);
        let psi = PsiSection::parse(&section).unwrap();
        assert_eq!(psi.header.table_id, 0);
        assert_eq!(psi.header.table_id_extension, 0x1234);
        assert_eq!(psi.data, &[0x00, 0x64, 0xE1, 0x00]);
        assert!(psi.verify_crc(&section));
    }

    #[test]
    fn detects_corruption() {
        let mut section = make_section(0x00, 0x1234, &[0x00, 0x64, 0xE1, 0x00]);
        section[9] ^= 0xFF;
        let psi = PsiSection::parse(&section).unwrap();
        assert!(!psi.verify_crc(&section));
    }

    #[test]
    fn single_packet_section() {
        let section = make_section(0x00, 1, &[0, 1, 0xE0, 0x20]);
        let mut payload = vec![0u8]; // pointer field
        payload.extend_from_slice(&section);
        payload.resize(184, 0xFF);

        let mut asm = SectionAssembler::new();
        let sections = asm.push(&payload, true);
        assert_eq!(sections, vec![section]);
    }

    #[test]
    fn section_spanning_packets() {
        let body: Vec<u8> = (0..250).map(|i| i as u8).collect();
        let section = make_section(0x02, 7, &body);
        assert!(section.len() > 184);

        let mut first = vec![0u8];
        first.extend_from_slice(&section[..183]);
        let rest = &section[183..];

        let mut asm = SectionAssembler::new();
        assert!(asm.push(&first, true).is_empty());
        let mut second = rest.to_vec();
        second.resize(184, 0xFF);
        let sections = asm.push(&second, false);
        assert_eq!(sections, vec![section]);
    }

    #[test]
    fn packet_finishing_one_section_and_starting_another() {
        let body: Vec<u8> = (0..200).map(|i| i as u8).collect();
        let long = make_section(0x02, 7, &body);
        let short = make_section(0x00, 1, &[0, 1, 0xE0, 0x20]);

        let tail_len = long.len() - 183;
        let mut first = vec![0u8];
        first.extend_from_slice(&long[..183]);

        let mut asm = SectionAssembler::new();
        assert!(asm.push(&first, true).is_empty());
        let mut second = vec![tail_len as u8];
        second.extend_from_slice(&long[183..]);
        second.extend_from_slice(&short);
        second.resize(184, 0xFF);
        let sections = asm.push(&second, true);
        assert_eq!(sections, vec![long, short]);
    }

    #[test]
    fn two_sections_in_one_packet() {
        let a = make_section(0x00, 1, &[0, 1, 0xE0, 0x20]);
        let b = make_section(0x00, 2, &[0, 2, 0xE0, 0x21]);
        let mut payload = vec![0u8];
        payload.extend_from_slice(&a);
        payload.extend_from_slice(&b);
        payload.resize(184, 0xFF);

        let mut asm = SectionAssembler::new();
        let sections = asm.push(&payload, true);
        assert_eq!(sections, vec![a, b]);
    }

    #[test]
    fn reset_discards_partial() {
        let body: Vec<u8> = (0..250).map(|i| i as u8).collect();
        let section = make_section(0x02, 7, &body);
        let mut first = vec![0u8];
        first.extend_from_slice(&section[..183]);

        let mut asm = SectionAssembler::new();
        assert!(asm.push(&first, true).is_empty());
        asm.reset();
        let mut second = section[183..].to_vec();
        second.resize(184, 0xFF);
        assert!(asm.push(&second, false).is_empty());
    }

    #[test]
    fn oversized_section_is_dropped() {
        // section_length 0xFFF exceeds the PAT/PMT cap
        let payload = [0u8, 0x02, 0xBF, 0xFF, 0, 0, 0, 0, 0, 0];
        let mut asm = SectionAssembler::new();
        assert!(asm.push(&payload, true).is_empty());
        // and nothing lingers
        let cont = [0u8; 184];
        assert!(asm.push(&cont, false).is_empty());
    }
}
