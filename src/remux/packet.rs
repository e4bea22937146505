//! MPEG-TS packet header parsing.

/// TS packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// TS sync byte (0x47).
pub const SYNC_BYTE: u8 = 0x47;

/// Parsed TS packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    /// Transport error indicator.
    pub transport_error: bool,
    /// Payload unit start indicator.
    pub payload_unit_start: bool,
    /// Packet Identifier (13 bits).
    pub pid: u16,
    /// Adaptation field control (2 bits).
    pub adaptation_field_control: u8,
    /// Continuity counter (4 bits).
    pub continuity_counter: u8,
}

impl TsHeader {
    /// Parse the 4-byte TS header of a packet.
    pub fn parse(data: &[u8]) -> Result<Self, &'static str> {
        if data.len() < TS_PACKET_SIZE {
            return Err("packet too short");
        }
        if data[0] != SYNC_BYTE {
            return Err("invalid sync byte");
        }
        Ok(TsHeader {
            transport_error: data[1] & 0x80 != 0,
            payload_unit_start: data[1] & 0x40 != 0,
            pid: ((data[1] as u16 & 0x1F) << 8) | data[2] as u16,
            adaptation_field_control: (data[3] >> 4) & 0x03,
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Check if the packet carries payload bytes.
    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    /// Check if the packet carries an adaptation field.
    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }
}

/// The payload slice of a packet, skipping the adaptation field if present.
pub fn ts_payload<'a>(packet: &'a [u8], header: &TsHeader) -> Option<&'a [u8]> {
    if !header.has_payload() {
        return None;
    }
    let offset = if header.has_adaptation_field() {
        5 + packet[4] as usize
    } else {
        4
    };
    if offset >= TS_PACKET_SIZE {
        return None;
    }
    Some(&packet[offset..TS_PACKET_SIZE])
}
