//! Transponder remultiplexing.
//!
//! Parses PAT/PMT tables on the uplink transport stream, routes packets to
//! subscribers by PID, and synthesizes a reduced single-program PAT per
//! subscriber.

pub mod engine;
pub mod packet;
pub mod pat;
pub mod pmt;
pub mod psi;

pub use engine::{
    DataCallback, RemuxEngine, SubscriberId, TeardownCallback, TransponderId,
    MAX_TRANSPONDER_RETRIES,
};
pub use packet::{TsHeader, SYNC_BYTE, TS_PACKET_SIZE};

/// Number of PID slots per transponder. PIDs at or above `MAX_PID - 1`
/// (including the null PID 0x1FFF) are never forwarded.
pub const MAX_PID: usize = 8192;

/// PID carrying EPG data, forwarded to every subscriber.
pub const EPG_PID: u16 = 18;

/// Table IDs the engine dispatches on.
pub mod table_id {
    /// Program Association Section.
    pub const PAT: u8 = 0x00;
    /// Program Map Section.
    pub const PMT: u8 = 0x02;
}
