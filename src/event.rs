//! Events delivered to the reactor from worker and reader threads.

use bytes::Bytes;

use crate::error::FrontendError;
use crate::frontend::pool::{FrontendId, TunedDevice};
use crate::remux::TransponderId;

/// Completion and data notifications funneled into the reactor task.
///
/// All variants are sent from plain threads over an unbounded channel, so
/// producers never block on the control path.
pub enum GatewayEvent {
    /// The worker thread finished a tune attempt.
    TuneComplete {
        frontend: FrontendId,
        transponder: TransponderId,
        result: Result<TunedDevice, FrontendError>,
    },
    /// A reader thread delivered transport stream data.
    Stream {
        transponder: TransponderId,
        chunk: Bytes,
    },
    /// A reader thread saw no data within the read timeout.
    ReadTimeout { transponder: TransponderId },
}
