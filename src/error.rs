//! Error types crossing the gateway's component boundaries.

use crate::tune::DeliverySystem;

/// Errors raised by the frontend pool and the tuner hardware layer.
#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    /// Opening one of the tuner device handles failed.
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// The capability probe at attach time failed.
    #[error("capability probe on adapter{adapter}/frontend{frontend} failed: {reason}")]
    Probe {
        adapter: u32,
        frontend: u32,
        reason: String,
    },

    /// The frontend supports no delivery system the gateway handles.
    #[error("adapter{adapter}/frontend{frontend} supports no usable delivery system")]
    Unsupported { adapter: u32, frontend: u32 },

    /// The tune command was rejected by the frontend.
    #[error("tune command failed: {0}")]
    Tune(String),

    /// Configuring the demultiplexer pass-through filter failed.
    #[error("demux configuration failed: {0}")]
    Demux(String),

    /// The platform has no tuner hardware support compiled in.
    #[error("no tuner backend available on this platform")]
    NoBackend,
}

/// Errors returned to collaborators from `subscribe()`.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    /// No idle frontend supports the requested delivery system.
    #[error("no idle frontend supports {0:?}")]
    NoFrontend(DeliverySystem),

    /// The gateway is shutting down and accepts no new subscribers.
    #[error("gateway is shutting down")]
    Closed,
}
