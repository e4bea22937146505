//! Frontend pool management.
//!
//! Owns the tuner hardware: capability probing at attach time, the
//! idle/tuning/active/stale lifecycle, and the worker thread that keeps
//! blocking device setup off the control path.

pub mod device;
pub mod lnb;
pub mod pool;

pub use device::{platform_backend, TunerBackend};
pub use lnb::LnbConfig;
pub use pool::{FrontendId, FrontendPool, FrontendState, PoolOptions, TuneOutcome};
