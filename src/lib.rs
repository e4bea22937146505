//! satgate: a DVB-S/S2 satellite streaming gateway.
//!
//! Clients subscribe to a single service; the gateway shares tuned
//! transponders between them, remuxes each service into a single-program
//! stream and manages the tuner hardware behind a pool.

pub mod channels;
pub mod config;
pub mod error;
pub mod event;
pub mod frontend;
pub mod logging;
pub mod reactor;
pub mod remux;
pub mod tune;

pub use reactor::{GatewayHandle, Reactor};
pub use remux::RemuxEngine;
pub use tune::{DeliverySystem, Tune};
