//! Application Services
//!
//! The relay controller and the pieces it owns that are not pure domain
//! types: client membership with fan-out, and the reconnect policy.

pub mod reconnect;
pub mod registry;
pub mod relay;

#[cfg(test)]
pub(crate) mod testing;

pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectConfig, ReconnectMode, ReconnectPolicy};
pub use registry::{ClientRegistry, FanoutReport};
pub use relay::{RelayController, RelayStats};
