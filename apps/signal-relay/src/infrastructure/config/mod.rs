//! Configuration Module
//!
//! Bridge and server settings loaded from environment variables.

mod settings;

pub use settings::{
    BridgeSettings, ConfigError, DEFAULT_CLIENT_BUFFER, DEFAULT_HEALTH_PORT, RelayConfig,
    SDR_BRIDGE, ServerSettings, WEBSDR_BRIDGE,
};
