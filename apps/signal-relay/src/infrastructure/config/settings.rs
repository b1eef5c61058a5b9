//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.
//! Every value has a default, so an empty environment yields a working
//! two-bridge setup on localhost.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::application::services::reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectConfig};

/// Name of the primary bridge.
pub const SDR_BRIDGE: &str = "sdr";

/// Name of the optional secondary bridge.
pub const WEBSDR_BRIDGE: &str = "websdr";

/// Default health server port.
pub const DEFAULT_HEALTH_PORT: u16 = 8082;

/// Default per-observer outbound queue capacity, in frames.
pub const DEFAULT_CLIENT_BUFFER: usize = 1_024;

/// One relay: an upstream source and the port its observers connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Bridge name, used in logs, metrics and the status API.
    pub name: &'static str,
    /// Whether health depends on this bridge being connected.
    pub required: bool,
    /// Upstream WebSocket URL.
    pub upstream_url: String,
    /// Downstream WebSocket listen port.
    pub listen_port: u16,
    /// Reconnect schedule.
    pub reconnect: ReconnectConfig,
    /// Frames queued per observer before further frames to it are dropped.
    pub client_buffer: usize,
}

impl BridgeSettings {
    /// Primary bridge to the signal detector. Never stops retrying.
    #[must_use]
    pub fn sdr() -> Self {
        Self {
            name: SDR_BRIDGE,
            required: true,
            upstream_url: "ws://localhost:8765".to_string(),
            listen_port: 8080,
            reconnect: ReconnectConfig::unbounded(DEFAULT_RECONNECT_DELAY),
            client_buffer: DEFAULT_CLIENT_BUFFER,
        }
    }

    /// Secondary bridge to the WebSDR backend, which may not be deployed.
    #[must_use]
    pub fn websdr() -> Self {
        Self {
            name: WEBSDR_BRIDGE,
            required: false,
            upstream_url: "ws://localhost:8766".to_string(),
            listen_port: 8081,
            reconnect: ReconnectConfig::bounded(DEFAULT_RECONNECT_DELAY, 10),
            client_buffer: DEFAULT_CLIENT_BUFFER,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Enabled bridges, primary first.
    pub bridges: Vec<BridgeSettings>,
    /// Server port settings.
    pub server: ServerSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bridges: vec![BridgeSettings::sdr(), BridgeSettings::websdr()],
            server: ServerSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL is not a WebSocket URL or two listeners
    /// share a port.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from any key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let delay = parse_env_duration_millis(&lookup, "RELAY_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY);
        let client_buffer =
            parse_env_usize(&lookup, "RELAY_CLIENT_BUFFER", DEFAULT_CLIENT_BUFFER).max(1);

        let sdr_defaults = BridgeSettings::sdr();
        let sdr = BridgeSettings {
            upstream_url: lookup("RELAY_UPSTREAM_URL").unwrap_or(sdr_defaults.upstream_url),
            listen_port: parse_env_u16(&lookup, "RELAY_LISTEN_PORT", sdr_defaults.listen_port),
            reconnect: ReconnectConfig {
                delay,
                max_attempts: parse_env_u32(
                    &lookup,
                    "RELAY_MAX_RECONNECT_ATTEMPTS",
                    sdr_defaults.reconnect.max_attempts,
                ),
            },
            client_buffer,
            ..sdr_defaults
        };

        let mut bridges = vec![sdr];

        if parse_env_bool(&lookup, "WEBSDR_BRIDGE_ENABLED", true) {
            let websdr_defaults = BridgeSettings::websdr();
            bridges.push(BridgeSettings {
                upstream_url: lookup("WEBSDR_UPSTREAM_URL").unwrap_or(websdr_defaults.upstream_url),
                listen_port: parse_env_u16(&lookup, "WEBSDR_LISTEN_PORT", websdr_defaults.listen_port),
                reconnect: ReconnectConfig {
                    delay,
                    max_attempts: parse_env_u32(
                        &lookup,
                        "WEBSDR_MAX_RECONNECT_ATTEMPTS",
                        websdr_defaults.reconnect.max_attempts,
                    ),
                },
                client_buffer,
                ..websdr_defaults
            });
        }

        let server = ServerSettings {
            health_port: parse_env_u16(&lookup, "RELAY_HEALTH_PORT", DEFAULT_HEALTH_PORT),
        };

        let config = Self { bridges, server };
        config.validate()?;
        Ok(config)
    }

    /// Check URLs and port assignments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` or `PortConflict`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ports = BTreeSet::from([self.server.health_port]);

        for bridge in &self.bridges {
            let url = bridge.upstream_url.trim();
            let scheme_ok = url.starts_with("ws://") || url.starts_with("wss://");
            let has_host = url.split_once("://").is_some_and(|(_, rest)| !rest.is_empty());
            if !scheme_ok || !has_host {
                return Err(ConfigError::InvalidUrl {
                    bridge: bridge.name,
                    url: bridge.upstream_url.clone(),
                });
            }
            // Port 0 asks the OS for a free port, so it can never collide.
            if bridge.listen_port != 0 && !ports.insert(bridge.listen_port) {
                return Err(ConfigError::PortConflict(bridge.listen_port));
            }
        }

        Ok(())
    }

    /// Settings for the named bridge.
    #[must_use]
    pub fn bridge(&self, name: &str) -> Option<&BridgeSettings> {
        self.bridges.iter().find(|bridge| bridge.name == name)
    }
}

/// Configuration error.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Upstream URL is not a WebSocket URL.
    #[error("bridge {bridge}: upstream URL must be ws:// or wss://, got {url:?}")]
    InvalidUrl {
        /// Bridge the URL belongs to.
        bridge: &'static str,
        /// Offending value.
        url: String,
    },
    /// Two listeners configured on the same port.
    #[error("port {0} is assigned to more than one listener")]
    PortConflict(u16),
}

fn parse_env_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_env_u32<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u32) -> u32 {
    lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_env_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_env_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: bool) -> bool {
    lookup(key)
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;
    use crate::application::services::reconnect::ReconnectMode;

    fn load(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, RelayConfig::default());

        let sdr = config.bridge(SDR_BRIDGE).unwrap();
        assert!(sdr.required);
        assert_eq!(sdr.upstream_url, "ws://localhost:8765");
        assert_eq!(sdr.listen_port, 8080);
        assert_eq!(sdr.reconnect.mode(), ReconnectMode::Unbounded);
        assert_eq!(sdr.reconnect.delay, Duration::from_millis(5000));

        let websdr = config.bridge(WEBSDR_BRIDGE).unwrap();
        assert!(!websdr.required);
        assert_eq!(websdr.upstream_url, "ws://localhost:8766");
        assert_eq!(websdr.listen_port, 8081);
        assert_eq!(websdr.reconnect.max_attempts, 10);

        assert_eq!(config.server.health_port, 8082);
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("RELAY_UPSTREAM_URL", "wss://detector.local/ws"),
            ("RELAY_LISTEN_PORT", "9000"),
            ("RELAY_MAX_RECONNECT_ATTEMPTS", "3"),
            ("RELAY_RECONNECT_DELAY_MS", "250"),
            ("WEBSDR_LISTEN_PORT", "9001"),
            ("RELAY_HEALTH_PORT", "9002"),
        ])
        .unwrap();

        let sdr = &config.bridges[0];
        assert_eq!(sdr.upstream_url, "wss://detector.local/ws");
        assert_eq!(sdr.listen_port, 9000);
        assert_eq!(sdr.reconnect.max_attempts, 3);
        assert_eq!(sdr.reconnect.delay, Duration::from_millis(250));
        assert_eq!(config.bridges[1].reconnect.delay, Duration::from_millis(250));
        assert_eq!(config.server.health_port, 9002);
    }

    #[test_case("64", 64 ; "explicit")]
    #[test_case("0", 1 ; "zero clamps to one")]
    #[test_case("lots", DEFAULT_CLIENT_BUFFER ; "unparseable")]
    fn client_buffer_applies_to_every_bridge(value: &str, expected: usize) {
        let config = load(&[("RELAY_CLIENT_BUFFER", value)]).unwrap();
        assert!(config.bridges.iter().all(|b| b.client_buffer == expected));
    }

    #[test_case("false" ; "false")]
    #[test_case("0" ; "zero")]
    #[test_case("OFF" ; "off uppercase")]
    fn websdr_can_be_disabled(value: &str) {
        let config = load(&[("WEBSDR_BRIDGE_ENABLED", value)]).unwrap();
        assert_eq!(config.bridges.len(), 1);
        assert!(config.bridge(WEBSDR_BRIDGE).is_none());
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let config = load(&[
            ("RELAY_LISTEN_PORT", "eighty"),
            ("WEBSDR_BRIDGE_ENABLED", "maybe"),
            ("RELAY_RECONNECT_DELAY_MS", "-1"),
        ])
        .unwrap();
        assert_eq!(config.bridges[0].listen_port, 8080);
        assert_eq!(config.bridges.len(), 2);
        assert_eq!(config.bridges[0].reconnect.delay, DEFAULT_RECONNECT_DELAY);
    }

    #[test_case("http://localhost:8765" ; "http scheme")]
    #[test_case("localhost:8765" ; "no scheme")]
    #[test_case("ws://" ; "no host")]
    #[test_case("" ; "empty")]
    fn non_websocket_urls_are_rejected(url: &str) {
        assert_eq!(
            load(&[("RELAY_UPSTREAM_URL", url)]),
            Err(ConfigError::InvalidUrl {
                bridge: SDR_BRIDGE,
                url: url.to_string()
            })
        );
    }

    #[test]
    fn port_conflicts_are_rejected() {
        assert_eq!(
            load(&[("WEBSDR_LISTEN_PORT", "8080")]),
            Err(ConfigError::PortConflict(8080))
        );
        assert_eq!(
            load(&[("RELAY_HEALTH_PORT", "8081")]),
            Err(ConfigError::PortConflict(8081))
        );
    }

    #[test]
    fn ephemeral_ports_never_conflict() {
        let config = load(&[("RELAY_LISTEN_PORT", "0"), ("WEBSDR_LISTEN_PORT", "0")]);
        assert!(config.is_ok());
    }
}
