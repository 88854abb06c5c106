//! Runtime configuration for the bridge and its executables.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub network: NetworkConfig,
    pub transport: TransportConfig,
    pub bridge: TickConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Loopback endpoints shared with the device-controller process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: IpAddr,
    /// Port the peer serves; the receive loop connects to it.
    pub receive_port: u16,
    /// Port the send loop listens on; the peer connects to drain it.
    pub send_port: u16,
}

/// Socket loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub receive_sleep_ms: u64,
    pub send_sleep_ms: u64,
    /// Iterations before a loop hands over to a fresh instance.
    pub recycle_after: u32,
    /// Upper bound on connecting to the peer.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    pub keepalive_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub outbound_queue_limit: usize,
    /// Host runner tick rate.
    pub tick_hz: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Calibration file; empty disables persistence.
    pub settings_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "trace", "debug", "info", "warn" or "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            receive_port: 25001,
            send_port: 35001,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            receive_sleep_ms: 1000 / 60,
            send_sleep_ms: 1,
            recycle_after: 500,
            connect_timeout_ms: 1000,
        }
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: 500,
            shutdown_grace_ms: 3000,
            outbound_queue_limit: crate::outbound::OUTBOUND_QUEUE_CAPACITY,
            tick_hz: 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("peripheral_settings.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl BridgeConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(&Self::default())?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn receive_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.host, self.network.receive_port)
    }

    pub fn send_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.host, self.network.send_port)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.bridge.keepalive_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.bridge.shutdown_grace_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.bridge.tick_hz.clamp(1, 1000)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&BridgeConfig::default()).unwrap();
        assert!(text.contains("receive_port"));
        assert!(text.contains("keepalive_interval_ms"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = BridgeConfig::parse("[network]\nsend_port = 40000\n").unwrap();
        assert_eq!(cfg.network.send_port, 40000);
        assert_eq!(cfg.network.receive_port, 25001);
        assert_eq!(cfg.transport.recycle_after, 500);
        assert_eq!(cfg.shutdown_grace(), Duration::from_secs(3));
    }

    #[test]
    fn tick_rate_is_clamped() {
        let mut cfg = BridgeConfig::default();
        cfg.bridge.tick_hz = 0;
        assert_eq!(cfg.tick_period(), Duration::from_secs(1));
    }
}
