//! Scan configuration

use crate::error::ScanError;
use alerting::AlertConfig;
use obd_protocol::{DiscoveryConfig, ObdProtocol, DEFAULT_RESET_SETTLE_MS, DEFAULT_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Prefix for environment overrides, e.g. `OBD_SCAN__POLL_INTERVAL_MS`
pub const ENV_PREFIX: &str = "OBD_SCAN";

/// Adapter selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Adapter descriptor recorded on sessions
    pub name: String,

    /// Serial device path, also used as the session's device identifier
    pub device: String,

    /// Serial baud rate
    pub baud_rate: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: "ELM327".to_string(),
            device: "/dev/rfcomm0".to_string(),
            baud_rate: 38400,
        }
    }
}

/// Scan engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Adapter selection
    pub adapter: AdapterConfig,

    /// OBD protocol to request during discovery
    pub protocol: ObdProtocol,

    /// Polling period (milliseconds)
    pub poll_interval_ms: u64,

    /// Parameter codes polled each tick, in order
    pub selected_pids: Vec<String>,

    /// Require data-collection consent before scanning
    pub research_mode: bool,

    /// Sessions stop automatically after this long (milliseconds)
    pub max_session_duration_ms: u64,

    /// Command channel timeout (milliseconds)
    pub command_timeout_ms: u64,

    /// Wait after adapter reset (milliseconds)
    pub reset_settle_ms: u64,

    /// Out-of-range alert grading
    pub alerts: AlertConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterConfig::default(),
            protocol: ObdProtocol::Auto,
            poll_interval_ms: 1000,
            selected_pids: ["05", "0C", "0D", "11", "0F", "10", "2F", "42"]
                .iter()
                .map(|code| code.to_string())
                .collect(),
            research_mode: false,
            max_session_duration_ms: 60 * 60 * 1000,
            command_timeout_ms: DEFAULT_TIMEOUT_MS,
            reset_settle_ms: DEFAULT_RESET_SETTLE_MS,
            alerts: AlertConfig::default(),
        }
    }
}

impl ScanConfig {
    /// Load from an optional file plus `OBD_SCAN__*` environment overrides
    ///
    /// Nested keys use a double underscore, e.g. `OBD_SCAN__ADAPTER__DEVICE`.
    pub fn load(path: Option<&Path>) -> Result<Self, ScanError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!("Loading scan configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("selected_pids"),
        );

        let config: ScanConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ScanError> {
        let zero = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("max_session_duration_ms", self.max_session_duration_ms),
            ("command_timeout_ms", self.command_timeout_ms),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);

        if let Some((field, _)) = zero {
            return Err(ScanError::Config(format!("{} must be greater than zero", field)));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_session_duration(&self) -> Duration {
        Duration::from_millis(self.max_session_duration_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Settings handed to vehicle discovery
    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            protocol: self.protocol,
            reset_settle: Duration::from_millis(self.reset_settle_ms),
        }
    }
}
