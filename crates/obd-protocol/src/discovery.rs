//! Vehicle Discovery
//!
//! Brings a freshly connected adapter into a known state and works out
//! which service 01 parameters the vehicle supports.

use crate::channel::CommandChannel;
use crate::error::ObdError;
use crate::protocol::ObdProtocol;
use crate::response;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Adapter needs this long after `ATZ` before it accepts commands
pub const DEFAULT_RESET_SETTLE_MS: u64 = 2000;

/// Echo, linefeeds, headers and spaces off
const CONFIGURATION_COMMANDS: [&str; 4] = ["ATE0", "ATL0", "ATH0", "ATS0"];

/// Bitmap ranges queried after the base `0100` query
const BITMAP_RANGES: [u8; 7] = [0x20, 0x40, 0x60, 0x80, 0xA0, 0xC0, 0xE0];

/// Length of a vehicle identification number
const VIN_LENGTH: usize = 17;

/// What discovery learned about the attached vehicle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub vin: Option<String>,
    /// Negotiated protocol name
    pub protocol: String,
    /// Supported service 01 PIDs as two hex digits
    pub supported_pids: BTreeSet<String>,
    /// ECUs that answered the base bitmap query
    pub ecu_count: usize,
    /// Identification string returned by the adapter reset
    pub adapter_version: Option<String>,
}

impl VehicleInfo {
    /// Whether the vehicle reported `code` as supported
    pub fn supports(&self, code: &str) -> bool {
        self.supported_pids.contains(&code.trim().to_ascii_uppercase())
    }
}

/// Discovery settings
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub protocol: ObdProtocol,
    pub reset_settle: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            protocol: ObdProtocol::Auto,
            reset_settle: Duration::from_millis(DEFAULT_RESET_SETTLE_MS),
        }
    }
}

/// Run the initialization handshake and characterize the vehicle
pub async fn discover(
    channel: &CommandChannel,
    config: &DiscoveryConfig,
) -> Result<VehicleInfo, ObdError> {
    info!("Starting vehicle discovery ({})", config.protocol);
    let mut vehicle = VehicleInfo::default();

    match channel.send("ATZ").await {
        Ok(text) => vehicle.adapter_version = adapter_version(&text),
        Err(e) => warn!("Adapter reset failed: {}", e),
    }
    tokio::time::sleep(config.reset_settle).await;

    let mut accepted = 0;
    for command in CONFIGURATION_COMMANDS {
        match channel.send(command).await {
            Ok(text) if is_ok(&text) => accepted += 1,
            Ok(text) => warn!("Adapter rejected {}: {:?}", command, text),
            Err(e) => warn!("{} failed: {}", command, e),
        }
    }
    if accepted == 0 {
        return Err(ObdError::DiscoveryFailed(
            "adapter rejected all configuration commands".to_string(),
        ));
    }

    let select = config.protocol.to_elm_command();
    match channel.send(select).await {
        Ok(text) if is_ok(&text) => debug!("Protocol selection {} accepted", select),
        Ok(text) => warn!("Adapter rejected {}: {:?}", select, text),
        Err(e) => warn!("{} failed: {}", select, e),
    }

    let vin_query = format!("{:02X}02", crate::mode::VEHICLE_INFO);
    match channel.send(&vin_query).await {
        Ok(text) => vehicle.vin = parse_vin(&text),
        Err(e) => warn!("VIN query failed: {}", e),
    }
    match &vehicle.vin {
        Some(vin) => info!("Vehicle VIN {}", vin),
        None => info!("Vehicle VIN unavailable"),
    }

    let base_query = format!("{:02X}00", crate::mode::CURRENT_DATA);
    match channel.send(&base_query).await {
        Ok(text) => match parse_supported(&text, 0x00) {
            Ok((pids, ecus)) => {
                vehicle.ecu_count = ecus;
                vehicle.supported_pids.extend(pids);
            }
            Err(e) => warn!("Base PID bitmap unreadable: {}", e),
        },
        Err(e) => warn!("Base PID bitmap query failed: {}", e),
    }

    for base in BITMAP_RANGES {
        let command = format!("{:02X}{:02X}", crate::mode::CURRENT_DATA, base);
        let result = match channel.send(&command).await {
            Ok(text) => parse_supported(&text, base),
            Err(e) => Err(e),
        };
        match result {
            Ok((pids, _)) => vehicle.supported_pids.extend(pids),
            Err(e) => warn!("Skipping PID range {:02X}: {}", base, e),
        }
    }

    vehicle.protocol = match channel.send("ATDPN").await {
        Ok(text) => ObdProtocol::from_elm_number(&text).unwrap_or(config.protocol),
        Err(_) => config.protocol,
    }
    .description()
    .to_string();

    info!(
        "Discovery complete: protocol {}, {} ECU(s), {} supported PIDs",
        vehicle.protocol,
        vehicle.ecu_count,
        vehicle.supported_pids.len()
    );
    Ok(vehicle)
}

fn is_ok(text: &str) -> bool {
    response::lines(text).iter().any(|line| *line == "OK")
}

fn adapter_version(text: &str) -> Option<String> {
    response::lines(text)
        .into_iter()
        .find(|line| line.to_ascii_uppercase().contains("ELM"))
        .map(str::to_string)
}

/// Parse a supported-PID bitmap answer for the range starting at `base`
///
/// Every ECU answers on its own line; bits are merged. Returns the codes
/// and the number of ECUs that answered.
pub fn parse_supported(text: &str, base: u8) -> Result<(BTreeSet<String>, usize), ObdError> {
    let header = crate::mode::CURRENT_DATA + 0x40;
    let mut pids = BTreeSet::new();
    let mut ecus = 0;

    for line in response::lines(text) {
        if response::is_adapter_error(line) {
            continue;
        }
        let Some(bytes) = response::hex_payload(line) else {
            continue;
        };
        if bytes.len() < 6 || bytes[0] != header || bytes[1] != base {
            continue;
        }

        ecus += 1;
        for (i, byte) in bytes[2..6].iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    let pid = base as usize + i * 8 + bit + 1;
                    pids.insert(format!("{:02X}", pid));
                }
            }
        }
    }

    if ecus == 0 {
        return Err(ObdError::MalformedResponse(format!(
            "no bitmap for range {:02X} in {:?}",
            base, text
        )));
    }
    Ok((pids, ecus))
}

/// Best-effort VIN extraction from a `0902` answer
///
/// Accepts the CAN multi-frame layout (`0: 49 02 01 ..`, `1: ..`) and
/// the legacy one-line-per-frame layout (`49 02 01 ..`, `49 02 02 ..`).
pub fn parse_vin(text: &str) -> Option<String> {
    let lines = response::lines(text);
    if lines.iter().any(|line| response::is_adapter_error(line)) {
        return None;
    }

    let mut chars = Vec::new();
    for line in lines {
        let line = match line.split_once(':') {
            Some((_, rest)) => rest,
            // multi-frame byte count, e.g. "014"
            None if line.len() == 3 => continue,
            None => line,
        };
        let Some(bytes) = response::hex_payload(line) else {
            continue;
        };
        let data = if bytes.len() >= 3 && bytes[0] == 0x49 && bytes[1] == 0x02 {
            &bytes[3..]
        } else {
            &bytes[..]
        };
        chars.extend(
            data.iter()
                .copied()
                .filter(u8::is_ascii_alphanumeric)
                .map(char::from),
        );
    }

    if chars.len() < VIN_LENGTH {
        return None;
    }
    Some(chars[chars.len() - VIN_LENGTH..].iter().collect())
}
