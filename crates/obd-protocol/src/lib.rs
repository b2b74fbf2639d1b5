//! OBD-II Protocol Implementation
//!
//! This crate talks to ELM327-compatible adapters over an abstract text
//! [`Link`]. It provides the one-at-a-time [`CommandChannel`], the
//! parameter registry and decoder, and the discovery handshake that
//! produces a [`VehicleInfo`].

mod channel;
mod decoder;
mod discovery;
mod error;
mod link;
pub mod mock;
mod pid;
mod protocol;
pub mod response;
mod serial;

pub use channel::{CommandChannel, DEFAULT_TIMEOUT_MS};
pub use decoder::{Reading, ReadingDecoder, ReadingMetadata, UNKNOWN_VEHICLE};
pub use discovery::{
    discover, parse_supported, parse_vin, DiscoveryConfig, VehicleInfo, DEFAULT_RESET_SETTLE_MS,
};
pub use error::ObdError;
pub use link::{Link, LinkEvent};
pub use pid::{Category, Formula, ParameterDefinition, ParameterRegistry, STANDARD_PIDS};
pub use protocol::ObdProtocol;
pub use serial::SerialLink;

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
}
