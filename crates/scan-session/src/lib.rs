//! OBD-II Scan Session Engine
//!
//! Connects to a vehicle through an adapter link, runs discovery, and
//! drives periodic polling of selected parameters inside bounded scan
//! sessions. Readings, alerts and lifecycle changes are published as
//! [`ScanEvent`]s and written to an injected [`ScanStore`].

mod config;
mod consent;
mod error;
mod events;
mod manager;
mod poller;
mod session;
mod store;

pub use config::{AdapterConfig, ScanConfig, ENV_PREFIX};
pub use consent::{ConsentOracle, StaticConsent};
pub use error::ScanError;
pub use events::{ScanEvent, ScanFailure, EVENT_CAPACITY};
pub use manager::{ConnectionState, ScanSessionManager, ScanState};
pub use session::ScanSession;
pub use store::ScanStore;
