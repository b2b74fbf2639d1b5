//! Engine Events

use crate::session::ScanSession;
use alerting::ReadingAlert;
use obd_protocol::{ObdError, Reading, VehicleInfo};
use serde::Serialize;

/// Capacity of the event broadcast channel
pub const EVENT_CAPACITY: usize = 256;

/// Non-fatal polling failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanFailure {
    pub session_id: uuid::Uuid,
    /// Parameter being polled when the failure happened
    pub code: String,
    pub error: ObdError,
}

/// Events published to the surrounding application
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ScanEvent {
    Discovered(VehicleInfo),
    ScanStarted(ScanSession),
    ReadingReceived(Reading),
    ReadingAlert(ReadingAlert),
    ScanStopped(ScanSession),
    ScanError(ScanFailure),
    AdapterDisconnected,
}
