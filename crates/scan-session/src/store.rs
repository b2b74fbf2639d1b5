//! Persistence Sink

use crate::session::ScanSession;
use obd_protocol::Reading;

/// Where readings and sessions are written
///
/// Both calls are fire-and-forget: implementations handle their own
/// failures and must not block the polling loop for long.
pub trait ScanStore: Send + Sync {
    fn store_reading(&self, reading: &Reading);

    /// Called when a session starts and again when it closes
    fn store_scan_session(&self, session: &ScanSession);
}
