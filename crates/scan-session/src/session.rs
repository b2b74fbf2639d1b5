//! Scan Session Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// One bounded interval of polling against a connected vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    /// Set exactly once, when the session closes
    pub end_time: Option<DateTime<Utc>>,
    /// VIN, or "unknown"
    pub vehicle_id: String,
    pub device_id: String,
    pub adapter: String,
    pub protocol: String,
    /// Parameter codes polled each tick
    pub selected_pids: Vec<String>,
    pub total_readings: u64,
    pub errors: u64,
    /// Running mean response time (ms)
    pub average_response_time_ms: f64,
    /// Consent oracle answer when the session started
    pub consent_verified: bool,
}

impl ScanSession {
    /// Open a session starting now
    pub fn start(
        vehicle_id: &str,
        device_id: &str,
        adapter: &str,
        protocol: &str,
        selected_pids: Vec<String>,
        consent_verified: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time: Utc::now(),
            end_time: None,
            vehicle_id: vehicle_id.to_string(),
            device_id: device_id.to_string(),
            adapter: adapter.to_string(),
            protocol: protocol.to_string(),
            selected_pids,
            total_readings: 0,
            errors: 0,
            average_response_time_ms: 0.0,
            consent_verified,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Count a successful reading and fold its latency into the mean
    pub fn record_reading(&mut self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let previous = self.total_readings as f64;
        self.total_readings += 1;
        self.average_response_time_ms =
            (self.average_response_time_ms * previous + latency_ms) / self.total_readings as f64;
    }

    /// Count a failed query
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Close the session; returns false if it was already closed
    pub fn close(&mut self, at: DateTime<Utc>) -> bool {
        if self.end_time.is_some() {
            warn!("Session {} already closed", self.id);
            return false;
        }
        self.end_time = Some(at);
        true
    }

    /// Wall-clock length of the session so far
    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }
}
