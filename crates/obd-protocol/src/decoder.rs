//! Reading Decoder
//!
//! Turns a raw adapter response for one parameter into a [`Reading`].

use crate::error::ObdError;
use crate::pid::{Category, ParameterDefinition, ParameterRegistry};
use crate::response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Vehicle identifier used when no VIN is known
pub const UNKNOWN_VEHICLE: &str = "unknown";

/// Per-reading metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingMetadata {
    /// Round trip time of the query (ms)
    pub response_time_ms: f64,
    /// Value fell outside the parameter's valid range
    pub out_of_range: bool,
}

/// One decoded parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Owning scan session, if any
    pub session_id: Option<Uuid>,
    pub vehicle_id: String,
    pub code: String,
    pub name: String,
    /// Payload bytes as uppercase hex
    pub raw_hex: String,
    pub value: f64,
    pub unit: String,
    pub category: Category,
    pub metadata: ReadingMetadata,
}

impl Reading {
    /// Attribute the reading to a session and vehicle
    pub fn for_session(mut self, session_id: Uuid, vehicle_id: &str) -> Self {
        self.session_id = Some(session_id);
        self.vehicle_id = vehicle_id.to_string();
        self
    }

    /// Response time of the query that produced this reading
    pub fn response_time(&self) -> Duration {
        Duration::from_secs_f64(self.metadata.response_time_ms.max(0.0) / 1000.0)
    }

    pub fn is_out_of_range(&self) -> bool {
        self.metadata.out_of_range
    }
}

/// Decoder for service 01 responses
#[derive(Debug, Clone)]
pub struct ReadingDecoder {
    registry: Arc<ParameterRegistry>,
}

impl ReadingDecoder {
    pub fn new(registry: Arc<ParameterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Decode `response` for parameter `code`
    ///
    /// Out-of-range values still produce a reading; the flag in its
    /// metadata is set instead.
    pub fn decode(
        &self,
        code: &str,
        response: &str,
        latency: Duration,
    ) -> Result<Reading, ObdError> {
        let definition = self
            .registry
            .lookup(code)
            .ok_or_else(|| ObdError::UnknownParameter(code.to_string()))?;

        let payload = data_bytes(definition, response)?;
        let value = definition.formula.evaluate(&payload);
        let out_of_range = !definition.in_range(value);

        debug!(
            "Decoded {} ({}) = {} {}",
            definition.code, definition.name, value, definition.unit
        );

        Ok(Reading {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: None,
            vehicle_id: UNKNOWN_VEHICLE.to_string(),
            code: definition.code.to_string(),
            name: definition.name.to_string(),
            raw_hex: hex::encode_upper(&payload),
            value,
            unit: definition.unit.to_string(),
            category: definition.category,
            metadata: ReadingMetadata {
                response_time_ms: latency.as_secs_f64() * 1000.0,
                out_of_range,
            },
        })
    }
}

/// Payload bytes with the `41 <pid>` response header removed, if present
fn data_bytes(definition: &ParameterDefinition, response: &str) -> Result<Vec<u8>, ObdError> {
    let header = crate::mode::CURRENT_DATA + 0x40;

    let mut bytes = match definition.pid() {
        Some(pid) => {
            let mut bytes =
                response::answer_payload(response, &definition.command(), &[header, pid])?;
            if bytes.len() >= 2 && bytes[0] == header && bytes[1] == pid {
                bytes.drain(..2);
            }
            bytes
        }
        None => response::first_payload(response)?,
    };

    if bytes.is_empty() {
        return Err(ObdError::MalformedResponse(format!(
            "no data bytes for {} in {:?}",
            definition.code, response
        )));
    }
    bytes.truncate(4);
    Ok(bytes)
}
