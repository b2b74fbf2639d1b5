//! Alert Manager Implementation

use obd_protocol::{ParameterDefinition, Reading};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Alert configuration
///
/// Thresholds are the distance outside the valid range, as a fraction of
/// the range's span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Deviation at which an alert becomes medium (default: 0.05)
    pub medium_threshold: f64,
    /// Deviation at which an alert becomes high (default: 0.15)
    pub high_threshold: f64,
    /// Deviation at which an alert becomes critical (default: 0.30)
    pub critical_threshold: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            medium_threshold: 0.05,
            high_threshold: 0.15,
            critical_threshold: 0.30,
        }
    }
}

/// Alert raised for an out-of-range reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingAlert {
    pub reading: Reading,
    pub message: String,
    pub severity: Severity,
}

/// Bookkeeping for one parameter code
#[derive(Debug, Clone)]
pub struct AlertState {
    /// Last time this parameter alerted
    pub last_fired: Instant,
    /// Number of alerts raised
    pub fire_count: usize,
    /// Whether the latest alert was acknowledged
    pub acknowledged: bool,
    /// Worst severity seen
    pub worst: Severity,
}

/// Raises one alert per out-of-range reading and tracks alert history
pub struct AlertManager {
    config: AlertConfig,
    states: HashMap<String, AlertState>,
    total: usize,
}

impl AlertManager {
    /// Create a new alert manager
    pub fn new(config: AlertConfig) -> Self {
        debug!("Creating alert manager with config: {:?}", config);
        Self {
            config,
            states: HashMap::new(),
            total: 0,
        }
    }

    /// Build an alert if `reading` lies outside `definition`'s valid range
    pub fn evaluate(
        &mut self,
        reading: &Reading,
        definition: &ParameterDefinition,
    ) -> Option<ReadingAlert> {
        if definition.in_range(reading.value) {
            return None;
        }

        let (direction, bound) = if reading.value < definition.valid_min {
            ("below", definition.valid_min)
        } else {
            ("above", definition.valid_max)
        };
        let severity = self.get_severity(reading.value, definition);
        let message = format!(
            "{} reading {:.2} {} is {} the valid range ({} to {} {}, limit {})",
            definition.name,
            reading.value,
            definition.unit,
            direction,
            definition.valid_min,
            definition.valid_max,
            definition.unit,
            bound
        );

        warn!("Reading alert [{}]: {}", severity, message);
        self.record_fire(&reading.code, severity);

        Some(ReadingAlert {
            reading: reading.clone(),
            message,
            severity,
        })
    }

    /// Grade how far `value` lies outside the valid range
    pub fn get_severity(&self, value: f64, definition: &ParameterDefinition) -> Severity {
        let span = (definition.valid_max - definition.valid_min).abs().max(f64::EPSILON);
        let distance = if value < definition.valid_min {
            definition.valid_min - value
        } else if value > definition.valid_max {
            value - definition.valid_max
        } else {
            0.0
        };
        let deviation = distance / span;

        if deviation >= self.config.critical_threshold {
            Severity::Critical
        } else if deviation >= self.config.high_threshold {
            Severity::High
        } else if deviation >= self.config.medium_threshold {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    fn record_fire(&mut self, code: &str, severity: Severity) {
        self.total += 1;

        let state = self.states.entry(code.to_string()).or_insert(AlertState {
            last_fired: Instant::now(),
            fire_count: 0,
            acknowledged: false,
            worst: severity,
        });

        state.last_fired = Instant::now();
        state.fire_count += 1;
        state.acknowledged = false;
        state.worst = state.worst.max(severity);
    }

    /// Acknowledge alerts for a parameter code
    pub fn acknowledge(&mut self, code: &str) -> bool {
        if let Some(state) = self.states.get_mut(code) {
            state.acknowledged = true;
            info!("Alerts acknowledged for {}", code);
            true
        } else {
            false
        }
    }

    /// Get pending (unacknowledged) alert states
    pub fn get_pending(&self) -> Vec<(&str, &AlertState)> {
        self.states
            .iter()
            .filter(|(_, state)| !state.acknowledged)
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }

    /// State for one parameter code
    pub fn state(&self, code: &str) -> Option<&AlertState> {
        self.states.get(code)
    }

    /// Total alerts raised
    pub fn total(&self) -> usize {
        self.total
    }

    /// Clear all alert states
    pub fn clear(&mut self) {
        self.states.clear();
        self.total = 0;
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::{ParameterRegistry, ReadingDecoder};
    use std::sync::Arc;
    use std::time::Duration;

    fn coolant_capped_at(max: f64) -> ParameterDefinition {
        let mut def = *ParameterRegistry::standard().lookup("05").unwrap();
        def.valid_max = max;
        def
    }

    fn reading(def: &ParameterDefinition, response: &str) -> Reading {
        let decoder = ReadingDecoder::new(Arc::new(ParameterRegistry::new(vec![*def])));
        decoder.decode(def.code, response, Duration::ZERO).unwrap()
    }

    #[test]
    fn test_in_range_reading_is_silent() {
        let def = coolant_capped_at(215.0);
        let mut manager = AlertManager::default();
        assert!(manager.evaluate(&reading(&def, "41 05 7B"), &def).is_none());
        assert_eq!(manager.total(), 0);
    }

    #[test]
    fn test_out_of_range_raises_one_alert() {
        let def = coolant_capped_at(100.0);
        let mut manager = AlertManager::default();

        // 0xFF - 40 = 215 °C
        let alert = manager.evaluate(&reading(&def, "41 05 FF"), &def).unwrap();
        assert!(alert.message.contains("Coolant Temperature"));
        assert!(alert.message.contains("above"));
        assert_eq!(alert.reading.code, "05");
        assert_eq!(manager.total(), 1);

        // repeated readings alert every time
        manager.evaluate(&reading(&def, "41 05 FF"), &def).unwrap();
        assert_eq!(manager.state("05").unwrap().fire_count, 2);
    }

    #[test]
    fn test_severity_levels() {
        let def = coolant_capped_at(100.0);
        let manager = AlertManager::default();
        // span is 140
        assert_eq!(manager.get_severity(101.0, &def), Severity::Low);
        assert_eq!(manager.get_severity(110.0, &def), Severity::Medium);
        assert_eq!(manager.get_severity(125.0, &def), Severity::High);
        assert_eq!(manager.get_severity(150.0, &def), Severity::Critical);
        assert_eq!(manager.get_severity(-90.0, &def), Severity::Critical);
    }

    #[test]
    fn test_acknowledgement() {
        let def = coolant_capped_at(100.0);
        let mut manager = AlertManager::default();
        manager.evaluate(&reading(&def, "41 05 FF"), &def);

        assert_eq!(manager.get_pending().len(), 1);
        assert!(manager.acknowledge("05"));
        assert!(manager.get_pending().is_empty());
        assert!(!manager.acknowledge("0C"));
    }
}
