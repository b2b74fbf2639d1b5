//! OBD-II Parameter Registry
//!
//! Defines the service 01 Parameter IDs (PIDs) the engine knows how to
//! decode. Each decode formula is a closed variant evaluated over the
//! ordered data bytes A, B, C, D.

use crate::mode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameter category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Engine,
    Transmission,
    Emissions,
    Fuel,
    Temperature,
    Pressure,
    Other,
}

/// Byte-to-value decode formula
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Formula {
    /// A
    Byte,
    /// A - offset
    ByteOffset(f64),
    /// A / divisor
    ByteScaled(f64),
    /// factor * A
    ByteMultiplied(f64),
    /// 100A / 255
    Percent,
    /// (A - 128) * 100 / 128
    SignedPercent,
    /// A / 2 - 64
    TimingAdvance,
    /// (256A + B) / divisor
    Word(f64),
}

impl Formula {
    /// Evaluate against the data bytes. Missing bytes count as zero.
    pub fn evaluate(&self, bytes: &[u8]) -> f64 {
        let byte = |i: usize| bytes.get(i).copied().map(f64::from).unwrap_or(0.0);
        let (a, b) = (byte(0), byte(1));
        match *self {
            Formula::Byte => a,
            Formula::ByteOffset(offset) => a - offset,
            Formula::ByteScaled(divisor) => a / divisor,
            Formula::ByteMultiplied(factor) => factor * a,
            Formula::Percent => 100.0 * a / 255.0,
            Formula::SignedPercent => (a - 128.0) * 100.0 / 128.0,
            Formula::TimingAdvance => a / 2.0 - 64.0,
            Formula::Word(divisor) => (256.0 * a + b) / divisor,
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Formula::Byte => write!(f, "A"),
            Formula::ByteOffset(offset) => write!(f, "A-{}", offset),
            Formula::ByteScaled(divisor) => write!(f, "A/{}", divisor),
            Formula::ByteMultiplied(factor) => write!(f, "{}A", factor),
            Formula::Percent => write!(f, "100A/255"),
            Formula::SignedPercent => write!(f, "(A-128)*100/128"),
            Formula::TimingAdvance => write!(f, "A/2-64"),
            Formula::Word(divisor) if divisor == 1.0 => write!(f, "256A+B"),
            Formula::Word(divisor) => write!(f, "(256A+B)/{}", divisor),
        }
    }
}

/// Definition of one diagnostic parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterDefinition {
    /// PID as two hex digits, e.g. "0C"
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub formula: Formula,
    pub valid_min: f64,
    pub valid_max: f64,
    pub category: Category,
}

impl ParameterDefinition {
    /// PID byte for this parameter
    pub fn pid(&self) -> Option<u8> {
        u8::from_str_radix(self.code, 16).ok()
    }

    /// Command text that queries this parameter
    pub fn command(&self) -> String {
        format!("{:02X}{}", mode::CURRENT_DATA, self.code)
    }

    /// Check a decoded value against the physical range
    pub fn in_range(&self, value: f64) -> bool {
        value >= self.valid_min && value <= self.valid_max
    }
}

const fn def(
    code: &'static str,
    name: &'static str,
    description: &'static str,
    unit: &'static str,
    formula: Formula,
    range: (f64, f64),
    category: Category,
) -> ParameterDefinition {
    ParameterDefinition {
        code,
        name,
        description,
        unit,
        formula,
        valid_min: range.0,
        valid_max: range.1,
        category,
    }
}

/// Built-in service 01 table, in registry order
pub const STANDARD_PIDS: &[ParameterDefinition] = &[
    def("04", "Calculated Engine Load", "Engine load as a percentage of peak torque", "%", Formula::Percent, (0.0, 100.0), Category::Engine),
    def("05", "Coolant Temperature", "Engine coolant temperature", "°C", Formula::ByteOffset(40.0), (-40.0, 215.0), Category::Temperature),
    def("06", "Short Term Fuel Trim B1", "Short term fuel trim, bank 1", "%", Formula::SignedPercent, (-100.0, 99.21875), Category::Fuel),
    def("07", "Long Term Fuel Trim B1", "Long term fuel trim, bank 1", "%", Formula::SignedPercent, (-100.0, 99.21875), Category::Fuel),
    def("0A", "Fuel Pressure", "Fuel rail gauge pressure", "kPa", Formula::ByteMultiplied(3.0), (0.0, 765.0), Category::Pressure),
    def("0B", "Intake Manifold Pressure", "Intake manifold absolute pressure", "kPa", Formula::Byte, (0.0, 255.0), Category::Pressure),
    def("0C", "Engine Speed", "Engine revolutions per minute", "rpm", Formula::Word(4.0), (0.0, 16383.75), Category::Engine),
    def("0D", "Vehicle Speed", "Vehicle road speed", "km/h", Formula::Byte, (0.0, 255.0), Category::Engine),
    def("0E", "Timing Advance", "Ignition timing advance before TDC", "°", Formula::TimingAdvance, (-64.0, 63.5), Category::Engine),
    def("0F", "Intake Air Temperature", "Intake air temperature", "°C", Formula::ByteOffset(40.0), (-40.0, 215.0), Category::Temperature),
    def("10", "Mass Air Flow", "Mass air flow sensor rate", "g/s", Formula::Word(100.0), (0.0, 655.35), Category::Engine),
    def("11", "Throttle Position", "Absolute throttle position", "%", Formula::Percent, (0.0, 100.0), Category::Engine),
    def("14", "O2 Sensor Voltage B1S1", "Oxygen sensor voltage, bank 1 sensor 1", "V", Formula::ByteScaled(200.0), (0.0, 1.275), Category::Emissions),
    def("1F", "Run Time Since Start", "Time since engine start", "s", Formula::Word(1.0), (0.0, 65535.0), Category::Other),
    def("21", "Distance With MIL On", "Distance travelled with malfunction indicator lamp on", "km", Formula::Word(1.0), (0.0, 65535.0), Category::Emissions),
    def("2F", "Fuel Level", "Fuel tank level input", "%", Formula::Percent, (0.0, 100.0), Category::Fuel),
    def("33", "Barometric Pressure", "Absolute barometric pressure", "kPa", Formula::Byte, (0.0, 255.0), Category::Pressure),
    def("42", "Control Module Voltage", "Control module supply voltage", "V", Formula::Word(1000.0), (0.0, 65.535), Category::Other),
    def("46", "Ambient Air Temperature", "Ambient air temperature", "°C", Formula::ByteOffset(40.0), (-40.0, 215.0), Category::Temperature),
    def("5C", "Engine Oil Temperature", "Engine oil temperature", "°C", Formula::ByteOffset(40.0), (-40.0, 215.0), Category::Temperature),
    def("5E", "Engine Fuel Rate", "Engine fuel consumption rate", "L/h", Formula::Word(20.0), (0.0, 3276.75), Category::Fuel),
];

/// Lookup table of parameter definitions
#[derive(Debug, Clone)]
pub struct ParameterRegistry {
    definitions: Vec<ParameterDefinition>,
}

impl ParameterRegistry {
    /// Registry holding the built-in table
    pub fn standard() -> Self {
        Self::new(STANDARD_PIDS.to_vec())
    }

    /// Registry over a caller-supplied table; the first definition wins on duplicate codes
    pub fn new(definitions: Vec<ParameterDefinition>) -> Self {
        Self { definitions }
    }

    /// Find a definition by code (case-insensitive)
    pub fn lookup(&self, code: &str) -> Option<&ParameterDefinition> {
        let code = code.trim();
        self.definitions
            .iter()
            .find(|d| d.code.eq_ignore_ascii_case(code))
    }

    /// All definitions in table order
    pub fn all(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for ParameterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_required_parameters_present() {
        let registry = ParameterRegistry::standard();
        for code in ["05", "0C", "0D", "11", "0F", "10", "2F", "42"] {
            assert!(registry.lookup(code).is_some(), "missing {}", code);
        }
    }

    #[test]
    fn test_codes_unique() {
        let codes: HashSet<_> = STANDARD_PIDS.iter().map(|d| d.code).collect();
        assert_eq!(codes.len(), STANDARD_PIDS.len());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ParameterRegistry::standard();
        let def = registry.lookup("0c").unwrap();
        assert_eq!(def.name, "Engine Speed");
        assert_eq!(def.command(), "010C");
        assert_eq!(def.pid(), Some(0x0C));
        assert!(registry.lookup("FF").is_none());
    }

    #[test]
    fn test_all_preserves_table_order() {
        let registry = ParameterRegistry::standard();
        let first: Vec<_> = registry.all().map(|d| d.code).collect();
        let again: Vec<_> = registry.all().map(|d| d.code).collect();
        assert_eq!(first, again);
        assert_eq!(first[0], "04");
    }

    #[test]
    fn test_formula_text() {
        assert_eq!(Formula::Word(4.0).to_string(), "(256A+B)/4");
        assert_eq!(Formula::ByteOffset(40.0).to_string(), "A-40");
        assert_eq!(Formula::Percent.to_string(), "100A/255");
    }

    #[test]
    fn test_formula_ranges_match_extremes() {
        // every formula's output over 0x00..=0xFF stays within its declared range
        for def in STANDARD_PIDS {
            for a in [0u8, 0xFF] {
                let value = def.formula.evaluate(&[a, a]);
                assert!(def.in_range(value), "{} out of range at {:02X}: {}", def.code, a, value);
            }
        }
    }

    #[test]
    fn test_rpm_formula() {
        // ((0x1A * 256) + 0x2B) / 4 = 1674.75
        let value = Formula::Word(4.0).evaluate(&[0x1A, 0x2B]);
        assert!((value - 1674.75).abs() < 0.01);
    }

    #[test]
    fn test_fuel_trim_formula() {
        assert!((Formula::SignedPercent.evaluate(&[0x80]) - 0.0).abs() < 0.01);
        assert!((Formula::SignedPercent.evaluate(&[0x90]) - 12.5).abs() < 0.01);
    }
}
