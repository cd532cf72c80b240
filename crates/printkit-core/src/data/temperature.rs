//! Temperature records
//!
//! Heater identifiers, single readings, and the per-connection temperature
//! record. Reserved identifiers are `T`/`T0..Tn` (tools), `B` (bed) and
//! `C` (chamber); anything else lands in the custom submap.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a heater or temperature sensor
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HeaterId {
    /// Hotend / tool heater with index
    Tool(u8),
    /// Heated bed
    Bed,
    /// Heated chamber
    Chamber,
    /// Any other identifier reported by the firmware (e.g. `pS_XYZ`)
    Custom(String),
}

impl std::fmt::Display for HeaterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tool(n) => write!(f, "T{}", n),
            Self::Bed => write!(f, "B"),
            Self::Chamber => write!(f, "C"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// A single temperature reading
///
/// Target is `None` for sensor-only readings (no `/<target>` on the line).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Actual temperature in degrees Celsius
    pub actual: f64,
    /// Target temperature, if one was reported
    pub target: Option<f64>,
}

impl TemperatureReading {
    /// Create a reading with actual and target
    pub fn new(actual: f64, target: Option<f64>) -> Self {
        Self { actual, target }
    }
}

/// Temperature record for a connection
///
/// Maps heater id to its last successfully parsed reading. Mutated only by
/// the receive path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRecord {
    readings: BTreeMap<HeaterId, TemperatureReading>,
}

impl TemperatureRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the reading for a tool
    pub fn tool(&self, index: u8) -> Option<&TemperatureReading> {
        self.readings.get(&HeaterId::Tool(index))
    }

    /// Get the bed reading
    pub fn bed(&self) -> Option<&TemperatureReading> {
        self.readings.get(&HeaterId::Bed)
    }

    /// Get the chamber reading
    pub fn chamber(&self) -> Option<&TemperatureReading> {
        self.readings.get(&HeaterId::Chamber)
    }

    /// Get a reading by id
    pub fn get(&self, id: &HeaterId) -> Option<&TemperatureReading> {
        self.readings.get(id)
    }

    /// Insert or replace a reading
    pub fn set(&mut self, id: HeaterId, reading: TemperatureReading) {
        self.readings.insert(id, reading);
    }

    /// Merge another set of readings into this record
    pub fn merge(&mut self, readings: impl IntoIterator<Item = (HeaterId, TemperatureReading)>) {
        for (id, reading) in readings {
            self.readings.insert(id, reading);
        }
    }

    /// Iterate over all readings
    pub fn iter(&self) -> impl Iterator<Item = (&HeaterId, &TemperatureReading)> {
        self.readings.iter()
    }

    /// Number of known heaters/sensors
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Whether no readings have been recorded yet
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heater_id_display() {
        assert_eq!(HeaterId::Tool(0).to_string(), "T0");
        assert_eq!(HeaterId::Bed.to_string(), "B");
        assert_eq!(HeaterId::Chamber.to_string(), "C");
        assert_eq!(HeaterId::Custom("pS_XYZ".into()).to_string(), "pS_XYZ");
    }

    #[test]
    fn test_merge_replaces_existing() {
        let mut record = TemperatureRecord::new();
        record.set(HeaterId::Tool(0), TemperatureReading::new(20.0, None));
        record.merge([(HeaterId::Tool(0), TemperatureReading::new(210.0, Some(210.0)))]);
        assert_eq!(
            record.tool(0),
            Some(&TemperatureReading::new(210.0, Some(210.0)))
        );
    }
}
