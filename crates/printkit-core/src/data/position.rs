//! Position records
//!
//! Last reported axis positions. All fields optional; copy-from semantics
//! replace only keys present in the source.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last known position as reported by the firmware (`M114` replies) or
/// tracked from sent moves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// X axis position
    pub x: Option<f64>,
    /// Y axis position
    pub y: Option<f64>,
    /// Z axis position
    pub z: Option<f64>,
    /// Extruder position (single-extruder reports)
    pub e: Option<f64>,
    /// Per-extruder positions (RepRapFirmware `E0:.. E1:..` reports)
    pub extruders: BTreeMap<u8, f64>,
    /// Feedrate
    pub f: Option<f64>,
    /// Active tool
    pub tool: Option<u8>,
}

impl PositionRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy present keys from `other` into this record, leaving absent
    /// keys untouched
    pub fn copy_from(&mut self, other: &PositionRecord) {
        if other.x.is_some() {
            self.x = other.x;
        }
        if other.y.is_some() {
            self.y = other.y;
        }
        if other.z.is_some() {
            self.z = other.z;
        }
        if other.e.is_some() {
            self.e = other.e;
        }
        if other.f.is_some() {
            self.f = other.f;
        }
        if other.tool.is_some() {
            self.tool = other.tool;
        }
        for (idx, value) in &other.extruders {
            self.extruders.insert(*idx, *value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_from_replaces_only_present_keys() {
        let mut record = PositionRecord {
            x: Some(1.0),
            y: Some(2.0),
            z: Some(3.0),
            ..Default::default()
        };
        let update = PositionRecord {
            z: Some(3.2),
            e: Some(40.0),
            ..Default::default()
        };
        record.copy_from(&update);
        assert_eq!(record.x, Some(1.0));
        assert_eq!(record.y, Some(2.0));
        assert_eq!(record.z, Some(3.2));
        assert_eq!(record.e, Some(40.0));
    }
}
