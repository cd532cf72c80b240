//! Firmware information
//!
//! Key/value data parsed from `M115` replies plus the capability set
//! reported via `Cap:` lines.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Firmware information captured during the handshake
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    /// Key/value pairs from the `M115` reply (e.g. `FIRMWARE_NAME`,
    /// `MACHINE_TYPE`, `EXTRUDER_COUNT`)
    pub values: BTreeMap<String, String>,
    /// Capabilities from `Cap:<NAME>:<0|1>` lines
    pub capabilities: BTreeMap<String, bool>,
}

impl FirmwareInfo {
    /// Create an empty info record
    pub fn new() -> Self {
        Self::default()
    }

    /// The reported firmware name, if any
    pub fn firmware_name(&self) -> Option<&str> {
        self.values.get("FIRMWARE_NAME").map(String::as_str)
    }

    /// The reported machine type, if any
    pub fn machine_type(&self) -> Option<&str> {
        self.values.get("MACHINE_TYPE").map(String::as_str)
    }

    /// The reported extruder count, if any
    pub fn extruder_count(&self) -> Option<u8> {
        self.values
            .get("EXTRUDER_COUNT")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Look up a capability flag
    pub fn capability(&self, name: &str) -> Option<bool> {
        self.capabilities.get(name).copied()
    }

    /// Whether the firmware can auto-report temperatures (`M155`)
    pub fn autoreport_temp(&self) -> bool {
        self.capability("AUTOREPORT_TEMP").unwrap_or(false)
    }

    /// Whether the firmware can auto-report SD status
    pub fn autoreport_sd_status(&self) -> bool {
        self.capability("AUTOREPORT_SD_STATUS").unwrap_or(false)
    }

    /// Whether the firmware parses emergency commands out of band
    pub fn emergency_parser(&self) -> bool {
        self.capability("EMERGENCY_PARSER").unwrap_or(false)
    }

    /// Merge `M115` values into this record
    pub fn merge_values(&mut self, values: BTreeMap<String, String>) {
        self.values.extend(values);
    }

    /// Record one capability
    pub fn set_capability(&mut self, name: impl Into<String>, enabled: bool) {
        self.capabilities.insert(name.into(), enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let mut info = FirmwareInfo::new();
        info.values.insert(
            "FIRMWARE_NAME".into(),
            "Marlin 2.0.7.2 (Nov 27 2020 14:30:11)".into(),
        );
        info.values.insert("EXTRUDER_COUNT".into(), "2".into());
        info.set_capability("AUTOREPORT_TEMP", true);

        assert_eq!(
            info.firmware_name(),
            Some("Marlin 2.0.7.2 (Nov 27 2020 14:30:11)")
        );
        assert_eq!(info.extruder_count(), Some(2));
        assert!(info.autoreport_temp());
        assert!(!info.emergency_parser());
    }
}
