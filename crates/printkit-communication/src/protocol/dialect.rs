//! Firmware dialects
//!
//! The wire protocol varies slightly between firmware families. The
//! dialect is detected from the `M115` reply and turned into a set of
//! behavior flags consulted by the state machine.

use printkit_core::FirmwareInfo;

/// Supported firmware families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareDialect {
    /// Marlin (and close derivatives)
    #[default]
    Marlin,
    /// Repetier
    Repetier,
    /// Sprinter
    Sprinter,
    /// RepRapFirmware
    RepRapFirmware,
    /// Smoothieware
    Smoothieware,
    /// Klipper
    Klipper,
    /// Unknown/generic; treated like Marlin
    Unknown,
}

impl std::fmt::Display for FirmwareDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Marlin => write!(f, "Marlin"),
            Self::Repetier => write!(f, "Repetier"),
            Self::Sprinter => write!(f, "Sprinter"),
            Self::RepRapFirmware => write!(f, "RepRapFirmware"),
            Self::Smoothieware => write!(f, "Smoothieware"),
            Self::Klipper => write!(f, "Klipper"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

impl FirmwareDialect {
    /// Detect the dialect from a `FIRMWARE_NAME` value
    pub fn detect(firmware_name: &str) -> Self {
        let name = firmware_name.to_ascii_lowercase();
        if name.contains("repetier") {
            Self::Repetier
        } else if name.contains("reprapfirmware") || name.contains("reprap firmware") {
            Self::RepRapFirmware
        } else if name.contains("smoothie") {
            Self::Smoothieware
        } else if name.contains("klipper") {
            Self::Klipper
        } else if name.contains("sprinter") {
            Self::Sprinter
        } else if name.contains("marlin") {
            Self::Marlin
        } else {
            Self::Unknown
        }
    }
}

/// Behavior flags derived from the dialect and reported capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolDialect {
    /// The detected firmware family
    pub dialect: FirmwareDialect,
    /// Whether the firmware acks each replayed line with its own `ok`.
    /// Repetier historically acks once at the end of a replay burst.
    pub ok_after_resend: bool,
    /// Whether the firmware emits `busy:` keepalives while blocking
    pub busy_protocol: bool,
    /// Whether temperatures can be auto-reported (`M155`)
    pub autoreport_temp: bool,
    /// Whether SD status can be auto-reported
    pub autoreport_sd_status: bool,
    /// Whether emergency commands are parsed out of band
    pub emergency_parser: bool,
}

impl Default for ProtocolDialect {
    fn default() -> Self {
        Self {
            dialect: FirmwareDialect::default(),
            ok_after_resend: true,
            busy_protocol: false,
            autoreport_temp: false,
            autoreport_sd_status: false,
            emergency_parser: false,
        }
    }
}

impl ProtocolDialect {
    /// Derive the dialect flags from handshake data
    pub fn from_firmware_info(info: &FirmwareInfo) -> Self {
        let dialect = info
            .firmware_name()
            .map(FirmwareDialect::detect)
            .unwrap_or_default();
        Self {
            dialect,
            ok_after_resend: dialect != FirmwareDialect::Repetier,
            busy_protocol: info.capability("BUSY_PROTOCOL").unwrap_or(false)
                || matches!(dialect, FirmwareDialect::Marlin | FirmwareDialect::Klipper),
            autoreport_temp: info.autoreport_temp(),
            autoreport_sd_status: info.autoreport_sd_status(),
            emergency_parser: info.emergency_parser(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection() {
        assert_eq!(
            FirmwareDialect::detect("Marlin 2.0.7.2"),
            FirmwareDialect::Marlin
        );
        assert_eq!(
            FirmwareDialect::detect("Repetier_0.92"),
            FirmwareDialect::Repetier
        );
        assert_eq!(
            FirmwareDialect::detect("Smoothieware edge"),
            FirmwareDialect::Smoothieware
        );
        assert_eq!(
            FirmwareDialect::detect("Klipper v0.10"),
            FirmwareDialect::Klipper
        );
        assert_eq!(
            FirmwareDialect::detect("RepRapFirmware for Duet 2"),
            FirmwareDialect::RepRapFirmware
        );
        assert_eq!(FirmwareDialect::detect("Sprinter"), FirmwareDialect::Sprinter);
        assert_eq!(FirmwareDialect::detect("mystery"), FirmwareDialect::Unknown);
    }

    #[test]
    fn test_repetier_broken_resend() {
        let mut info = FirmwareInfo::new();
        info.values
            .insert("FIRMWARE_NAME".into(), "Repetier_0.92".into());
        let dialect = ProtocolDialect::from_firmware_info(&info);
        assert!(!dialect.ok_after_resend);
    }

    #[test]
    fn test_capabilities_feed_flags() {
        let mut info = FirmwareInfo::new();
        info.values
            .insert("FIRMWARE_NAME".into(), "Marlin 2.0".into());
        info.set_capability("AUTOREPORT_TEMP", true);
        info.set_capability("EMERGENCY_PARSER", true);
        let dialect = ProtocolDialect::from_firmware_info(&info);
        assert!(dialect.autoreport_temp);
        assert!(dialect.emergency_parser);
        assert!(dialect.ok_after_resend);
    }
}
