//! Connection configuration
//!
//! Every protocol knob the engine honors, serde-derivable so upper layers
//! can persist it. Defaults match common Marlin-family firmware behavior.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved port name that selects the virtual printer
pub const VIRTUAL_PORT: &str = "VIRTUAL";

/// Baud rates tried during auto-detection, in order
pub const BAUDRATE_CANDIDATES: [u32; 7] = [115200, 250000, 230400, 57600, 38400, 19200, 9600];

/// Commands whose arguments must not be uppercased
pub const DEFAULT_UPPERCASE_BLACKLIST: [&str; 2] = ["M117", "M118"];

/// Baud rate selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BaudRate {
    /// Cycle through [`BAUDRATE_CANDIDATES`] until the printer answers
    #[default]
    Auto,
    /// Use a fixed rate
    Fixed(u32),
}

/// A user-defined feedback rule: lines matching `regex` are rendered
/// through `template` and dispatched as registered messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackControl {
    /// Name reported with the rendered message
    pub name: String,
    /// Regular expression matched against incoming lines
    pub regex: String,
    /// Template rendered with the match's capture groups; `{0}`, `{1}`
    /// for positional groups or `{name}` for named groups
    pub template: String,
}

/// Events that can have a G-code script attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScriptEvent {
    /// After the handshake completes
    Connect,
    /// Before the connection closes
    Disconnect,
    /// Before the first job line
    PrintStart,
    /// After the last job line was acknowledged
    PrintDone,
    /// When a print is cancelled
    PrintCancel,
    /// When a print is paused
    PrintPause,
    /// When a print is resumed
    PrintResume,
    /// Before a tool change
    ToolChangeBefore,
    /// After a tool change
    ToolChangeAfter,
}

/// Named G-code scripts with template placeholders
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcodeScripts {
    scripts: BTreeMap<ScriptEvent, String>,
}

impl GcodeScripts {
    /// Create an empty script set
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the script for an event, if configured
    pub fn get(&self, event: ScriptEvent) -> Option<&str> {
        self.scripts.get(&event).map(String::as_str)
    }

    /// Set the script for an event; an empty string removes it
    pub fn set(&mut self, event: ScriptEvent, script: impl Into<String>) {
        let script = script.into();
        if script.trim().is_empty() {
            self.scripts.remove(&event);
        } else {
            self.scripts.insert(event, script);
        }
    }
}

/// Configuration for one printer connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Port name, or [`VIRTUAL_PORT`]
    pub port: String,
    /// Baud rate selection
    pub baud: BaudRate,
    /// Transport read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Transport write timeout in milliseconds; expiry is fatal
    pub write_timeout_ms: u64,
    /// Window without incoming data before a heartbeat is sent
    pub communication_timeout_ms: u64,
    /// Interval between temperature polls while connected
    pub temperature_poll_interval_ms: u64,
    /// Interval between `M27` polls during an SD-resident print
    pub sd_poll_interval_ms: u64,
    /// Capacity of the send-now queue; overflow drops the oldest entry
    pub send_now_queue_size: usize,
    /// Number of checksummed sends retained for answering resends
    pub history_size: usize,
    /// Always attach line numbers and checksums, even to live commands
    pub always_send_checksum: bool,
    /// Tear down the connection on non-recoverable firmware errors
    pub disconnect_on_errors: bool,
    /// Log non-recoverable firmware errors and carry on
    pub ignore_errors: bool,
    /// Hold the handshake until a `start` line arrives
    pub wait_for_start_on_connect: bool,
    /// Forward `M112` immediately, bypassing the send credit
    pub support_m112: bool,
    /// Honor `busy:` lines by extending command timeouts
    pub busy_protocol: bool,
    /// Ask the firmware to auto-report temperatures when capable
    pub enable_autoreport: bool,
    /// Expose the virtual printer in port discovery
    pub dev_mode: bool,
    /// Whether `G90`/`G91` also switch the extruder mode
    pub g90_influences_extruder: bool,
    /// Uppercase the first word of outgoing commands
    pub uppercase_outgoing: bool,
    /// Commands exempt from uppercasing
    pub uppercase_blacklist: Vec<String>,
    /// User-defined regex feedback rules
    pub feedback_controls: Vec<FeedbackControl>,
    /// Named event scripts
    pub scripts: GcodeScripts,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: BaudRate::Auto,
            read_timeout_ms: 50,
            write_timeout_ms: 10_000,
            communication_timeout_ms: 5_000,
            temperature_poll_interval_ms: 5_000,
            sd_poll_interval_ms: 1_000,
            send_now_queue_size: 50,
            history_size: 50,
            always_send_checksum: false,
            disconnect_on_errors: true,
            ignore_errors: false,
            wait_for_start_on_connect: false,
            support_m112: true,
            busy_protocol: true,
            enable_autoreport: true,
            dev_mode: false,
            g90_influences_extruder: false,
            uppercase_outgoing: false,
            uppercase_blacklist: DEFAULT_UPPERCASE_BLACKLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            feedback_controls: Vec::new(),
            scripts: GcodeScripts::new(),
        }
    }
}

impl ConnectionConfig {
    /// Configuration for a named port with defaults everywhere else
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Whether this configuration targets the virtual printer
    pub fn is_virtual(&self) -> bool {
        self.port == VIRTUAL_PORT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.baud, BaudRate::Auto);
        assert_eq!(config.history_size, 50);
        assert_eq!(config.communication_timeout_ms, 5_000);
        assert_eq!(config.uppercase_blacklist, vec!["M117", "M118"]);
    }

    #[test]
    fn test_scripts_roundtrip() {
        let mut scripts = GcodeScripts::new();
        scripts.set(ScriptEvent::PrintCancel, "M104 S0\nM140 S0");
        assert_eq!(scripts.get(ScriptEvent::PrintCancel), Some("M104 S0\nM140 S0"));
        scripts.set(ScriptEvent::PrintCancel, "");
        assert_eq!(scripts.get(ScriptEvent::PrintCancel), None);
    }

    #[test]
    fn test_config_serde() {
        let config = ConnectionConfig::for_port("VIRTUAL");
        let json = serde_json::to_string(&config).unwrap();
        let back: ConnectionConfig = serde_json::from_str(&json).unwrap();
        assert!(back.is_virtual());
    }
}
