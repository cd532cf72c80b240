//! Printer listener interface
//!
//! Defines the observer trait the engine calls on state changes. All
//! handlers are best-effort: panics and slow handlers must not stall the
//! IO task, so the engine invokes them from spawned tasks and logs and
//! swallows failures.

use crate::data::{PositionRecord, PrintProgress, SdFile, TemperatureRecord};
use crate::state::ConnectionState;
use async_trait::async_trait;

/// Handle for a registered printer listener.
///
/// Uniquely identifies a listener subscription. Can be used to unsubscribe
/// from printer events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrinterListenerHandle(pub String);

/// Listener trait for printer events
///
/// Implement this trait to receive notifications from a printer
/// connection. Every method has a default no-op implementation.
#[async_trait]
pub trait PrinterListener: Send + Sync {
    /// Called when the connection state changes
    async fn on_state_change(&self, _old: ConnectionState, _new: ConnectionState) {}

    /// Called for every line of traffic worth surfacing to a console
    async fn on_log(&self, _line: &str) {}

    /// Called after a temperature line was parsed
    async fn on_temperature_update(&self, _temps: &TemperatureRecord) {}

    /// Called after a position line was parsed
    async fn on_position_update(&self, _position: &PositionRecord) {}

    /// Called when print or transfer progress changes
    async fn on_progress(&self, _progress: &PrintProgress) {}

    /// Called when the Z height of sent moves changes
    async fn on_z_change(&self, _z: f64) {}

    /// Called when the firmware confirms a file selection
    async fn on_file_selected(&self, _name: &str, _size: Option<u64>) {}

    /// Called when SD card availability changes
    async fn on_sd_state_change(&self, _ready: bool) {}

    /// Called when a fresh SD card listing is available
    async fn on_sd_files(&self, _files: &[SdFile]) {}

    /// Called exactly once when a print finishes
    async fn on_print_done(&self) {}

    /// Called when a print is cancelled
    async fn on_print_cancelled(&self) {}

    /// Called when a print fails
    async fn on_print_failed(&self, _reason: &str) {}

    /// Called when the handshake completes
    async fn on_connected(&self, _port: &str, _baud: u32) {}

    /// Called when the connection closes
    async fn on_disconnected(&self) {}

    /// Called on a fatal error
    async fn on_error(&self, _message: &str) {}

    /// Called when a feedback control matched an incoming line
    async fn on_registered_message(&self, _name: &str, _formatted: &str) {}
}
