//! Event system for printer communication
//!
//! Provides:
//! - Event types mirroring the listener callbacks
//! - Event dispatcher for publishing events to subscribers

use crate::data::{PositionRecord, PrintProgress, SdFile, TemperatureRecord};
use crate::state::ConnectionState;
use tokio::sync::broadcast;

/// Printer event types
#[derive(Debug, Clone)]
pub enum PrinterEvent {
    /// Connection state changed
    StateChanged {
        /// The previous state.
        old: ConnectionState,
        /// The new state.
        new: ConnectionState,
    },
    /// Console-worthy traffic line
    Log(String),
    /// Temperatures updated
    TemperatureUpdate(TemperatureRecord),
    /// Position updated
    PositionUpdate(PositionRecord),
    /// Print/transfer progress changed
    Progress(PrintProgress),
    /// Z height of sent moves changed
    ZChange(f64),
    /// Firmware confirmed a file selection
    FileSelected {
        /// The selected file name.
        name: String,
        /// The reported size, if any.
        size: Option<u64>,
    },
    /// SD card availability changed
    SdStateChanged(bool),
    /// Fresh SD card listing
    SdFiles(Vec<SdFile>),
    /// Print finished
    PrintDone,
    /// Print cancelled
    PrintCancelled,
    /// Print failed
    PrintFailed(String),
    /// Handshake completed
    Connected {
        /// The port the connection was established on.
        port: String,
        /// The negotiated baud rate.
        baud: u32,
    },
    /// Connection closed
    Disconnected,
    /// Fatal error
    Error(String),
    /// A feedback control matched an incoming line
    RegisteredMessage {
        /// The name of the matching feedback control.
        name: String,
        /// The rendered template output.
        formatted: String,
    },
}

impl std::fmt::Display for PrinterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateChanged { old, new } => write!(f, "State: {} -> {}", old, new),
            Self::Log(line) => write!(f, "Log: {}", line),
            Self::TemperatureUpdate(_) => write!(f, "Temperature update"),
            Self::PositionUpdate(_) => write!(f, "Position update"),
            Self::Progress(p) => match p.completion {
                Some(c) => write!(f, "Progress: {:.1}%", c * 100.0),
                None => write!(f, "Progress"),
            },
            Self::ZChange(z) => write!(f, "Z: {:.3}", z),
            Self::FileSelected { name, .. } => write!(f, "File selected: {}", name),
            Self::SdStateChanged(ready) => write!(f, "SD card ready: {}", ready),
            Self::SdFiles(files) => write!(f, "SD listing: {} files", files.len()),
            Self::PrintDone => write!(f, "Print done"),
            Self::PrintCancelled => write!(f, "Print cancelled"),
            Self::PrintFailed(reason) => write!(f, "Print failed: {}", reason),
            Self::Connected { port, baud } => write!(f, "Connected to {} @ {}", port, baud),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Error(msg) => write!(f, "Error: {}", msg),
            Self::RegisteredMessage { name, formatted } => {
                write!(f, "{}: {}", name, formatted)
            }
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for printer events.
    tx: broadcast::Sender<PrinterEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Lagging or absent subscribers are not an error for the engine.
    pub fn publish(&self, event: PrinterEvent) {
        let _ = self.tx.send(event);
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
