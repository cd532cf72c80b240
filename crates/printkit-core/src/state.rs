//! Connection state machine states
//!
//! Defines the lifecycle states of a printer connection, from port open
//! through baud detection and handshake to operational/printing and close.

use serde::{Deserialize, Serialize};

/// States of a printer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection
    #[default]
    Offline,
    /// Serial port is being opened
    OpenSerial,
    /// Cycling through baud rate candidates
    DetectBaudrate,
    /// Port open, handshake in progress
    Connecting,
    /// Handshake complete, idle and accepting commands
    Operational,
    /// A print job is streaming
    Printing,
    /// Print paused
    Paused,
    /// Print cancel in progress (queues draining to the cancel script)
    Cancelling,
    /// Streaming a file to the printer's SD card
    TransferringFile,
    /// Fatal error; connection torn down
    Error,
    /// Closed cleanly
    Closed,
    /// Closed because of an error
    ClosedWithError,
}

impl ConnectionState {
    /// Whether commands that require live I/O are accepted in this state
    pub fn accepts_commands(&self) -> bool {
        matches!(
            self,
            Self::Operational | Self::Printing | Self::Paused | Self::TransferringFile
        )
    }

    /// Whether a print job is active (streaming or paused)
    pub fn is_printing(&self) -> bool {
        matches!(self, Self::Printing | Self::Paused)
    }

    /// Whether the connection is in an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::ClosedWithError)
    }

    /// Whether the connection is closed or was never opened
    pub fn is_closed_or_offline(&self) -> bool {
        matches!(self, Self::Offline | Self::Closed | Self::ClosedWithError)
    }

    /// Whether connection setup (open/detect/handshake) is in progress
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::OpenSerial | Self::DetectBaudrate | Self::Connecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "Offline"),
            Self::OpenSerial => write!(f, "Opening serial port"),
            Self::DetectBaudrate => write!(f, "Detecting baudrate"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Operational => write!(f, "Operational"),
            Self::Printing => write!(f, "Printing"),
            Self::Paused => write!(f, "Paused"),
            Self::Cancelling => write!(f, "Cancelling"),
            Self::TransferringFile => write!(f, "Transferring file to SD"),
            Self::Error => write!(f, "Error"),
            Self::Closed => write!(f, "Connection closed"),
            Self::ClosedWithError => write!(f, "Closed with error"),
        }
    }
}
