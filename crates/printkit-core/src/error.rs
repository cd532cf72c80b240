//! Error handling for Printkit
//!
//! Provides error types for all layers of the engine:
//! - Transport errors (serial port / byte stream)
//! - Protocol errors (framing, resends, firmware replies)
//! - SD card errors (reported by the firmware during SD ops)
//! - Job errors (print job sources)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Transport error type
///
/// Represents OS-level I/O failures on the byte stream to the printer,
/// including open failures, timeouts on write, and unexpected closes.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Read failed at the OS level
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// The reason the read failed.
        reason: String,
    },

    /// Write failed or timed out; always fatal for the connection
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// Baud rate not supported by the port
    #[error("Baud rate {baud} not supported")]
    UnsupportedBaudRate {
        /// The unsupported baud rate.
        baud: u32,
    },

    /// No candidate baud rate produced a valid response
    #[error("Baud rate detection failed: no candidate produced a valid response")]
    BaudRateDetectionFailed,

    /// The transport was closed
    #[error("Transport closed")]
    Closed,

    /// Generic transport error
    #[error("Transport error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Protocol error type
///
/// Represents errors in the line-number/checksum protocol and in the
/// firmware's replies. Recoverable variants never tear down the connection.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Command requires live I/O but the connection is in the wrong state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was rejected.
        operation: String,
        /// The state the connection was in.
        state: String,
    },

    /// No response within the configured window
    #[error("Communication timeout after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Checksum or line-number mismatch; recovered via resend
    #[error("Communication error (recoverable): {line}")]
    CommunicationRecoverable {
        /// The offending line as received.
        line: String,
    },

    /// Resend requested beyond the send history; fatal
    #[error("Resend of line {requested} requested but history only reaches back to line {oldest}")]
    Desync {
        /// The line number the firmware requested.
        requested: u32,
        /// The oldest line number still held in the send record.
        oldest: u32,
    },

    /// The firmware demands checksummed lines but an unchecksummed send was attempted
    #[error("Firmware requires checksummed lines")]
    ChecksumRequired,

    /// A non-recoverable `Error:` line from the firmware
    #[error("Firmware error: {message}")]
    Firmware {
        /// The error message as reported by the firmware.
        message: String,
    },

    /// Command echoed back as unknown by the firmware
    #[error("Unknown command: {command}")]
    UnknownCommand {
        /// The command the firmware did not recognize.
        command: String,
    },

    /// Malformed line that could not be classified
    #[error("Protocol violation: {line}")]
    Violation {
        /// The unclassifiable line.
        line: String,
    },

    /// Generic protocol error
    #[error("Protocol error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// SD card error type
///
/// Reported by the firmware during SD operations. Surfaced to the upper
/// layer; never fatal for the connection.
#[derive(Error, Debug, Clone)]
pub enum SdCardError {
    /// No SD card initialized
    #[error("SD card not initialized")]
    NotInitialized,

    /// File not found on the card
    #[error("SD file not found: {name}")]
    FileNotFound {
        /// The name of the file that was not found.
        name: String,
    },

    /// Refusing to delete the currently selected print target
    #[error("Cannot delete {name}: file is selected for printing")]
    DeleteSelected {
        /// The name of the selected file.
        name: String,
    },

    /// A streaming upload is already in progress
    #[error("SD file transfer already in progress")]
    TransferInProgress,

    /// Generic SD error as reported by the firmware
    #[error("SD error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Print job error type
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// A job is already active
    #[error("A print job is already active")]
    AlreadyActive,

    /// No job to operate on
    #[error("No active print job")]
    NoJob,

    /// Failure reading the job's backing file
    #[error("Job file error: {reason}")]
    FileError {
        /// The reason for the file error.
        reason: String,
    },

    /// Generic job error
    #[error("Job error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Main error type for Printkit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// SD card error
    #[error(transparent)]
    SdCard(#[from] SdCardError),

    /// Job error
    #[error(transparent)]
    Job(#[from] JobError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::Timeout { .. }))
    }

    /// Check if this error tears down the connection
    ///
    /// Transport errors and desyncs are fatal; everything else is surfaced
    /// via events without disconnecting.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Protocol(ProtocolError::Desync { .. })
        )
    }

    /// Check if this is a transport error
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Check if this is an SD card error
    pub fn is_sd_error(&self) -> bool {
        matches!(self, Error::SdCard(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
