//! # Printkit Communication
//!
//! The printer serial communication engine: transport and port discovery,
//! the line-number/checksum wire protocol, reply parsers, command
//! scheduling and flow control, print job sources, the SD card workflow,
//! and the connection state machine that ties them together.

pub mod connection;
pub mod feedback;
pub mod heaters;
pub mod job;
pub mod protocol;
pub mod scripts;
pub mod sdcard;
pub mod transport;

pub use connection::PrinterConnection;
pub use feedback::FeedbackMatcher;
pub use heaters::{HeaterModel, SendEffects};
pub use job::{LocalGcodeJob, PrintJob, SdResidentPrintJob, SdStreamingUploadJob};
pub use protocol::{
    CommandScheduler, FirmwareDialect, FirmwareLine, ProtocolDialect, ScheduledSource, SendRecord,
    SentLine,
};
pub use scripts::ScriptContext;
pub use sdcard::SdCardState;
pub use transport::{list_ports, open_transport, SerialPortInfo, SerialTransport};
