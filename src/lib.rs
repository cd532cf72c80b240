//! # Printkit
//!
//! A Rust serial communication engine for firmware-controlled FDM 3D
//! printers, with an in-process virtual printer for development and tests.
//!
//! ## Architecture
//!
//! Printkit is organized as a workspace with multiple crates:
//!
//! 1. **printkit-core** - Core types, traits, events, configuration
//! 2. **printkit-communication** - Serial transport, wire protocol,
//!    scheduling, SD workflow, connection state machine
//! 3. **printkit-virtualprinter** - Firmware simulator selected by the
//!    reserved `VIRTUAL` port
//! 4. **printkit** - This crate: re-exports plus a small console binary
//!
//! ## Features
//!
//! - **Multi-Firmware Support**: Marlin, Repetier, Sprinter,
//!   RepRapFirmware, Smoothieware, Klipper dialects
//! - **Robust Flow Control**: ok-driven send credit, resend replay with
//!   desync detection, busy/wait handling, heat-up waits
//! - **Job Sources**: local G-code streaming, SD streaming upload,
//!   SD-resident prints with polled progress
//! - **Virtual Printer**: full wire-protocol simulator with fault
//!   injection for development and tests

pub use printkit_communication::{
    list_ports, FeedbackMatcher, FirmwareDialect, FirmwareLine, HeaterModel, LocalGcodeJob,
    PrintJob, PrinterConnection, ProtocolDialect, ScriptContext, SdResidentPrintJob,
    SdStreamingUploadJob, SerialPortInfo, SerialTransport,
};

pub use printkit_core::{
    BaudRate, ConnectionConfig, ConnectionState, Error, EventDispatcher, FeedbackControl,
    FirmwareInfo, GcodeScripts, HeaterId, JobError, PositionRecord, PrintProgress, PrinterEvent,
    PrinterListener, PrinterListenerHandle, ProtocolError, Result, ScriptEvent, SdCardError,
    SdFile, TemperatureReading, TemperatureRecord, Transport, TransportError, VIRTUAL_PORT,
};

pub use printkit_virtualprinter::{VirtualPrinter, VirtualPrinterSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
