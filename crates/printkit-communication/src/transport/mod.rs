//! Transports
//!
//! The serial transport for real hardware, port discovery, and the
//! factory that swaps in the virtual printer when the reserved `VIRTUAL`
//! port is selected.

pub mod serial;

pub use serial::{list_ports, SerialPortInfo, SerialTransport};

use printkit_core::error::Result;
use printkit_core::{BaudRate, ConnectionConfig, Transport, BAUDRATE_CANDIDATES};
use printkit_virtualprinter::{VirtualPrinter, VirtualPrinterSettings};
use std::time::Duration;

/// Open the transport a configuration names
///
/// `VIRTUAL` yields the in-process virtual printer; anything else opens a
/// real serial port at the configured (or first candidate) baud rate.
pub fn open_transport(
    config: &ConnectionConfig,
    virtual_settings: Option<VirtualPrinterSettings>,
) -> Result<Box<dyn Transport>> {
    if config.is_virtual() {
        let mut settings = virtual_settings.unwrap_or_default();
        settings.read_timeout = Duration::from_millis(config.read_timeout_ms);
        return Ok(Box::new(VirtualPrinter::new(settings)));
    }

    let baud = match config.baud {
        BaudRate::Fixed(baud) => baud,
        BaudRate::Auto => BAUDRATE_CANDIDATES[0],
    };
    let transport = SerialTransport::open(
        &config.port,
        baud,
        Duration::from_millis(config.read_timeout_ms),
        Duration::from_millis(config.write_timeout_ms),
    )?;
    Ok(Box::new(transport))
}
