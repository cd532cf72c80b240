//! Byte stream transport abstraction
//!
//! The engine talks to the printer through this trait and nothing else.
//! Implemented by the serial transport and by the virtual printer, which
//! is selected by the reserved port name `VIRTUAL`.

use crate::error::Result;

/// One-line byte stream to a printer
///
/// The transport performs no interpretation of the data. A read that times
/// out returns an empty buffer, never an error; a write that times out is
/// a fatal [`TransportError::WriteFailed`](crate::error::TransportError).
pub trait Transport: Send {
    /// Read one `\n`-terminated line, without the terminator.
    ///
    /// Blocks up to the configured read timeout and returns an empty
    /// buffer if no complete line arrived in time.
    fn readline(&mut self) -> Result<Vec<u8>>;

    /// Write one line. The implementation appends the terminator.
    fn write_line(&mut self, data: &[u8]) -> Result<()>;

    /// Change the baud rate on the open port.
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;

    /// The currently configured baud rate.
    fn baud_rate(&self) -> u32;

    /// The port name this transport is bound to.
    fn port_name(&self) -> &str;

    /// Close the transport. Further reads and writes fail.
    fn close(&mut self) -> Result<()>;
}
