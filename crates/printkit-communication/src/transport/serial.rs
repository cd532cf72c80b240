//! Serial port transport
//!
//! Provides low-level serial port operations for direct hardware
//! connection to printer mainboards via USB or RS-232, plus port
//! enumeration and discovery.

use printkit_core::error::{Result, TransportError};
use printkit_core::{Transport, VIRTUAL_PORT};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }
}

/// List candidate printer ports
///
/// Filters the OS list to plausible printer device patterns:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
///
/// When `dev_mode` is set the reserved `VIRTUAL` port is appended, and a
/// `last_used` port is promoted to the head of the list.
pub fn list_ports(dev_mode: bool, last_used: Option<&str>) -> Result<Vec<SerialPortInfo>> {
    let mut infos: Vec<SerialPortInfo> = match serialport::available_ports() {
        Ok(ports) => ports
            .iter()
            .filter(|port| is_printer_port(&port.port_name))
            .map(|port| {
                let mut info = SerialPortInfo::new(&port.port_name, describe(port));
                if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                    info.vid = Some(usb.vid);
                    info.pid = Some(usb.pid);
                    info.manufacturer = usb.manufacturer.clone();
                    info.serial_number = usb.serial_number.clone();
                }
                info
            })
            .collect(),
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            return Err(TransportError::Other {
                message: format!("Failed to enumerate ports: {}", e),
            }
            .into());
        }
    };

    if dev_mode {
        infos.push(SerialPortInfo::new(VIRTUAL_PORT, "Virtual printer"));
    }

    if let Some(last) = last_used {
        if let Some(index) = infos.iter().position(|info| info.port_name == last) {
            let promoted = infos.remove(index);
            infos.insert(0, promoted);
        }
    }

    Ok(infos)
}

/// Check if a port name matches common printer mainboard patterns
fn is_printer_port(port_name: &str) -> bool {
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }
    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }
    false
}

/// Get a user-friendly description for a port
fn describe(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Serial transport over a real port
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    baud: u32,
    read_timeout: Duration,
    buffer: Vec<u8>,
    closed: bool,
}

impl SerialTransport {
    /// Open a port at the given baud rate
    ///
    /// The underlying port uses a short poll timeout; `readline`
    /// accumulates bytes until a full line or `read_timeout` elapses.
    pub fn open(
        name: &str,
        baud: u32,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self> {
        let port = serialport::new(name, baud)
            .timeout(Duration::from_millis(10).min(write_timeout))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", name, e);
                TransportError::FailedToOpen {
                    port: name.to_string(),
                    reason: e.to_string(),
                }
            })?;

        Ok(Self {
            port,
            name: name.to_string(),
            baud,
            read_timeout,
            buffer: Vec::new(),
            closed: false,
        })
    }

    /// Pull a complete line out of the accumulation buffer, if present
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

impl Transport for SerialTransport {
    fn readline(&mut self) -> Result<Vec<u8>> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        if let Some(line) = self.take_line() {
            return Ok(line);
        }

        let deadline = Instant::now() + self.read_timeout;
        let mut chunk = [0u8; 256];
        loop {
            match self.port.read(&mut chunk) {
                Ok(0) => {}
                Ok(read) => {
                    self.buffer.extend_from_slice(&chunk[..read]);
                    if let Some(line) = self.take_line() {
                        return Ok(line);
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    return Err(TransportError::ReadFailed {
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
        }
    }

    fn write_line(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        let write = |port: &mut Box<dyn serialport::SerialPort>| -> std::io::Result<()> {
            port.write_all(data)?;
            port.write_all(b"\n")?;
            port.flush()
        };
        write(&mut self.port).map_err(|e| {
            TransportError::WriteFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.port.set_baud_rate(baud).map_err(|e| TransportError::Other {
            message: format!("Failed to set baud rate {}: {}", baud, e),
        })?;
        self.baud = baud;
        self.buffer.clear();
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud
    }

    fn port_name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printer_port_patterns() {
        assert!(is_printer_port("COM3"));
        assert!(is_printer_port("/dev/ttyUSB0"));
        assert!(is_printer_port("/dev/ttyACM1"));
        assert!(is_printer_port("/dev/cu.usbmodem14201"));
        assert!(!is_printer_port("/dev/ttyS0"));
        assert!(!is_printer_port("COMX"));
    }

    #[test]
    fn test_virtual_port_injected_in_dev_mode() {
        if let Ok(ports) = list_ports(true, None) {
            assert!(ports.iter().any(|p| p.port_name == VIRTUAL_PORT));
        }
    }
}
