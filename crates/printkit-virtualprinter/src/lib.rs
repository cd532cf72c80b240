//! # Printkit Virtual Printer
//!
//! An in-process simulator of Marlin-family firmware, speaking the same
//! byte-stream interface as the serial transport. Selected by the reserved
//! port name `VIRTUAL`. Used as a stand-in for a real printer in tests and
//! development.
//!
//! Simulates:
//! - The reset banner, `ok`/`busy:` flow and `wait`-free acking
//! - Per-heater closed-loop temperatures with first-order relaxation
//! - Line-number/checksum validation with `Resend:` + `Error:` emission
//! - A directory-backed SD card with throttled playback
//! - EEPROM persistence over a JSON file
//! - Fault injection through the `!!DEBUG` channel

mod debug;
mod dispatch;
mod eeprom;
mod heaters;
mod sdcard;

pub use debug::{DebugCommand, DebugState};
pub use eeprom::{Eeprom, EEPROM_COMMANDS};
pub use heaters::SimHeater;
pub use sdcard::VirtualSdCard;

use printkit_core::error::{Result, TransportError};
use printkit_core::Transport;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Configuration of the simulated printer
#[derive(Debug, Clone)]
pub struct VirtualPrinterSettings {
    /// Lines emitted when the port opens
    pub reset_lines: Vec<String>,
    /// Firmware name reported by `M115`
    pub firmware_name: String,
    /// Machine type reported by `M115`
    pub machine_type: String,
    /// Number of simulated extruders
    pub extruder_count: u8,
    /// Whether a heated bed is present
    pub has_bed: bool,
    /// Whether a heated chamber is present
    pub has_chamber: bool,
    /// Ambient temperature heaters relax toward when off
    pub ambient_temperature: f64,
    /// Heater relaxation rate (fraction of remaining delta per second)
    pub heatup_rate: f64,
    /// Interval between `busy:` lines while blocking
    pub busy_interval: Duration,
    /// Interval between temperature progress lines during heat-up
    pub heatup_report_interval: Duration,
    /// Read timeout before `readline` returns empty
    pub read_timeout: Duration,
    /// Directory backing the virtual SD card; `None` means no card
    pub sd_folder: Option<PathBuf>,
    /// Seconds per line consumed during SD playback
    pub sd_throttle: Duration,
    /// Path of the EEPROM JSON file; `None` keeps settings in memory only
    pub eeprom_path: Option<PathBuf>,
    /// `M114` reply format; `{x}`, `{y}`, `{z}`, `{e}` are substituted
    pub m114_format: String,
    /// Capabilities reported after `M115`
    pub capabilities: Vec<(String, bool)>,
}

impl Default for VirtualPrinterSettings {
    fn default() -> Self {
        Self {
            reset_lines: vec![
                "start".to_string(),
                "Marlin Virtual Printer 1.0".to_string(),
                "\u{0}".to_string(),
                "SD card ok".to_string(),
            ],
            firmware_name: "Marlin 2.0.7.2 (Virtual)".to_string(),
            machine_type: "Virtual Printer".to_string(),
            extruder_count: 1,
            has_bed: true,
            has_chamber: false,
            ambient_temperature: 21.3,
            heatup_rate: 0.5,
            busy_interval: Duration::from_secs(2),
            heatup_report_interval: Duration::from_secs(1),
            read_timeout: Duration::from_millis(50),
            sd_folder: None,
            sd_throttle: Duration::from_millis(10),
            eeprom_path: None,
            m114_format: "X:{x} Y:{y} Z:{z} E:{e} Count X:{x} Y:{y} Z:{z}".to_string(),
            capabilities: vec![
                ("AUTOREPORT_TEMP".to_string(), true),
                ("AUTOREPORT_SD_STATUS".to_string(), true),
                ("EMERGENCY_PARSER".to_string(), true),
            ],
        }
    }
}

/// A blocking operation whose `ok` is deferred
#[derive(Debug, Clone, Copy, PartialEq)]
enum PendingOk {
    DwellUntil(Duration),
    HeatupTool(u8),
    HeatupBed,
    HeatupChamber,
}

/// The virtual printer
///
/// Implements [`Transport`]; the host cannot tell it from a serial port.
pub struct VirtualPrinter {
    settings: VirtualPrinterSettings,
    base: Instant,
    manual_offset: Duration,
    baud: u32,
    outgoing: VecDeque<String>,
    expected_line: u32,
    tools: Vec<SimHeater>,
    bed: Option<SimHeater>,
    chamber: Option<SimHeater>,
    current_tool: u8,
    last_sim_step: Duration,
    autoreport_interval: Option<Duration>,
    last_autoreport: Duration,
    last_busy: Duration,
    last_heatup_report: Duration,
    pos: [f64; 4],
    feedrate: f64,
    relative: bool,
    extruder_relative: bool,
    pending_ok: Option<PendingOk>,
    sd: VirtualSdCard,
    eeprom: Eeprom,
    debug: DebugState,
    rng: StdRng,
    killed: bool,
    closed: bool,
}

impl VirtualPrinter {
    /// Create a virtual printer with the given settings and emit the reset
    /// sequence
    pub fn new(settings: VirtualPrinterSettings) -> Self {
        let ambient = settings.ambient_temperature;
        let tools = (0..settings.extruder_count.max(1))
            .map(|_| SimHeater::new(ambient))
            .collect();
        let bed = settings.has_bed.then(|| SimHeater::new(ambient));
        let chamber = settings.has_chamber.then(|| SimHeater::new(ambient));
        let sd = VirtualSdCard::new(settings.sd_folder.clone(), settings.sd_throttle);
        let eeprom = Eeprom::new(settings.eeprom_path.clone());

        let mut printer = Self {
            base: Instant::now(),
            manual_offset: Duration::ZERO,
            baud: 115_200,
            outgoing: VecDeque::new(),
            expected_line: 0,
            tools,
            bed,
            chamber,
            current_tool: 0,
            last_sim_step: Duration::ZERO,
            autoreport_interval: None,
            last_autoreport: Duration::ZERO,
            last_busy: Duration::ZERO,
            last_heatup_report: Duration::ZERO,
            pos: [0.0; 4],
            feedrate: 0.0,
            relative: false,
            extruder_relative: false,
            pending_ok: None,
            sd,
            eeprom,
            debug: DebugState::default(),
            rng: StdRng::seed_from_u64(0x7072_696e),
            killed: false,
            closed: false,
            settings,
        };
        for line in printer.settings.reset_lines.clone() {
            printer.outgoing.push_back(line);
        }
        printer
    }

    /// Create a virtual printer with default settings
    pub fn with_defaults() -> Self {
        Self::new(VirtualPrinterSettings::default())
    }

    /// Current simulated time
    fn now(&self) -> Duration {
        self.base.elapsed() + self.manual_offset
    }

    /// Advance the simulated clock without sleeping. Tests use this to
    /// fast-forward heat-ups and SD playback deterministically.
    pub fn advance(&mut self, dt: Duration) {
        self.manual_offset += dt;
        self.sim_step();
    }

    /// Number of response lines currently queued to the host
    pub fn queued_lines(&self) -> usize {
        self.outgoing.len()
    }

    /// Read access to the armed debug faults
    pub fn debug_state(&self) -> &DebugState {
        &self.debug
    }

    /// Advance the simulation to the current time: heater dynamics,
    /// deferred `ok`s, busy lines, auto-reports, and SD playback.
    fn sim_step(&mut self) {
        let now = self.now();
        let dt = now.saturating_sub(self.last_sim_step);
        if dt > Duration::ZERO {
            let secs = dt.as_secs_f64();
            let rate = self.settings.heatup_rate;
            for tool in &mut self.tools {
                tool.step(secs, rate);
            }
            if let Some(bed) = &mut self.bed {
                bed.step(secs, rate);
            }
            if let Some(chamber) = &mut self.chamber {
                chamber.step(secs, rate);
            }
            self.last_sim_step = now;
        }

        if self.killed || self.debug.awol || self.debug.connection_dropped {
            return;
        }

        // Resolve deferred acks
        if let Some(pending) = self.pending_ok {
            let finished = match pending {
                PendingOk::DwellUntil(deadline) => now >= deadline,
                PendingOk::HeatupTool(n) => self
                    .tools
                    .get(n as usize)
                    .is_some_and(|tool| tool.at_target()),
                PendingOk::HeatupBed => self.bed.as_ref().is_some_and(|b| b.at_target()),
                PendingOk::HeatupChamber => self.chamber.as_ref().is_some_and(|c| c.at_target()),
            };
            if finished {
                self.pending_ok = None;
                self.outgoing.push_back("ok".to_string());
            } else {
                if now.saturating_sub(self.last_busy) >= self.settings.busy_interval {
                    self.last_busy = now;
                    self.outgoing.push_back("busy: processing".to_string());
                }
                let is_heatup = !matches!(pending, PendingOk::DwellUntil(_));
                if is_heatup
                    && now.saturating_sub(self.last_heatup_report)
                        >= self.settings.heatup_report_interval
                {
                    self.last_heatup_report = now;
                    let report = self.render_temperatures(false);
                    self.outgoing.push_back(report);
                }
            }
        }

        // Temperature auto-report
        if let Some(interval) = self.autoreport_interval {
            if now.saturating_sub(self.last_autoreport) >= interval {
                self.last_autoreport = now;
                let report = self.render_temperatures(false);
                self.outgoing.push_back(report);
            }
        }

        // SD playback
        if self.sd.step(now) {
            self.outgoing.push_back("Done printing file".to_string());
        }
    }

    /// Render the temperature report, optionally prefixed with `ok`
    fn render_temperatures(&self, with_ok: bool) -> String {
        let mut out = String::new();
        if with_ok {
            out.push_str("ok ");
        }
        let current = &self.tools[self.current_tool as usize % self.tools.len()];
        out.push_str(&format!("T:{:.2} /{:.2}", current.current, current.target));
        if self.tools.len() > 1 {
            for (index, tool) in self.tools.iter().enumerate() {
                out.push_str(&format!(
                    " T{}:{:.2} /{:.2}",
                    index, tool.current, tool.target
                ));
            }
        }
        if let Some(bed) = &self.bed {
            out.push_str(&format!(" B:{:.2} /{:.2}", bed.current, bed.target));
        }
        if let Some(chamber) = &self.chamber {
            out.push_str(&format!(" C:{:.2} /{:.2}", chamber.current, chamber.target));
        }
        out.push_str(" @:0 B@:0");
        out
    }

    /// Process one line from the host
    fn process_line(&mut self, text: &str) {
        if self.debug.interpret(text) != DebugCommand::NotDebug {
            return;
        }
        if self.killed || self.debug.awol {
            return;
        }

        // Latched before dispatch so a framed debug command that arms the
        // flag does not swallow its own ack
        let drop_this_answer = self.debug.drop_next_answer;

        let mut responses = Vec::new();
        self.handle_line(text, &mut responses);

        if drop_this_answer && !responses.is_empty() {
            self.debug.drop_next_answer = false;
            tracing::debug!("virtual printer dropping answer to: {}", text);
            return;
        }
        self.outgoing.extend(responses);
    }

    /// Validate framing, then dispatch the payload
    fn handle_line(&mut self, text: &str, responses: &mut Vec<String>) {
        // Streaming upload: everything except M29 goes to the card
        // verbatim. The closing M29 may arrive framed.
        if self.sd.is_writing() {
            let (lineno, payload) = split_line_number(text);
            let (body, _) = split_checksum(payload);
            let body = body.trim();
            if body == "M29" || body.starts_with("M29 ") {
                if let Some(n) = lineno {
                    self.expected_line = n + 1;
                }
                self.sd.end_write();
                responses.push("Done saving file".to_string());
                responses.push("ok".to_string());
            } else {
                // Framed lines are stored without their framing
                if lineno.is_some() {
                    self.sd.write_line(body);
                    self.expected_line = lineno.unwrap_or(0) + 1;
                } else {
                    self.sd.write_line(text);
                }
                responses.push("ok".to_string());
            }
            return;
        }

        let (lineno, payload) = split_line_number(text);
        let payload = match lineno {
            Some(n) => {
                let (body, checksum) = split_checksum(payload);
                let command_is_m110 = body.trim_start().starts_with("M110");

                match checksum {
                    None => {
                        self.emit_resend(
                            responses,
                            &format!(
                                "No Checksum with line number, Last Line: {}",
                                self.expected_line.saturating_sub(1)
                            ),
                            self.expected_line,
                        );
                        return;
                    }
                    Some(given) => {
                        let framed = &text[..text.rfind('*').unwrap_or(text.len())];
                        if xor_checksum(framed.as_bytes()) != given {
                            self.emit_resend(
                                responses,
                                &format!(
                                    "checksum mismatch, Last Line: {}",
                                    self.expected_line.saturating_sub(1)
                                ),
                                self.expected_line,
                            );
                            return;
                        }
                    }
                }

                if !command_is_m110 {
                    if self.take_injected_fault(n, responses) {
                        return;
                    }
                    if n != self.expected_line {
                        self.emit_resend(
                            responses,
                            &format!(
                                "Line Number is not Last Line Number+1, Last Line: {}",
                                self.expected_line.saturating_sub(1)
                            ),
                            self.expected_line,
                        );
                        return;
                    }
                    self.expected_line = n + 1;
                }
                body
            }
            None => payload,
        };

        self.dispatch(payload.trim(), responses);
    }

    /// Fire any armed fault for line `n`; returns `true` when one fired
    fn take_injected_fault(&mut self, n: u32, responses: &mut Vec<String>) -> bool {
        if self.debug.lineno_mismatch_at == Some(n) {
            self.debug.lineno_mismatch_at = None;
            self.emit_resend(
                responses,
                &format!("Line Number is not Last Line Number+1, Last Line: {}", n.saturating_sub(1)),
                n,
            );
            return true;
        }
        if self.debug.checksum_mismatch_at == Some(n) {
            self.debug.checksum_mismatch_at = None;
            self.emit_resend(
                responses,
                &format!("checksum mismatch, Last Line: {}", n.saturating_sub(1)),
                n,
            );
            return true;
        }
        if self.debug.missing_lineno_at == Some(n) {
            self.debug.missing_lineno_at = None;
            self.emit_resend(
                responses,
                &format!("No Checksum with line number, Last Line: {}", n.saturating_sub(1)),
                n,
            );
            return true;
        }
        if self.debug.resend_ratio > 0
            && self.rng.gen_range(0..100u8) < self.debug.resend_ratio
        {
            self.emit_resend(
                responses,
                &format!("Line Number is not Last Line Number+1, Last Line: {}", n.saturating_sub(1)),
                n,
            );
            return true;
        }
        false
    }

    fn emit_resend(&mut self, responses: &mut Vec<String>, error: &str, resend_n: u32) {
        responses.push(format!("Error:{}", error));
        responses.push(format!("Resend: {}", resend_n));
        responses.push("ok".to_string());
    }
}

impl Transport for VirtualPrinter {
    fn readline(&mut self) -> Result<Vec<u8>> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        if self.debug.connection_dropped {
            return Err(TransportError::ReadFailed {
                reason: "virtual connection dropped".to_string(),
            }
            .into());
        }
        let deadline = Instant::now() + self.settings.read_timeout;
        loop {
            self.sim_step();
            if let Some(line) = self.outgoing.pop_front() {
                return Ok(line.into_bytes());
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn write_line(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        if self.debug.connection_dropped {
            return Err(TransportError::WriteFailed {
                reason: "virtual connection dropped".to_string(),
            }
            .into());
        }
        let text = String::from_utf8_lossy(data).trim_end().to_string();
        if !text.is_empty() {
            self.process_line(&text);
        }
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.baud = baud;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud
    }

    fn port_name(&self) -> &str {
        printkit_core::VIRTUAL_PORT
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.outgoing.clear();
        Ok(())
    }
}

/// XOR of all bytes, as used by the line checksum protocol
fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Split a leading `N<digits> ` prefix off a line
fn split_line_number(text: &str) -> (Option<u32>, &str) {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix('N') {
        let digits: &str = rest.split(|c: char| !c.is_ascii_digit()).next().unwrap_or("");
        if !digits.is_empty() {
            if let Ok(n) = digits.parse() {
                return (Some(n), rest[digits.len()..].trim_start());
            }
        }
    }
    (None, trimmed)
}

/// Split a trailing `*<checksum>` off a payload
fn split_checksum(payload: &str) -> (&str, Option<u8>) {
    match payload.rsplit_once('*') {
        Some((body, checksum)) => match checksum.trim().parse() {
            Ok(value) => (body, Some(value)),
            Err(_) => (payload, None),
        },
        None => (payload, None),
    }
}
