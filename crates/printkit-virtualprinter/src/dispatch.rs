//! Command dispatch
//!
//! An explicit table from G-code to handler, plus a catch-all for `Tn`
//! tool selection. Unknown commands are echoed back the way Marlin does.

use crate::{PendingOk, VirtualPrinter};

impl VirtualPrinter {
    /// Dispatch one framed-and-validated command
    pub(crate) fn dispatch(&mut self, command: &str, responses: &mut Vec<String>) {
        if command.is_empty() {
            responses.push("ok".to_string());
            return;
        }

        let code = command.split_whitespace().next().unwrap_or("");
        let rest = command[code.len()..].trim();

        match code {
            code if code.starts_with("!!DEBUG") => {
                // Framed debug commands still need their ack so the host's
                // credit bookkeeping stays balanced
                self.debug.interpret(command);
                responses.push("ok".to_string());
            }
            "G0" | "G1" => self.handle_move(rest, responses),
            "G4" => self.handle_dwell(rest, responses),
            "G28" => {
                self.pos[0] = 0.0;
                self.pos[1] = 0.0;
                self.pos[2] = 0.0;
                responses.push("ok".to_string());
            }
            "G90" => {
                self.relative = false;
                self.extruder_relative = false;
                responses.push("ok".to_string());
            }
            "G91" => {
                self.relative = true;
                self.extruder_relative = true;
                responses.push("ok".to_string());
            }
            "G92" => {
                for (letter, value) in parse_params(rest) {
                    match letter {
                        'X' => self.pos[0] = value,
                        'Y' => self.pos[1] = value,
                        'Z' => self.pos[2] = value,
                        'E' => self.pos[3] = value,
                        _ => {}
                    }
                }
                responses.push("ok".to_string());
            }
            "M82" => {
                self.extruder_relative = false;
                responses.push("ok".to_string());
            }
            "M83" => {
                self.extruder_relative = true;
                responses.push("ok".to_string());
            }
            "M104" => {
                self.set_tool_target(rest);
                responses.push("ok".to_string());
            }
            "M109" => {
                let index = self.set_tool_target(rest);
                if self.tools[index as usize].target > 0.0 {
                    self.begin_blocking(PendingOk::HeatupTool(index));
                } else {
                    responses.push("ok".to_string());
                }
            }
            "M140" => {
                self.set_bed_target(rest);
                responses.push("ok".to_string());
            }
            "M190" => {
                self.set_bed_target(rest);
                if self.bed.as_ref().is_some_and(|b| b.target > 0.0) {
                    self.begin_blocking(PendingOk::HeatupBed);
                } else {
                    responses.push("ok".to_string());
                }
            }
            "M141" => {
                self.set_chamber_target(rest);
                responses.push("ok".to_string());
            }
            "M191" => {
                self.set_chamber_target(rest);
                if self.chamber.as_ref().is_some_and(|c| c.target > 0.0) {
                    self.begin_blocking(PendingOk::HeatupChamber);
                } else {
                    responses.push("ok".to_string());
                }
            }
            "M105" => {
                if self.pending_ok.is_some() {
                    // Blocking: report without acking, like a heat-up loop
                    responses.push(self.render_temperatures(false));
                } else {
                    responses.push(self.render_temperatures(true));
                }
            }
            "M110" => {
                let n = parse_params(rest)
                    .iter()
                    .find(|(letter, _)| *letter == 'N')
                    .map(|(_, value)| *value as u32)
                    .unwrap_or(0);
                self.expected_line = n + 1;
                responses.push("ok".to_string());
            }
            "M112" => {
                self.killed = true;
                self.outgoing.clear();
                responses.clear();
                self.outgoing
                    .push_back("Error:Printer halted. kill() called!".to_string());
            }
            "M114" => {
                let line = self
                    .settings
                    .m114_format
                    .replace("{x}", &format!("{:.2}", self.pos[0]))
                    .replace("{y}", &format!("{:.2}", self.pos[1]))
                    .replace("{z}", &format!("{:.2}", self.pos[2]))
                    .replace("{e}", &format!("{:.2}", self.pos[3]));
                responses.push(line);
                responses.push("ok".to_string());
            }
            "M115" => {
                responses.push(format!(
                    "FIRMWARE_NAME:{} SOURCE_CODE_URL:https://github.com/printkit/printkit \
                     PROTOCOL_VERSION:1.0 MACHINE_TYPE:{} EXTRUDER_COUNT:{}",
                    self.settings.firmware_name,
                    self.settings.machine_type,
                    self.settings.extruder_count
                ));
                for (name, enabled) in &self.settings.capabilities {
                    responses.push(format!("Cap:{}:{}", name, u8::from(*enabled)));
                }
                responses.push("ok".to_string());
            }
            "M117" => {
                responses.push("ok".to_string());
            }
            "M118" => {
                responses.push(rest.to_string());
                responses.push("ok".to_string());
            }
            "M155" => {
                let secs = parse_params(rest)
                    .iter()
                    .find(|(letter, _)| *letter == 'S')
                    .map(|(_, value)| *value)
                    .unwrap_or(0.0);
                self.autoreport_interval = if secs > 0.0 {
                    Some(std::time::Duration::from_secs_f64(secs))
                } else {
                    None
                };
                self.last_autoreport = self.now();
                responses.push("ok".to_string());
            }
            "M20" => {
                responses.push("Begin file list".to_string());
                for (name, size) in self.sd.list() {
                    responses.push(format!("{} {}", name, size));
                }
                responses.push("End file list".to_string());
                responses.push("ok".to_string());
            }
            "M21" => {
                if self.sd.init() {
                    responses.push("SD card ok".to_string());
                } else {
                    responses.push("SD init fail".to_string());
                }
                responses.push("ok".to_string());
            }
            "M22" => {
                self.sd.release();
                responses.push("ok".to_string());
            }
            "M23" => match self.sd.select(rest) {
                Some(size) => {
                    responses.push(format!(
                        "File opened: {} Size: {}",
                        self.sd.selected_name().unwrap_or(rest),
                        size
                    ));
                    responses.push("File selected".to_string());
                    responses.push("ok".to_string());
                }
                None => {
                    responses.push(format!("open failed, File: {}.", rest));
                    responses.push("ok".to_string());
                }
            },
            "M24" => {
                let now = self.now();
                self.sd.start_print(now);
                responses.push("ok".to_string());
            }
            "M25" => {
                self.sd.pause_print();
                responses.push("ok".to_string());
            }
            "M26" => {
                let pos = parse_params(rest)
                    .iter()
                    .find(|(letter, _)| *letter == 'S')
                    .map(|(_, value)| *value as u64)
                    .unwrap_or(0);
                self.sd.set_position(pos);
                responses.push("ok".to_string());
            }
            "M27" => {
                match self.sd.progress() {
                    Some((pos, size)) => {
                        responses.push(format!("SD printing byte {}/{}", pos, size));
                    }
                    None => responses.push("Not SD printing".to_string()),
                }
                responses.push("ok".to_string());
            }
            "M28" => {
                if self.sd.begin_write(rest) {
                    responses.push(format!("Writing to file: {}", rest));
                } else {
                    responses.push(format!("open failed, File: {}.", rest));
                }
                responses.push("ok".to_string());
            }
            "M29" => {
                // M29 outside an upload: nothing to close
                responses.push("ok".to_string());
            }
            "M30" => {
                if self.sd.delete(rest) {
                    responses.push(format!("File deleted: {}", rest));
                } else {
                    responses.push(format!("Deletion failed, File: {}.", rest));
                }
                responses.push("ok".to_string());
            }
            "M220" | "M221" => {
                responses.push("ok".to_string());
            }
            "M500" => {
                match self.eeprom.save() {
                    Ok(()) => responses.push("echo:Settings Stored".to_string()),
                    Err(e) => responses.push(format!("Error:EEPROM write failed: {}", e)),
                }
                responses.push("ok".to_string());
            }
            "M501" => {
                match self.eeprom.load() {
                    Ok(()) => responses.push("echo:Settings Retrieved".to_string()),
                    Err(e) => responses.push(format!("Error:EEPROM read failed: {}", e)),
                }
                responses.push("ok".to_string());
            }
            "M502" => {
                self.eeprom.reset_to_defaults();
                responses.push("echo:Hardcoded Default Settings Loaded".to_string());
                responses.push("ok".to_string());
            }
            "M503" => {
                responses.extend(self.eeprom.report());
                responses.push("ok".to_string());
            }
            code if crate::EEPROM_COMMANDS.contains(&code) => {
                self.eeprom.apply(code, &parse_params(rest));
                responses.push("ok".to_string());
            }
            code if code.starts_with('T') => {
                match code[1..].parse::<u8>() {
                    Ok(n) if (n as usize) < self.tools.len() => {
                        self.current_tool = n;
                    }
                    Ok(n) => {
                        responses.push(format!("echo:T{} Invalid extruder", n));
                    }
                    Err(_) => {
                        responses.push(format!("echo:Unknown command: \"{}\"", command));
                    }
                }
                responses.push("ok".to_string());
            }
            _ => {
                responses.push(format!("echo:Unknown command: \"{}\"", command));
                responses.push("ok".to_string());
            }
        }
    }

    fn handle_move(&mut self, rest: &str, responses: &mut Vec<String>) {
        for (letter, value) in parse_params(rest) {
            match letter {
                'X' => self.pos[0] = apply_mode(self.pos[0], value, self.relative),
                'Y' => self.pos[1] = apply_mode(self.pos[1], value, self.relative),
                'Z' => self.pos[2] = apply_mode(self.pos[2], value, self.relative),
                'E' => self.pos[3] = apply_mode(self.pos[3], value, self.extruder_relative),
                'F' => self.feedrate = value,
                _ => {}
            }
        }
        responses.push("ok".to_string());
    }

    fn handle_dwell(&mut self, rest: &str, _responses: &mut Vec<String>) {
        let params = parse_params(rest);
        let millis = params
            .iter()
            .find(|(letter, _)| *letter == 'P')
            .map(|(_, value)| *value)
            .or_else(|| {
                params
                    .iter()
                    .find(|(letter, _)| *letter == 'S')
                    .map(|(_, value)| value * 1000.0)
            })
            .unwrap_or(0.0);
        let deadline = self.now() + std::time::Duration::from_millis(millis.max(0.0) as u64);
        self.begin_blocking(PendingOk::DwellUntil(deadline));
    }

    /// Set a tool heater target from `S`/`R` params; `T` overrides the
    /// target tool. Returns the affected tool index.
    fn set_tool_target(&mut self, rest: &str) -> u8 {
        let params = parse_params(rest);
        let index = params
            .iter()
            .find(|(letter, _)| *letter == 'T')
            .map(|(_, value)| *value as u8)
            .unwrap_or(self.current_tool);
        let target = params
            .iter()
            .find(|(letter, _)| *letter == 'S' || *letter == 'R')
            .map(|(_, value)| *value);
        if let (Some(target), Some(tool)) = (target, self.tools.get_mut(index as usize)) {
            tool.target = target.max(0.0);
        }
        index.min(self.tools.len().saturating_sub(1) as u8)
    }

    fn set_bed_target(&mut self, rest: &str) {
        let target = parse_params(rest)
            .iter()
            .find(|(letter, _)| *letter == 'S' || *letter == 'R')
            .map(|(_, value)| *value);
        if let (Some(target), Some(bed)) = (target, self.bed.as_mut()) {
            bed.target = target.max(0.0);
        }
    }

    fn set_chamber_target(&mut self, rest: &str) {
        let target = parse_params(rest)
            .iter()
            .find(|(letter, _)| *letter == 'S' || *letter == 'R')
            .map(|(_, value)| *value);
        if let (Some(target), Some(chamber)) = (target, self.chamber.as_mut()) {
            chamber.target = target.max(0.0);
        }
    }

    fn begin_blocking(&mut self, pending: PendingOk) {
        let now = self.now();
        self.pending_ok = Some(pending);
        self.last_busy = now;
        self.last_heatup_report = now;
    }
}

/// Parse `X10 Y-3.5 F1500` style parameter lists
pub(crate) fn parse_params(rest: &str) -> Vec<(char, f64)> {
    let mut params = Vec::new();
    for token in rest.split_whitespace() {
        let mut chars = token.chars();
        let Some(letter) = chars.next() else {
            continue;
        };
        if !letter.is_ascii_alphabetic() {
            continue;
        }
        if let Ok(value) = chars.as_str().parse::<f64>() {
            params.push((letter.to_ascii_uppercase(), value));
        }
    }
    params
}

/// Apply absolute/relative mode to one axis value
fn apply_mode(current: f64, value: f64, relative: bool) -> f64 {
    if relative {
        current + value
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VirtualPrinterSettings;

    fn printer() -> VirtualPrinter {
        let mut printer = VirtualPrinter::with_defaults();
        while printer.queued_lines() > 0 {
            use printkit_core::Transport;
            printer.readline().unwrap();
        }
        printer
    }

    fn send(printer: &mut VirtualPrinter, line: &str) -> Vec<String> {
        use printkit_core::Transport;
        printer.write_line(line.as_bytes()).unwrap();
        let mut lines = Vec::new();
        loop {
            let bytes = printer.readline().unwrap();
            if bytes.is_empty() {
                break;
            }
            lines.push(String::from_utf8(bytes).unwrap());
        }
        lines
    }

    #[test]
    fn test_moves_track_position() {
        let mut printer = printer();
        send(&mut printer, "G1 X10 Y20 Z0.3 F1500");
        let report = send(&mut printer, "M114");
        assert!(report[0].starts_with("X:10.00 Y:20.00 Z:0.30"));
    }

    #[test]
    fn test_relative_mode() {
        let mut printer = printer();
        send(&mut printer, "G1 X10");
        send(&mut printer, "G91");
        send(&mut printer, "G1 X5");
        let report = send(&mut printer, "M114");
        assert!(report[0].starts_with("X:15.00"));
    }

    #[test]
    fn test_m115_reports_firmware_and_caps() {
        let mut printer = printer();
        let lines = send(&mut printer, "M115");
        assert!(lines[0].starts_with("FIRMWARE_NAME:Marlin"));
        assert!(lines.iter().any(|l| l == "Cap:AUTOREPORT_TEMP:1"));
        assert_eq!(lines.last().map(String::as_str), Some("ok"));
    }

    #[test]
    fn test_tool_selection() {
        let mut settings = VirtualPrinterSettings::default();
        settings.extruder_count = 2;
        let mut printer = VirtualPrinter::new(settings);
        while printer.queued_lines() > 0 {
            use printkit_core::Transport;
            printer.readline().unwrap();
        }
        assert_eq!(send(&mut printer, "T1"), vec!["ok"]);
        let lines = send(&mut printer, "T5");
        assert_eq!(lines[0], "echo:T5 Invalid extruder");
    }

    #[test]
    fn test_unknown_command_echo() {
        let mut printer = printer();
        let lines = send(&mut printer, "M987");
        assert_eq!(lines[0], "echo:Unknown command: \"M987\"");
        assert_eq!(lines[1], "ok");
    }

    #[test]
    fn test_eeprom_commands_acked() {
        let mut printer = printer();
        assert_eq!(send(&mut printer, "M92 X160"), vec!["ok"]);
        let report = send(&mut printer, "M503");
        assert!(report.iter().any(|l| l.contains("M92 X160.00")));
    }

    #[test]
    fn test_parse_params() {
        let params = parse_params("X10 Y-3.5 F1500");
        assert_eq!(
            params,
            vec![('X', 10.0), ('Y', -3.5), ('F', 1500.0)]
        );
    }
}
