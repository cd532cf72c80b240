//! Incoming line classification
//!
//! Every line from the firmware is classified by its leading token before
//! the protocol state machine acts on it. `echo:` prefixes are peeled once
//! so `echo:busy: processing` lands in the busy bucket.

/// Classified firmware line
#[derive(Debug, Clone, PartialEq)]
pub enum FirmwareLine {
    /// `ok`, optionally with a payload (`ok T:...`)
    Ok(String),
    /// `wait` idle beacon
    Wait,
    /// `busy: <reason>`
    Busy(String),
    /// `Resend: <n>` or `rs <n>`
    Resend(u32),
    /// `Error: <message>`
    Error(String),
    /// Temperature report (`T:...`, `B:...`, possibly after `ok`)
    Temperature(String),
    /// Position report (`X:... Y:... Z:...`)
    Position(String),
    /// `Cap:<NAME>:<0|1>`
    Capability(String),
    /// `M115` key/value reply (`FIRMWARE_NAME:...`)
    FirmwareInfo(String),
    /// `start` banner after reset
    Start,
    /// `Begin file list`
    BeginFileList,
    /// `End file list`
    EndFileList,
    /// `SD printing byte <pos>/<total>`
    SdPrintingByte {
        /// Current byte position.
        pos: u64,
        /// Total byte size.
        total: u64,
    },
    /// `Not SD printing`
    NotSdPrinting,
    /// `SD card ok` / `SD init fail` style card status
    SdCardStatus(bool),
    /// `File opened: <name> Size: <n>`
    FileOpened {
        /// Name of the opened file.
        name: String,
        /// Reported size, when parseable.
        size: Option<u64>,
    },
    /// `File selected`
    FileSelected,
    /// `Writing to file: <name>`
    WritingToFile(String),
    /// `Done saving file`
    DoneSavingFile,
    /// `Done printing file`
    DonePrintingFile,
    /// `open failed, File: <name>.`
    OpenFailed(String),
    /// `echo:` output that matched nothing more specific
    Echo(String),
    /// Anything else
    Message(String),
}

/// Classify one line. The caller trims and drops empty lines first.
pub fn classify(line: &str) -> FirmwareLine {
    let line = line.trim();

    // Peel a single echo: prefix so echo:busy / echo:Unknown still classify
    if let Some(rest) = line.strip_prefix("echo:") {
        let rest = rest.trim();
        if rest.starts_with("busy:") {
            return classify(rest);
        }
        return FirmwareLine::Echo(rest.to_string());
    }

    if line == "ok" || line.starts_with("ok ") || line.starts_with("ok:") {
        let payload = line[2..].trim_start_matches(':').trim().to_string();
        return FirmwareLine::Ok(payload);
    }
    if line == "wait" {
        return FirmwareLine::Wait;
    }
    if let Some(reason) = line.strip_prefix("busy:") {
        return FirmwareLine::Busy(reason.trim().to_string());
    }
    if let Some(n) = super::parsers::resend::parse(line) {
        return FirmwareLine::Resend(n);
    }
    if let Some(message) = line.strip_prefix("Error:") {
        return FirmwareLine::Error(message.trim().to_string());
    }
    if let Some(message) = line.strip_prefix("!!") {
        // RepRapFirmware-style fatal marker
        return FirmwareLine::Error(message.trim().to_string());
    }
    if line == "start" {
        return FirmwareLine::Start;
    }
    if line.starts_with("Cap:") {
        return FirmwareLine::Capability(line.to_string());
    }
    if line.contains("FIRMWARE_NAME:") {
        return FirmwareLine::FirmwareInfo(line.to_string());
    }
    if line == "Begin file list" {
        return FirmwareLine::BeginFileList;
    }
    if line == "End file list" {
        return FirmwareLine::EndFileList;
    }
    if let Some(rest) = line.strip_prefix("SD printing byte") {
        if let Some((pos, total)) = parse_fraction(rest) {
            return FirmwareLine::SdPrintingByte { pos, total };
        }
    }
    if line == "Not SD printing" {
        return FirmwareLine::NotSdPrinting;
    }
    if line == "SD card ok" || line == "TF card ok" {
        return FirmwareLine::SdCardStatus(true);
    }
    if line.starts_with("SD init fail")
        || line.starts_with("volume.init failed")
        || line.starts_with("No SD card")
    {
        return FirmwareLine::SdCardStatus(false);
    }
    if let Some(rest) = line.strip_prefix("File opened:") {
        let (name, size) = parse_file_opened(rest);
        return FirmwareLine::FileOpened { name, size };
    }
    if line.starts_with("File selected") {
        return FirmwareLine::FileSelected;
    }
    if let Some(rest) = line.strip_prefix("Writing to file:") {
        return FirmwareLine::WritingToFile(rest.trim().to_string());
    }
    if line.starts_with("Done saving file") {
        return FirmwareLine::DoneSavingFile;
    }
    if line.starts_with("Done printing file") {
        return FirmwareLine::DonePrintingFile;
    }
    if let Some(rest) = line.strip_prefix("open failed, File:") {
        return FirmwareLine::OpenFailed(rest.trim().trim_end_matches('.').to_string());
    }
    if looks_like_temperature(line) {
        return FirmwareLine::Temperature(line.to_string());
    }
    if line.starts_with("X:") {
        return FirmwareLine::Position(line.to_string());
    }
    FirmwareLine::Message(line.to_string())
}

/// Whether a line is (or begins with) a temperature report
fn looks_like_temperature(line: &str) -> bool {
    for prefix in ["T:", "T0:", "B:", "C:", "@:"] {
        if line.starts_with(prefix) {
            return true;
        }
    }
    false
}

fn parse_fraction(rest: &str) -> Option<(u64, u64)> {
    let (pos, total) = rest.trim().split_once('/')?;
    Some((
        pos.trim().parse().ok()?,
        total.trim().split_whitespace().next()?.parse().ok()?,
    ))
}

fn parse_file_opened(rest: &str) -> (String, Option<u64>) {
    let rest = rest.trim();
    if let Some(idx) = rest.rfind("Size:") {
        let name = rest[..idx].trim().trim_end_matches('.').to_string();
        let size = rest[idx + 5..].trim().parse().ok();
        (name, size)
    } else {
        (rest.to_string(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_variants() {
        assert_eq!(classify("ok"), FirmwareLine::Ok(String::new()));
        assert_eq!(
            classify("ok T:23.0 /0.0"),
            FirmwareLine::Ok("T:23.0 /0.0".to_string())
        );
    }

    #[test]
    fn test_wait_and_busy() {
        assert_eq!(classify("wait"), FirmwareLine::Wait);
        assert_eq!(
            classify("busy: processing"),
            FirmwareLine::Busy("processing".to_string())
        );
        assert_eq!(
            classify("echo:busy: paused for user"),
            FirmwareLine::Busy("paused for user".to_string())
        );
    }

    #[test]
    fn test_resend_shapes() {
        assert_eq!(classify("Resend: 100"), FirmwareLine::Resend(100));
        assert_eq!(classify("rs 42"), FirmwareLine::Resend(42));
    }

    #[test]
    fn test_error() {
        assert_eq!(
            classify("Error:checksum mismatch, Last Line: 4"),
            FirmwareLine::Error("checksum mismatch, Last Line: 4".to_string())
        );
    }

    #[test]
    fn test_sd_lines() {
        assert_eq!(classify("Begin file list"), FirmwareLine::BeginFileList);
        assert_eq!(classify("End file list"), FirmwareLine::EndFileList);
        assert_eq!(
            classify("SD printing byte 512/1024"),
            FirmwareLine::SdPrintingByte {
                pos: 512,
                total: 1024
            }
        );
        assert_eq!(classify("SD card ok"), FirmwareLine::SdCardStatus(true));
        assert_eq!(classify("SD init fail"), FirmwareLine::SdCardStatus(false));
        assert_eq!(
            classify("File opened: foo.gco Size: 1024"),
            FirmwareLine::FileOpened {
                name: "foo.gco".to_string(),
                size: Some(1024)
            }
        );
        assert_eq!(classify("File selected"), FirmwareLine::FileSelected);
        assert_eq!(
            classify("Done printing file"),
            FirmwareLine::DonePrintingFile
        );
    }

    #[test]
    fn test_temperature_and_position() {
        assert!(matches!(
            classify("T:210.04 /210.00 B:52.00 /52.00"),
            FirmwareLine::Temperature(_)
        ));
        assert!(matches!(
            classify("X:10.00 Y:20.00 Z:0.30 E:12.5 Count X:800 Y:1600 Z:120"),
            FirmwareLine::Position(_)
        ));
    }

    #[test]
    fn test_firmware_info_and_caps() {
        assert!(matches!(
            classify("FIRMWARE_NAME:Marlin 2.0.7.2 MACHINE_TYPE:Ender-3"),
            FirmwareLine::FirmwareInfo(_)
        ));
        assert!(matches!(
            classify("Cap:AUTOREPORT_TEMP:1"),
            FirmwareLine::Capability(_)
        ));
    }

    #[test]
    fn test_start_and_fallthrough() {
        assert_eq!(classify("start"), FirmwareLine::Start);
        assert!(matches!(
            classify("echo:Unknown command: \"M999\""),
            FirmwareLine::Echo(_)
        ));
        assert!(matches!(classify("anything else"), FirmwareLine::Message(_)));
    }
}
