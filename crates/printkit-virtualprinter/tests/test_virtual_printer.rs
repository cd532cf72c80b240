//! Virtual printer driven through its public transport interface

use printkit_core::Transport;
use printkit_virtualprinter::{VirtualPrinter, VirtualPrinterSettings};
use std::time::Duration;

fn drain(printer: &mut VirtualPrinter) -> Vec<String> {
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

fn fast_settings() -> VirtualPrinterSettings {
    let mut settings = VirtualPrinterSettings::default();
    settings.read_timeout = Duration::from_millis(10);
    settings
}

#[test]
fn test_heatup_progression_over_simulated_time() {
    let mut printer = VirtualPrinter::new(fast_settings());
    drain(&mut printer);

    printer.write_line(b"M104 S210").unwrap();
    assert_eq!(drain(&mut printer), vec!["ok"]);

    printer.advance(Duration::from_secs(2));
    printer.write_line(b"M105").unwrap();
    let report = drain(&mut printer).pop().unwrap();
    let actual: f64 = report
        .strip_prefix("ok T:")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap();
    assert!(actual > 21.3, "heater did not warm up: {}", report);
    assert!(report.contains("/210.00"));

    printer.advance(Duration::from_secs(120));
    printer.write_line(b"M105").unwrap();
    let report = drain(&mut printer).pop().unwrap();
    let actual: f64 = report
        .strip_prefix("ok T:")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap();
    assert!((actual - 210.0).abs() < 2.0, "heater never settled: {}", report);
}

#[test]
fn test_eeprom_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eeprom.json");

    let mut settings = fast_settings();
    settings.eeprom_path = Some(path.clone());
    let mut printer = VirtualPrinter::new(settings.clone());
    drain(&mut printer);

    printer.write_line(b"M92 X160 E420").unwrap();
    drain(&mut printer);
    printer.write_line(b"M500").unwrap();
    let lines = drain(&mut printer);
    assert!(lines.iter().any(|l| l.contains("Settings Stored")));
    assert!(path.exists());

    // A fresh printer boots with defaults, then M501 restores the save
    let mut fresh = VirtualPrinter::new(settings);
    drain(&mut fresh);
    fresh.write_line(b"M503").unwrap();
    let report = drain(&mut fresh);
    assert!(report.iter().any(|l| l.contains("M92 X80.00")));

    fresh.write_line(b"M501").unwrap();
    drain(&mut fresh);
    fresh.write_line(b"M503").unwrap();
    let report = drain(&mut fresh);
    assert!(report.iter().any(|l| l.contains("X160.00")));
    assert!(report.iter().any(|l| l.contains("E420.00")));

    // M502 throws the saved values away again
    fresh.write_line(b"M502").unwrap();
    drain(&mut fresh);
    fresh.write_line(b"M503").unwrap();
    let report = drain(&mut fresh);
    assert!(report.iter().any(|l| l.contains("M92 X80.00")));
}

#[test]
fn test_sd_print_reports_progress_and_done() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("PART.GCO"), "G28\nG1 X1\nG1 X2\nG1 X3\n").unwrap();

    let mut settings = fast_settings();
    settings.sd_folder = Some(dir.path().to_path_buf());
    settings.sd_throttle = Duration::from_millis(50);
    let mut printer = VirtualPrinter::new(settings);
    drain(&mut printer);

    printer.write_line(b"M23 PART.GCO").unwrap();
    let lines = drain(&mut printer);
    assert!(lines[0].starts_with("File opened: PART.GCO Size:"));
    assert_eq!(lines[1], "File selected");

    printer.write_line(b"M24").unwrap();
    drain(&mut printer);

    printer.advance(Duration::from_millis(120));
    printer.write_line(b"M27").unwrap();
    let status = drain(&mut printer);
    let report = status.iter().find(|l| l.starts_with("SD printing byte")).unwrap();
    let (pos, total) = report
        .strip_prefix("SD printing byte ")
        .and_then(|r| r.split_once('/'))
        .unwrap();
    assert!(pos.parse::<u64>().unwrap() > 0);
    assert_eq!(total.parse::<u64>().unwrap(), 22);

    printer.advance(Duration::from_secs(2));
    let lines = drain(&mut printer);
    assert!(lines.iter().any(|l| l == "Done printing file"));
}

#[test]
fn test_go_awol_silences_the_printer() {
    let mut printer = VirtualPrinter::new(fast_settings());
    drain(&mut printer);

    printer.write_line(b"!!DEBUG:go_awol").unwrap();
    printer.write_line(b"M105").unwrap();
    assert!(drain(&mut printer).is_empty());
}

#[test]
fn test_drop_connection_fails_io() {
    let mut printer = VirtualPrinter::new(fast_settings());
    drain(&mut printer);

    printer.write_line(b"!!DEBUG:drop_connection").unwrap();
    assert!(printer.readline().is_err());
    assert!(printer.write_line(b"M105").is_err());
}
