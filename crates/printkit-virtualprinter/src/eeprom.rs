//! EEPROM emulation
//!
//! Persists firmware parameter sets (`M92`, `M203`, ... `M666`) to a JSON
//! file. `M500` saves, `M501` reloads, `M502` restores defaults, `M503`
//! echoes everything. The file is written with an atomic rename so a
//! crashed save never leaves a torn file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Commands whose parameters the EEPROM retains. `M145` material presets
/// are keyed per `S` slot on top of these.
pub const EEPROM_COMMANDS: [&str; 15] = [
    "M92", "M203", "M201", "M204", "M206", "M200", "M301", "M304", "M851", "M420", "M900", "M205",
    "M145", "M665", "M666",
];

/// Factory defaults echoed after `M502`
const DEFAULTS: &[(&str, &[(char, f64)])] = &[
    ("M92", &[('X', 80.0), ('Y', 80.0), ('Z', 400.0), ('E', 93.0)]),
    ("M203", &[('X', 500.0), ('Y', 500.0), ('Z', 5.0), ('E', 25.0)]),
    (
        "M201",
        &[('X', 3000.0), ('Y', 3000.0), ('Z', 100.0), ('E', 10000.0)],
    ),
    ("M204", &[('P', 3000.0), ('R', 3000.0), ('T', 3000.0)]),
    ("M205", &[('X', 10.0), ('Y', 10.0), ('Z', 0.4), ('E', 5.0)]),
    ("M206", &[('X', 0.0), ('Y', 0.0), ('Z', 0.0)]),
    ("M200", &[('D', 1.75)]),
    ("M301", &[('P', 22.2), ('I', 1.08), ('D', 114.0)]),
    ("M304", &[('P', 10.0), ('I', 0.023), ('D', 305.4)]),
    ("M851", &[('Z', -0.5)]),
    ("M420", &[('S', 0.0), ('Z', 10.0)]),
    ("M900", &[('K', 0.12)]),
    (
        "M145 S0",
        &[('H', 200.0), ('B', 60.0), ('F', 255.0)],
    ),
    (
        "M145 S1",
        &[('H', 240.0), ('B', 100.0), ('F', 0.0)],
    ),
    ("M665", &[('L', 250.0), ('R', 125.0), ('H', 250.0)]),
    ("M666", &[('X', 0.0), ('Y', 0.0), ('Z', 0.0)]),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EepromData {
    entries: BTreeMap<String, Vec<(char, f64)>>,
}

/// Emulated EEPROM backed by an optional JSON file
#[derive(Debug)]
pub struct Eeprom {
    path: Option<PathBuf>,
    data: EepromData,
}

impl Eeprom {
    /// Create an EEPROM with factory defaults. Settings persist to `path`
    /// on `M500` when one is given.
    pub fn new(path: Option<PathBuf>) -> Self {
        let mut eeprom = Self {
            path,
            data: EepromData::default(),
        };
        eeprom.reset_to_defaults();
        eeprom
    }

    /// Restore factory defaults (`M502`)
    pub fn reset_to_defaults(&mut self) {
        self.data.entries.clear();
        for (cmd, params) in DEFAULTS {
            self.data.entries.insert(cmd.to_string(), params.to_vec());
        }
    }

    /// Apply a parameter-set command like `M92 X80 E93` or `M145 S0 H210`
    pub fn apply(&mut self, code: &str, params: &[(char, f64)]) {
        let key = if code == "M145" {
            let slot = params
                .iter()
                .find(|(letter, _)| *letter == 'S')
                .map(|(_, value)| *value as i64)
                .unwrap_or(0);
            format!("M145 S{}", slot)
        } else {
            code.to_string()
        };

        let entry = self.data.entries.entry(key).or_default();
        for (letter, value) in params {
            if code == "M145" && *letter == 'S' {
                continue;
            }
            match entry.iter_mut().find(|(l, _)| l == letter) {
                Some(existing) => existing.1 = *value,
                None => entry.push((*letter, *value)),
            }
        }
    }

    /// Look up a stored parameter
    pub fn get(&self, key: &str, letter: char) -> Option<f64> {
        self.data
            .entries
            .get(key)?
            .iter()
            .find(|(l, _)| *l == letter)
            .map(|(_, v)| *v)
    }

    /// Save to the backing file (`M500`), atomically
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)
    }

    /// Reload from the backing file (`M501`); keeps current values when no
    /// file exists yet
    pub fn load(&mut self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let json = fs::read_to_string(path)?;
        self.data = serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(())
    }

    /// Render all stored settings as `M503` echo lines
    pub fn report(&self) -> Vec<String> {
        let mut lines = vec!["echo:; Stored settings:".to_string()];
        for (key, params) in &self.data.entries {
            let rendered: Vec<String> = params
                .iter()
                .map(|(letter, value)| format!("{}{:.2}", letter, value))
                .collect();
            lines.push(format!("echo:  {} {}", key, rendered.join(" ")));
        }
        lines
    }
}
