//! Virtual SD card
//!
//! A directory on local disk maps one-to-one to the card contents. Uploads
//! write a file; an SD print reads the selected file back line by line at
//! a configurable throttle.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::Duration;

/// State of the simulated card
#[derive(Debug)]
pub struct VirtualSdCard {
    folder: Option<PathBuf>,
    initialized: bool,
    selected: Option<SelectedFile>,
    printing: bool,
    paused: bool,
    write_target: Option<(String, File)>,
    last_line_at: Duration,
    throttle: Duration,
}

#[derive(Debug)]
struct SelectedFile {
    name: String,
    size: u64,
    reader: BufReader<File>,
    pos: u64,
}

impl VirtualSdCard {
    /// Create a card backed by `folder`; `None` simulates "no card"
    pub fn new(folder: Option<PathBuf>, throttle: Duration) -> Self {
        let initialized = folder_exists(&folder);
        Self {
            folder,
            initialized,
            selected: None,
            printing: false,
            paused: false,
            write_target: None,
            last_line_at: Duration::ZERO,
            throttle,
        }
    }

    /// Whether a card is present and initialized (`M21` succeeded)
    pub fn is_ready(&self) -> bool {
        self.initialized
    }

    /// Re-initialize the card (`M21`)
    pub fn init(&mut self) -> bool {
        self.initialized = folder_exists(&self.folder);
        self.initialized
    }

    /// Release the card (`M22`)
    pub fn release(&mut self) {
        self.initialized = false;
        self.selected = None;
        self.printing = false;
        self.paused = false;
        self.write_target = None;
    }

    /// List files as `(name, size)` pairs for `M20`
    pub fn list(&self) -> Vec<(String, u64)> {
        let Some(folder) = &self.folder else {
            return Vec::new();
        };
        let mut entries = Vec::new();
        if let Ok(dir) = fs::read_dir(folder) {
            for entry in dir.flatten() {
                if let Ok(meta) = entry.metadata() {
                    if meta.is_file() {
                        entries.push((entry.file_name().to_string_lossy().to_string(), meta.len()));
                    }
                }
            }
        }
        entries.sort();
        entries
    }

    /// Select a file for printing (`M23`); returns its size
    pub fn select(&mut self, name: &str) -> Option<u64> {
        let path = self.resolve(name)?;
        let file = File::open(&path).ok()?;
        let size = file.metadata().ok()?.len();
        self.printing = false;
        self.paused = false;
        self.selected = Some(SelectedFile {
            name: path.file_name()?.to_string_lossy().to_string(),
            size,
            reader: BufReader::new(file),
            pos: 0,
        });
        Some(size)
    }

    /// The selected file name, if any
    pub fn selected_name(&self) -> Option<&str> {
        self.selected.as_ref().map(|s| s.name.as_str())
    }

    /// Current read position and size (`M27`)
    pub fn progress(&self) -> Option<(u64, u64)> {
        self.selected.as_ref().map(|s| (s.pos, s.size))
    }

    /// Whether an SD print is running (not paused)
    pub fn is_printing(&self) -> bool {
        self.printing && !self.paused
    }

    /// Start or resume the SD print (`M24`)
    pub fn start_print(&mut self, now: Duration) -> bool {
        if self.selected.is_none() {
            return false;
        }
        self.printing = true;
        self.paused = false;
        self.last_line_at = now;
        true
    }

    /// Pause the SD print (`M25`)
    pub fn pause_print(&mut self) {
        if self.printing {
            self.paused = true;
        }
    }

    /// Set the read position (`M26 S<p>`)
    pub fn set_position(&mut self, pos: u64) -> bool {
        let Some(selected) = &mut self.selected else {
            return false;
        };
        let clamped = pos.min(selected.size);
        if selected.reader.seek(SeekFrom::Start(clamped)).is_err() {
            return false;
        }
        selected.pos = clamped;
        true
    }

    /// Advance playback; returns `true` exactly once when the file ends
    pub fn step(&mut self, now: Duration) -> bool {
        if !self.is_printing() {
            return false;
        }
        let Some(selected) = &mut self.selected else {
            return false;
        };
        while now.saturating_sub(self.last_line_at) >= self.throttle {
            self.last_line_at += self.throttle;
            let mut line = String::new();
            match selected.reader.read_line(&mut line) {
                Ok(0) | Err(_) => {
                    selected.pos = selected.size;
                    self.printing = false;
                    self.paused = false;
                    return true;
                }
                Ok(n) => {
                    selected.pos += n as u64;
                }
            }
        }
        false
    }

    /// Begin a streaming upload (`M28`)
    pub fn begin_write(&mut self, name: &str) -> bool {
        let Some(folder) = &self.folder else {
            return false;
        };
        if !self.initialized {
            return false;
        }
        let path = folder.join(sanitize(name));
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
        {
            Ok(file) => {
                self.write_target = Some((sanitize(name), file));
                true
            }
            Err(_) => false,
        }
    }

    /// Whether a streaming upload is active
    pub fn is_writing(&self) -> bool {
        self.write_target.is_some()
    }

    /// Append one line to the upload target
    pub fn write_line(&mut self, line: &str) -> bool {
        if let Some((_, file)) = &mut self.write_target {
            writeln!(file, "{}", line).is_ok()
        } else {
            false
        }
    }

    /// Finish the streaming upload (`M29`); returns the written name
    pub fn end_write(&mut self) -> Option<String> {
        self.write_target.take().map(|(name, file)| {
            let _ = file.sync_all();
            name
        })
    }

    /// Delete a file (`M30`); refuses the selected print target
    pub fn delete(&mut self, name: &str) -> bool {
        if self
            .selected_name()
            .is_some_and(|selected| selected.eq_ignore_ascii_case(name))
        {
            return false;
        }
        match self.resolve(name) {
            Some(path) => fs::remove_file(path).is_ok(),
            None => false,
        }
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let folder = self.folder.as_ref()?;
        let wanted = sanitize(name);
        if let Ok(dir) = fs::read_dir(folder) {
            for entry in dir.flatten() {
                let file_name = entry.file_name().to_string_lossy().to_string();
                if file_name.eq_ignore_ascii_case(&wanted) {
                    return Some(entry.path());
                }
            }
        }
        None
    }
}

fn folder_exists(folder: &Option<PathBuf>) -> bool {
    folder.as_ref().is_some_and(|f| f.is_dir())
}

/// Strip any path components from a requested name
fn sanitize(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn card_with_file(content: &str) -> (tempfile::TempDir, VirtualSdCard) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("TEST.GCO"), content).unwrap();
        let card = VirtualSdCard::new(Some(dir.path().to_path_buf()), Duration::from_millis(10));
        (dir, card)
    }

    #[test]
    fn test_list_and_select() {
        let (_dir, mut card) = card_with_file("G28\nG1 X10\n");
        let files = card.list();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "TEST.GCO");

        let size = card.select("test.gco").unwrap();
        assert_eq!(size, 11);
        assert_eq!(card.selected_name(), Some("TEST.GCO"));
    }

    #[test]
    fn test_playback_reaches_eof() {
        let (_dir, mut card) = card_with_file("G28\nG1 X10\nG1 X20\n");
        card.select("TEST.GCO").unwrap();
        assert!(card.start_print(Duration::ZERO));

        let mut done = false;
        for ms in (10..200).step_by(10) {
            if card.step(Duration::from_millis(ms)) {
                done = true;
                break;
            }
        }
        assert!(done);
        let (pos, size) = card.progress().unwrap();
        assert_eq!(pos, size);
    }

    #[test]
    fn test_upload_roundtrip() {
        let dir = tempdir().unwrap();
        let mut card =
            VirtualSdCard::new(Some(dir.path().to_path_buf()), Duration::from_millis(10));
        assert!(card.begin_write("upload.gco"));
        assert!(card.write_line("G28"));
        assert!(card.write_line("G1 X5"));
        assert_eq!(card.end_write().as_deref(), Some("upload.gco"));

        let content = fs::read_to_string(dir.path().join("upload.gco")).unwrap();
        assert_eq!(content, "G28\nG1 X5\n");
    }

    #[test]
    fn test_delete_refuses_selected() {
        let (_dir, mut card) = card_with_file("G28\n");
        card.select("TEST.GCO").unwrap();
        assert!(!card.delete("TEST.GCO"));
        card.release();
        card.init();
        assert!(card.delete("TEST.GCO"));
    }

    #[test]
    fn test_set_position_seeks() {
        let (_dir, mut card) = card_with_file("G28\nG1 X10\n");
        card.select("TEST.GCO").unwrap();
        assert!(card.set_position(4));
        assert_eq!(card.progress(), Some((4, 11)));
    }
}
