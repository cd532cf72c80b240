//! SD card file entries and print progress

use serde::{Deserialize, Serialize};

/// One file entry from an SD card listing (`M20`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdFile {
    /// 8.3 name as reported by the firmware
    pub name: String,
    /// File size in bytes, if reported
    pub size: Option<u64>,
    /// Long filename, if reported
    pub long_name: Option<String>,
    /// Raw timestamp token, if reported
    pub timestamp: Option<String>,
}

impl SdFile {
    /// Create an entry with just a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            long_name: None,
            timestamp: None,
        }
    }
}

/// Progress of the current print or file transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintProgress {
    /// Completion in `0.0..=1.0`; `None` when the total size is unknown
    pub completion: Option<f64>,
    /// Current byte position in the source
    pub file_pos: Option<u64>,
    /// Total size of the source in bytes
    pub file_size: Option<u64>,
    /// Seconds spent printing so far, excluding the initial warmup
    pub elapsed_secs: Option<u64>,
}

impl PrintProgress {
    /// Build progress from a byte position and total size
    pub fn from_bytes(pos: u64, size: u64) -> Self {
        let completion = if size > 0 {
            Some(pos as f64 / size as f64)
        } else {
            None
        };
        Self {
            completion,
            file_pos: Some(pos),
            file_size: Some(size),
            elapsed_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_from_bytes() {
        let progress = PrintProgress::from_bytes(512, 1024);
        assert_eq!(progress.completion, Some(0.5));
        assert_eq!(progress.file_pos, Some(512));
        assert_eq!(progress.file_size, Some(1024));
    }

    #[test]
    fn test_progress_unknown_size() {
        let progress = PrintProgress::from_bytes(512, 0);
        assert_eq!(progress.completion, None);
    }
}
