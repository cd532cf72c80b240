//! Print job sources
//!
//! A tagged variant over the three ways a print can be fed:
//! - [`LocalGcodeJob`]: the host streams a local G-code file line by line
//! - [`SdStreamingUploadJob`]: the host streams a local file to the
//!   printer's SD card between `M28` and `M29`
//! - [`SdResidentPrintJob`]: the job runs on the firmware; the host only
//!   observes progress via polled `M27`

use crate::protocol::codec;
use printkit_core::error::{JobError, Result};
use printkit_core::PrintProgress;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Payload lines yielded before the print timer starts; the initial
/// warmup should not skew print-time estimates
const WARMUP_LINE_COUNT: u64 = 100;

/// The active print job, if any
#[derive(Debug, Default)]
pub enum PrintJob {
    /// No job
    #[default]
    None,
    /// Host-streamed local G-code file
    Local(LocalGcodeJob),
    /// Streaming upload to the printer's SD card
    SdUpload(SdStreamingUploadJob),
    /// Print running from the printer's SD card
    SdResident(SdResidentPrintJob),
}

impl PrintJob {
    /// Whether a job is loaded
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether this job streams lines from the host
    pub fn is_host_streamed(&self) -> bool {
        matches!(self, Self::Local(_) | Self::SdUpload(_))
    }

    /// The job's display name
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Local(job) => job.path.file_name().and_then(|n| n.to_str()),
            Self::SdUpload(job) => Some(&job.remote_name),
            Self::SdResident(job) => Some(&job.name),
        }
    }

    /// Commands to send when the job starts
    pub fn start_commands(&self) -> Vec<String> {
        match self {
            Self::SdUpload(job) => vec![format!("M28 {}", job.remote_name)],
            Self::SdResident(_) => vec!["M24".to_string()],
            _ => Vec::new(),
        }
    }

    /// The next line to transmit, or `None` when the source is exhausted
    /// (or never produces lines, as for SD-resident prints)
    pub fn next_line(&mut self) -> Result<Option<String>> {
        match self {
            Self::None | Self::SdResident(_) => Ok(None),
            Self::Local(job) => job.next_line(),
            Self::SdUpload(job) => job.next_line(),
        }
    }

    /// Current progress, when a size is known
    pub fn progress(&self) -> Option<PrintProgress> {
        match self {
            Self::None => None,
            Self::Local(job) => Some(job.progress()),
            Self::SdUpload(job) => Some(job.progress()),
            Self::SdResident(job) => job.progress(),
        }
    }

    /// Byte position in the source
    pub fn file_pos(&self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::Local(job) => Some(job.pos),
            Self::SdUpload(job) => Some(job.pos),
            Self::SdResident(job) => job.pos,
        }
    }

    /// Total size of the source in bytes
    pub fn size(&self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::Local(job) => Some(job.size),
            Self::SdUpload(job) => Some(job.size),
            Self::SdResident(job) => job.size,
        }
    }

    /// Drop the job
    pub fn cancel(&mut self) {
        *self = Self::None;
    }
}

/// Host-streamed local G-code file
///
/// The first yielded line is always `M110 N0` to zero the firmware's line
/// counter; after that, file lines with comments stripped and blanks
/// dropped.
#[derive(Debug)]
pub struct LocalGcodeJob {
    path: PathBuf,
    reader: BufReader<File>,
    size: u64,
    pos: u64,
    lines_yielded: u64,
    start_time: Option<Instant>,
    sent_reset: bool,
}

impl LocalGcodeJob {
    /// Open a local file for streaming
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| JobError::FileError {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let size = file
            .metadata()
            .map_err(|e| JobError::FileError {
                reason: e.to_string(),
            })?
            .len();
        Ok(Self {
            path,
            reader: BufReader::new(file),
            size,
            pos: 0,
            lines_yielded: 0,
            start_time: None,
            sent_reset: false,
        })
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        if !self.sent_reset {
            self.sent_reset = true;
            return Ok(Some("M110 N0".to_string()));
        }

        loop {
            let mut raw = String::new();
            let read = self.reader.read_line(&mut raw).map_err(|e| {
                JobError::FileError {
                    reason: e.to_string(),
                }
            })?;
            if read == 0 {
                return Ok(None);
            }
            self.pos += read as u64;

            let line = codec::strip_comment(&raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            self.lines_yielded += 1;
            if self.lines_yielded == WARMUP_LINE_COUNT {
                self.start_time = Some(Instant::now());
            }
            return Ok(Some(line.to_string()));
        }
    }

    fn progress(&self) -> PrintProgress {
        let mut progress = PrintProgress::from_bytes(self.pos, self.size);
        progress.elapsed_secs = self.start_time.map(|t| t.elapsed().as_secs());
        progress
    }

    /// When the print proper started (after the warmup lines), if yet
    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }
}

/// Streaming upload of a local file to the printer's SD card
///
/// `start_commands()` yields `M28 <name>`; payload lines are forwarded
/// verbatim; end of file makes the connection send `M29`.
#[derive(Debug)]
pub struct SdStreamingUploadJob {
    remote_name: String,
    reader: BufReader<File>,
    size: u64,
    pos: u64,
}

impl SdStreamingUploadJob {
    /// Open a local file for upload under `remote_name`
    pub fn open(local: impl AsRef<Path>, remote_name: impl Into<String>) -> Result<Self> {
        let local = local.as_ref();
        let file = File::open(local).map_err(|e| JobError::FileError {
            reason: format!("{}: {}", local.display(), e),
        })?;
        let size = file
            .metadata()
            .map_err(|e| JobError::FileError {
                reason: e.to_string(),
            })?
            .len();
        Ok(Self {
            remote_name: remote_name.into(),
            reader: BufReader::new(file),
            size,
            pos: 0,
        })
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            let mut raw = String::new();
            let read = self.reader.read_line(&mut raw).map_err(|e| {
                JobError::FileError {
                    reason: e.to_string(),
                }
            })?;
            if read == 0 {
                return Ok(None);
            }
            self.pos += read as u64;
            let line = raw.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            return Ok(Some(line.to_string()));
        }
    }

    fn progress(&self) -> PrintProgress {
        PrintProgress::from_bytes(self.pos, self.size)
    }
}

/// Print running from the printer's SD card
///
/// The host never streams lines; progress comes from `SD printing byte
/// X/Y` replies to the periodic `M27` poll.
#[derive(Debug)]
pub struct SdResidentPrintJob {
    name: String,
    pos: Option<u64>,
    size: Option<u64>,
}

impl SdResidentPrintJob {
    /// Track a print of the selected SD file
    pub fn new(name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            pos: None,
            size,
        }
    }

    /// Fold in an `SD printing byte <pos>/<total>` report
    pub fn update_progress(&mut self, pos: u64, total: u64) {
        self.pos = Some(pos);
        self.size = Some(total);
    }

    fn progress(&self) -> Option<PrintProgress> {
        match (self.pos, self.size) {
            (Some(pos), Some(size)) => Some(PrintProgress::from_bytes(pos, size)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn gcode_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_local_job_first_line_is_line_reset() {
        let file = gcode_file("G28\nG1 X10\n");
        let mut job = PrintJob::Local(LocalGcodeJob::open(file.path()).unwrap());
        assert_eq!(job.next_line().unwrap().as_deref(), Some("M110 N0"));
        assert_eq!(job.next_line().unwrap().as_deref(), Some("G28"));
        assert_eq!(job.next_line().unwrap().as_deref(), Some("G1 X10"));
        assert_eq!(job.next_line().unwrap(), None);
    }

    #[test]
    fn test_local_job_strips_comments_and_blanks() {
        let file = gcode_file("; header\nG28 ; home\n\n\nG1 X10\n");
        let mut job = PrintJob::Local(LocalGcodeJob::open(file.path()).unwrap());
        job.next_line().unwrap(); // M110 N0
        assert_eq!(job.next_line().unwrap().as_deref(), Some("G28"));
        assert_eq!(job.next_line().unwrap().as_deref(), Some("G1 X10"));
        assert_eq!(job.next_line().unwrap(), None);
    }

    #[test]
    fn test_local_job_progress_counts_bytes() {
        let file = gcode_file("G28\nG1 X10\n");
        let mut job = LocalGcodeJob::open(file.path()).unwrap();
        assert_eq!(job.progress().completion, Some(0.0));
        job.next_line().unwrap(); // M110 N0 reads nothing
        assert_eq!(job.pos, 0);
        job.next_line().unwrap();
        assert!(job.pos > 0);
    }

    #[test]
    fn test_start_time_deferred_past_warmup() {
        let mut content = String::new();
        for i in 0..150 {
            content.push_str(&format!("G1 X{}\n", i));
        }
        let file = gcode_file(&content);
        let mut job = LocalGcodeJob::open(file.path()).unwrap();
        job.next_line().unwrap(); // M110 N0
        for _ in 0..99 {
            job.next_line().unwrap();
        }
        assert!(job.start_time().is_none());
        job.next_line().unwrap(); // 100th payload line
        assert!(job.start_time().is_some());
    }

    #[test]
    fn test_sd_upload_start_and_lines_verbatim() {
        let file = gcode_file("G28 ; keep this comment\nG1 X10\n");
        let mut job = PrintJob::SdUpload(
            SdStreamingUploadJob::open(file.path(), "upload.gco").unwrap(),
        );
        assert_eq!(job.start_commands(), vec!["M28 upload.gco".to_string()]);
        assert_eq!(
            job.next_line().unwrap().as_deref(),
            Some("G28 ; keep this comment")
        );
        assert_eq!(job.next_line().unwrap().as_deref(), Some("G1 X10"));
        assert_eq!(job.next_line().unwrap(), None);
    }

    #[test]
    fn test_sd_resident_yields_no_lines() {
        let mut job = PrintJob::SdResident(SdResidentPrintJob::new("foo.gco", Some(1024)));
        assert_eq!(job.next_line().unwrap(), None);
        assert_eq!(job.start_commands(), vec!["M24".to_string()]);

        if let PrintJob::SdResident(resident) = &mut job {
            resident.update_progress(512, 1024);
        }
        assert_eq!(job.progress().unwrap().completion, Some(0.5));
    }
}
