//! Send record
//!
//! Ring of the most recently transmitted checksummed lines, keyed by line
//! number, kept to answer `Resend:` requests. The oldest entry is evicted
//! when the ring is full. A resend request older than the ring is a fatal
//! desync.

use std::collections::VecDeque;
use std::time::Instant;

/// One transmitted checksummed line. Immutable after send.
#[derive(Debug, Clone)]
pub struct SentLine {
    /// Line number the payload was framed with
    pub n: u32,
    /// The payload as framed (without checksum; recomputed on replay)
    pub text: String,
    /// When the line was written to the transport
    pub sent_at: Instant,
}

/// Ring of recently sent lines
#[derive(Debug)]
pub struct SendRecord {
    entries: VecDeque<SentLine>,
    capacity: usize,
}

impl SendRecord {
    /// Create a ring retaining `capacity` lines (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Record a sent line, evicting the oldest when full
    pub fn push(&mut self, n: u32, text: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(SentLine {
            n,
            text: text.into(),
            sent_at: Instant::now(),
        });
    }

    /// Clear the history (`M110`)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of retained lines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The ring's capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entry `offset` lines from the end; `offset` 1 is the last sent line
    pub fn from_end(&self, offset: usize) -> Option<&SentLine> {
        if offset == 0 || offset > self.entries.len() {
            return None;
        }
        self.entries.get(self.entries.len() - offset)
    }

    /// The oldest retained line number
    pub fn oldest_n(&self) -> Option<u32> {
        self.entries.front().map(|entry| entry.n)
    }

    /// The most recent retained line number
    pub fn newest_n(&self) -> Option<u32> {
        self.entries.back().map(|entry| entry.n)
    }
}
