//! Command scheduler
//!
//! Two host-side queues drained ahead of the job, in strict priority:
//!
//! 1. Send-now queue (UI-originated commands; bounded, oldest-drop)
//! 2. Script queue (pause/resume/cancel/connect scripts; fully drains
//!    before a job line goes out)
//!
//! Resend replays and the job source itself are handled by the state
//! machine; the job is only pulled when both queues are empty.

use std::collections::VecDeque;

/// Where a scheduled command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledSource {
    /// The send-now queue
    SendNow,
    /// The script queue
    Script,
}

/// Host-side queues feeding the transmit path
#[derive(Debug)]
pub struct CommandScheduler {
    send_now: VecDeque<String>,
    send_now_capacity: usize,
    scripts: VecDeque<String>,
}

impl CommandScheduler {
    /// Create a scheduler with the given send-now capacity
    pub fn new(send_now_capacity: usize) -> Self {
        Self {
            send_now: VecDeque::new(),
            send_now_capacity: send_now_capacity.max(1),
            scripts: VecDeque::new(),
        }
    }

    /// Queue a user command. Non-blocking; on overflow the oldest entry is
    /// dropped and returned so the caller can emit a warning.
    pub fn enqueue(&mut self, command: impl Into<String>) -> Option<String> {
        let mut dropped = None;
        if self.send_now.len() == self.send_now_capacity {
            dropped = self.send_now.pop_front();
        }
        self.send_now.push_back(command.into());
        dropped
    }

    /// Queue a periodic probe (`M105`/`M27`) unless an identical one is
    /// already waiting
    pub fn enqueue_probe(&mut self, command: &str) -> bool {
        if self.send_now.iter().any(|queued| queued == command) {
            return false;
        }
        self.enqueue(command);
        true
    }

    /// Append script lines; they drain before any job line
    pub fn push_script(&mut self, lines: impl IntoIterator<Item = String>) {
        self.scripts.extend(lines);
    }

    /// Next queued command in priority order
    pub fn pop(&mut self) -> Option<(String, ScheduledSource)> {
        if let Some(command) = self.send_now.pop_front() {
            return Some((command, ScheduledSource::SendNow));
        }
        if let Some(command) = self.scripts.pop_front() {
            return Some((command, ScheduledSource::Script));
        }
        None
    }

    /// Whether both queues are empty (the job may be pulled)
    pub fn is_empty(&self) -> bool {
        self.send_now.is_empty() && self.scripts.is_empty()
    }

    /// Whether script lines are still draining
    pub fn scripts_pending(&self) -> bool {
        !self.scripts.is_empty()
    }

    /// Number of queued commands across both queues
    pub fn len(&self) -> usize {
        self.send_now.len() + self.scripts.len()
    }

    /// Drop everything (cancel/disconnect)
    pub fn clear(&mut self) {
        self.send_now.clear();
        self.scripts.clear();
    }
}
