use std::time::{Duration, Instant};

use super::circular_buffer::CircularBuffer;
use super::types::{ErrorClass, RealtimeError};

const MAX_RECENT_ERRORS: usize = 100;
const MAX_ERROR_TEXT_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct LinkErrorRecord {
    pub at: Instant,
    pub context: String,
    pub class: ErrorClass,
    pub error: String,
}

fn truncate_string(s: &str) -> String {
    if s.len() <= MAX_ERROR_TEXT_BYTES {
        return s.to_string();
    }

    let mut end = MAX_ERROR_TEXT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Link counters snapshot returned by `GetLinkStats`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Time since the current transport opened, zero when never opened.
    pub uptime: Duration,
    pub frames_in: u64,
    pub frames_out: u64,
    pub applied: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub opens: u64,
    pub reconnects_scheduled: u64,
    pub errors: u64,
    /// Network failures, timeouts and abnormal closes.
    pub transport_errors: u64,
    /// Malformed frames and server-reported envelope errors.
    pub protocol_errors: u64,
    pub last_frame_age: Option<Duration>,
    pub recent_errors: usize,
}

/// Per-manager link health, owned by the actor without interior mutability.
#[derive(Debug)]
pub struct LinkHealth {
    opened_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    frames_in: u64,
    frames_out: u64,
    applied: u64,
    ignored: u64,
    malformed: u64,
    opens: u64,
    reconnects_scheduled: u64,
    error_count: u64,
    transport_errors: u64,
    protocol_errors: u64,
    recent_errors: CircularBuffer<LinkErrorRecord>,
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkHealth {
    pub fn new() -> Self {
        Self {
            opened_at: None,
            last_frame_at: None,
            frames_in: 0,
            frames_out: 0,
            applied: 0,
            ignored: 0,
            malformed: 0,
            opens: 0,
            reconnects_scheduled: 0,
            error_count: 0,
            transport_errors: 0,
            protocol_errors: 0,
            recent_errors: CircularBuffer::new(MAX_RECENT_ERRORS),
        }
    }

    pub fn record_open(&mut self) {
        self.opened_at = Some(Instant::now());
        self.opens = self.opens.saturating_add(1);
    }

    pub fn record_closed(&mut self) {
        self.opened_at = None;
    }

    pub fn record_reconnect_scheduled(&mut self) {
        self.reconnects_scheduled = self.reconnects_scheduled.saturating_add(1);
    }

    pub fn record_frame_in(&mut self) {
        self.last_frame_at = Some(Instant::now());
        self.frames_in = self.frames_in.saturating_add(1);
    }

    pub fn record_frame_out(&mut self) {
        self.frames_out = self.frames_out.saturating_add(1);
    }

    pub fn record_applied(&mut self) {
        self.applied = self.applied.saturating_add(1);
    }

    pub fn record_ignored(&mut self) {
        self.ignored = self.ignored.saturating_add(1);
    }

    pub fn record_malformed(&mut self) {
        self.malformed = self.malformed.saturating_add(1);
    }

    pub fn record_error(&mut self, context: &str, error: &RealtimeError) {
        let class = error.class();
        self.error_count = self.error_count.saturating_add(1);
        match class {
            ErrorClass::Transport => {
                self.transport_errors = self.transport_errors.saturating_add(1);
            }
            ErrorClass::Protocol => {
                self.protocol_errors = self.protocol_errors.saturating_add(1);
            }
            _ => {}
        }
        self.recent_errors.push(LinkErrorRecord {
            at: Instant::now(),
            context: truncate_string(context),
            class,
            error: truncate_string(&error.to_string()),
        });
    }

    pub fn recent_errors(&self) -> impl Iterator<Item = &LinkErrorRecord> {
        self.recent_errors.iter()
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            uptime: self.opened_at.map(|t| t.elapsed()).unwrap_or_default(),
            frames_in: self.frames_in,
            frames_out: self.frames_out,
            applied: self.applied,
            ignored: self.ignored,
            malformed: self.malformed,
            opens: self.opens,
            reconnects_scheduled: self.reconnects_scheduled,
            errors: self.error_count,
            transport_errors: self.transport_errors,
            protocol_errors: self.protocol_errors,
            last_frame_age: self.last_frame_at.map(|t| t.elapsed()),
            recent_errors: self.recent_errors.len(),
        }
    }
}
